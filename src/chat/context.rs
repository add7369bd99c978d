//! Grounds a chat message in current machine, reading and prediction data.
//!
//! Messages that mention product ids (`L12345`, `m14860`, ...) or belong to a
//! machine-pinned conversation get a detailed block per machine; anything else
//! gets a one-paragraph summary of every machine. The assembled text is
//! appended to the user's message.

use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::{error, warn};

use crate::error::Result;
use crate::models::{Machine, Prediction, SensorReading};
use crate::stats::summarize;
use crate::store::Store;

const RECENT_READINGS: i64 = 5;
const RECENT_PREDICTIONS: i64 = 10;

static PRODUCT_ID: OnceLock<Option<Regex>> = OnceLock::new();

// ---

/// Product ids mentioned in `message`, upper-cased, first occurrence first.
pub fn mentioned_product_ids(message: &str) -> Vec<String> {
    // ---
    let Some(re) = PRODUCT_ID
        .get_or_init(|| Regex::new(r"(?i)\b[LMH]\d{5}\b").ok())
        .as_ref()
    else {
        return Vec::new();
    };

    let mut ids: Vec<String> = Vec::new();
    for m in re.find_iter(message) {
        let id = m.as_str().to_uppercase();
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    ids
}

#[derive(Clone)]
pub struct ContextAssembler {
    store: Arc<dyn Store>,
}

impl ContextAssembler {
    // ---
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// The message followed by whatever context could be gathered.
    ///
    /// A `pinned` machine always gets a detailed block, ahead of any machine
    /// the message mentions. Storage failures fall back to the bare message.
    pub async fn enrich(&self, message: &str, pinned: Option<&Machine>) -> String {
        // ---
        let mut ids = mentioned_product_ids(message);
        if let Some(machine) = pinned {
            ids.retain(|id| *id != machine.product_id);
            ids.insert(0, machine.product_id.clone());
        }
        let enriched = if ids.is_empty() {
            self.all_machines(message).await
        } else {
            Ok(self.specific_machines(message, &ids).await)
        };

        enriched.unwrap_or_else(|e| {
            warn!(error = %e, "Chat context unavailable; sending bare message");
            message.to_string()
        })
    }

    async fn specific_machines(&self, message: &str, ids: &[String]) -> String {
        // ---
        let mut blocks = Vec::with_capacity(ids.len());
        for product_id in ids {
            match self.machine_block(product_id).await {
                Ok(Some(block)) => blocks.push(block),
                Ok(None) => blocks.push(format!("Machine {} not found in database.", product_id)),
                Err(e) => {
                    error!(product_id = %product_id, error = %e, "Failed to load machine context");
                    blocks.push(format!("Error fetching data for Machine {}.", product_id));
                }
            }
        }
        format!(
            "{}\n\n--- Context Data from Database ---\n{}",
            message,
            blocks.join("\n")
        )
    }

    async fn machine_block(&self, product_id: &str) -> Result<Option<String>> {
        // ---
        let Some(machine) = self.store.find_machine_by_product_id(product_id).await? else {
            return Ok(None);
        };

        let reading_count = self.store.count_readings(machine.id).await?;
        let prediction_count = self.store.count_predictions(machine.id).await?;
        let predictions = self
            .store
            .recent_predictions(machine.id, RECENT_PREDICTIONS)
            .await?;
        let readings = self
            .store
            .recent_readings(machine.id, RECENT_READINGS)
            .await?;

        Ok(Some(format_machine_block(
            &machine,
            reading_count,
            prediction_count,
            &predictions,
            &readings,
        )))
    }

    async fn all_machines(&self, message: &str) -> Result<String> {
        // ---
        let machines = self.store.list_machines(true).await?;
        if machines.is_empty() {
            return Ok(format!("{}\n\nNo machines found in database.", message));
        }

        let mut summaries = Vec::with_capacity(machines.len());
        for summary in &machines {
            let latest = self
                .store
                .recent_predictions(summary.machine.id, 1)
                .await?
                .pop();
            summaries.push(format_machine_summary(
                &summary.machine,
                summary.reading_count.unwrap_or(0),
                latest.as_ref(),
            ));
        }
        Ok(format!(
            "{}\n\n--- All Machines Summary ---\n{}",
            message,
            summaries.join("\n")
        ))
    }
}

fn fmt_time(t: &DateTime<Utc>) -> String {
    t.format("%Y-%m-%d %H:%M UTC").to_string()
}

fn failure_flag(predicted: bool) -> &'static str {
    if predicted {
        "YES ⚠️"
    } else {
        "NO ✅"
    }
}

fn format_machine_block(
    machine: &Machine,
    reading_count: i64,
    prediction_count: i64,
    predictions: &[Prediction],
    readings: &[SensorReading],
) -> String {
    // ---
    let mut lines = vec![
        format!("=== Machine {} Data ===", machine.product_id),
        "Basic Info:".to_string(),
        format!("- Type: {}", machine.machine_type),
        format!("- Status: {}", machine.status),
        format!("- Location: {}", machine.location.as_deref().unwrap_or("N/A")),
        format!("- Registered: {}", fmt_time(&machine.created_at)),
        String::new(),
        "Statistics:".to_string(),
        format!("- Total Sensor Readings: {}", reading_count),
        format!("- Total Predictions: {}", prediction_count),
        String::new(),
    ];

    match predictions.first() {
        Some(p) => {
            lines.push(format!("Latest Prediction ({}):", fmt_time(&p.predicted_at)));
            lines.push(format!("- Risk Score: {:.3}", p.risk_score));
            lines.push(format!("- Failure Predicted: {}", failure_flag(p.failure_predicted)));
            lines.push(format!(
                "- Failure Type: {}",
                p.failure_type.as_deref().unwrap_or("None")
            ));
            lines.push(format!(
                "- Confidence: {}",
                p.confidence
                    .map_or("N/A".to_string(), |c| format!("{:.1}%", c * 100.0))
            ));
            lines.push(format!(
                "- Predicted Failure Time: {}",
                p.predicted_failure_time
                    .as_ref()
                    .map_or("N/A".to_string(), fmt_time)
            ));
            lines.push(String::new());

            let avg_risk =
                predictions.iter().map(|p| p.risk_score).sum::<f64>() / predictions.len() as f64;
            let failures = predictions.iter().filter(|p| p.failure_predicted).count();
            lines.push(format!("Recent Predictions (Last {}):", RECENT_PREDICTIONS));
            lines.push(format!("- Average Risk Score: {:.3}", avg_risk));
            lines.push(format!(
                "- Failures Predicted: {}/{}",
                failures,
                predictions.len()
            ));
        }
        None => lines.push("No predictions available".to_string()),
    }
    lines.push(String::new());

    let avg = |values: Vec<f64>| summarize(values).map_or(0.0, |s| s.avg);
    if readings.is_empty() {
        lines.push("No sensor data available".to_string());
    } else {
        lines.push(format!(
            "Latest Sensor Readings (Average of last {}):",
            RECENT_READINGS
        ));
        lines.push(format!(
            "- Air Temperature: {:.1} K",
            avg(readings.iter().map(|r| r.air_temp).collect())
        ));
        lines.push(format!(
            "- Process Temperature: {:.1} K",
            avg(readings.iter().map(|r| r.process_temp).collect())
        ));
        lines.push(format!(
            "- Rotational Speed: {:.0} RPM",
            avg(readings.iter().map(|r| r.rotational_speed as f64).collect())
        ));
        lines.push(format!(
            "- Torque: {:.1} Nm",
            avg(readings.iter().map(|r| r.torque).collect())
        ));
        lines.push(format!(
            "- Tool Wear: {:.0} minutes",
            avg(readings.iter().map(|r| r.tool_wear as f64).collect())
        ));
    }

    lines.join("\n")
}

fn format_machine_summary(
    machine: &Machine,
    reading_count: i64,
    latest: Option<&Prediction>,
) -> String {
    // ---
    [
        format!("{} ({}):", machine.product_id, machine.machine_type),
        format!("- Status: {}", machine.status),
        format!("- Location: {}", machine.location.as_deref().unwrap_or("N/A")),
        format!(
            "- Risk Score: {}",
            latest.map_or("N/A".to_string(), |p| format!("{:.3}", p.risk_score))
        ),
        format!(
            "- Failure Predicted: {}",
            failure_flag(latest.is_some_and(|p| p.failure_predicted))
        ),
        format!("- Total Readings: {}", reading_count),
    ]
    .join("\n")
}
