//! Change-feed sources and the payload boundary.
//!
//! Notifications arrive as `{operation, table, record}` JSON where `record`
//! is the raw `sensor_readings` row with snake_case column names. They are
//! decoded into [`ChangeRecord`] and validated with the same range policy as
//! the HTTP ingestion path before anything reaches subscribers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::postgres::PgListener;
use tokio::sync::broadcast;
use tracing::warn;
use uuid::Uuid;

use crate::error::FieldError;
use crate::models::{RawMeasurements, SensorReading};

const READINGS_TABLE: &str = "sensor_readings";

// ---

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    // ---
    #[error("Malformed change payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Change for unexpected table '{0}'")]
    UnexpectedTable(String),

    #[error("Change payload out of range: {}", .0.iter().map(|e| e.field).collect::<Vec<_>>().join(", "))]
    Invalid(Vec<FieldError>),

    #[error("Change feed connection error: {0}")]
    Connection(#[from] sqlx::Error),

    #[error("Change feed closed")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeOperation {
    Insert,
    Update,
}

/// Row image carried by a notification.
///
/// Column → field mapping:
///
/// | column             | field              |
/// |--------------------|--------------------|
/// | `id`               | `id`               |
/// | `machine_id`       | `machine_id`       |
/// | `recorded_at`      | `timestamp`        |
/// | `air_temp`         | `air_temp`         |
/// | `process_temp`     | `process_temp`     |
/// | `rotational_speed` | `rotational_speed` |
/// | `torque`           | `torque`           |
/// | `tool_wear`        | `tool_wear`        |
#[derive(Debug, Clone, Deserialize)]
pub struct ChangeRecord {
    // ---
    #[serde(rename = "id")]
    pub id: i64,
    #[serde(rename = "machine_id")]
    pub machine_id: Uuid,
    #[serde(rename = "recorded_at")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "air_temp")]
    pub air_temp: f64,
    #[serde(rename = "process_temp")]
    pub process_temp: f64,
    #[serde(rename = "rotational_speed")]
    pub rotational_speed: f64,
    #[serde(rename = "torque")]
    pub torque: f64,
    #[serde(rename = "tool_wear")]
    pub tool_wear: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChangePayload {
    // ---
    pub operation: ChangeOperation,
    #[serde(default)]
    pub table: Option<String>,
    pub record: ChangeRecord,
}

impl ChangePayload {
    // ---
    pub fn decode(payload: &str) -> Result<Self, FeedError> {
        // ---
        let change: ChangePayload = serde_json::from_str(payload)?;
        match change.table.as_deref() {
            None | Some(READINGS_TABLE) => Ok(change),
            Some(other) => Err(FeedError::UnexpectedTable(other.to_string())),
        }
    }

    /// Validate the row image into a typed reading.
    pub fn into_reading(self) -> Result<SensorReading, FeedError> {
        // ---
        let r = self.record;
        let m = RawMeasurements {
            air_temp: r.air_temp,
            process_temp: r.process_temp,
            rotational_speed: r.rotational_speed,
            torque: r.torque,
            tool_wear: r.tool_wear,
        }
        .validate()
        .map_err(FeedError::Invalid)?;

        Ok(SensorReading {
            id: r.id,
            machine_id: r.machine_id,
            timestamp: r.timestamp,
            air_temp: m.air_temp,
            process_temp: m.process_temp,
            rotational_speed: m.rotational_speed,
            torque: m.torque,
            tool_wear: m.tool_wear,
        })
    }
}

/// A subscribed change feed.
#[async_trait]
pub trait ChangeFeed: Send {
    /// Wait for the next notification payload.
    ///
    /// `Ok(None)` means the connection dropped and the next call reconnects.
    /// `Err(FeedError::Closed)` is terminal.
    async fn recv(&mut self) -> Result<Option<String>, FeedError>;
}

/// PostgreSQL `LISTEN` on the channel fed by the `sensor_readings` trigger.
pub struct PgFeed {
    listener: PgListener,
}

impl PgFeed {
    // ---
    pub async fn connect(url: &str, channel: &str) -> Result<Self, FeedError> {
        let mut listener = PgListener::connect(url).await?;
        listener.listen(channel).await?;
        Ok(Self { listener })
    }
}

#[async_trait]
impl ChangeFeed for PgFeed {
    async fn recv(&mut self) -> Result<Option<String>, FeedError> {
        Ok(self
            .listener
            .try_recv()
            .await?
            .map(|n| n.payload().to_string()))
    }
}

/// In-process feed published by [`crate::store::MemoryStore`].
pub struct MemoryFeed {
    rx: broadcast::Receiver<String>,
}

impl MemoryFeed {
    pub fn new(rx: broadcast::Receiver<String>) -> Self {
        Self { rx }
    }
}

#[async_trait]
impl ChangeFeed for MemoryFeed {
    async fn recv(&mut self) -> Result<Option<String>, FeedError> {
        // ---
        loop {
            match self.rx.recv().await {
                Ok(payload) => return Ok(Some(payload)),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "Change feed lagged; oldest notifications dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return Err(FeedError::Closed),
            }
        }
    }
}

/// Where the bridge gets its notifications from.
pub enum FeedSource {
    /// Connect and `LISTEN` when the bridge opens.
    Postgres { url: String, channel: String },
    /// An already subscribed feed.
    Subscribed(Box<dyn ChangeFeed>),
}

impl FeedSource {
    // ---
    pub async fn subscribe(self) -> Result<Box<dyn ChangeFeed>, FeedError> {
        match self {
            FeedSource::Postgres { url, channel } => {
                Ok(Box::new(PgFeed::connect(&url, &channel).await?))
            }
            FeedSource::Subscribed(feed) => Ok(feed),
        }
    }
}
