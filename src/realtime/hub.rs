//! Fan-out of sensor events to live subscribers.
//!
//! The hub wraps a bounded `tokio::sync::broadcast` ring. Every subscriber
//! keeps its own cursor; one that falls more than `capacity` events behind
//! loses the oldest ones and is told how many it missed.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::models::SensorReading;

pub const READING_CHANNEL: &str = "sensor-reading";
pub const ANOMALY_CHANNEL: &str = "sensor-anomaly";

// ---

/// A reading together with the thresholds it breached.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalyReport {
    // ---
    #[serde(flatten)]
    pub reading: SensorReading,
    pub anomalies: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EventData {
    Reading(SensorReading),
    Anomaly(AnomalyReport),
}

/// One frame delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    // ---
    pub channel: &'static str,
    pub event: &'static str,
    pub data: EventData,
    pub timestamp: DateTime<Utc>,
}

impl Envelope {
    // ---
    pub fn new_reading(reading: SensorReading) -> Self {
        Envelope {
            channel: READING_CHANNEL,
            event: "new-reading",
            data: EventData::Reading(reading),
            timestamp: Utc::now(),
        }
    }

    pub fn anomaly(reading: SensorReading, anomalies: Vec<String>) -> Self {
        Envelope {
            channel: ANOMALY_CHANNEL,
            event: "anomaly-detected",
            data: EventData::Anomaly(AnomalyReport { reading, anomalies }),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Hub {
    tx: broadcast::Sender<Envelope>,
}

impl Hub {
    // ---
    /// Create a hub buffering at most `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }

    /// Broadcast to every subscriber; returns how many received it.
    pub fn publish(&self, envelope: Envelope) -> usize {
        // No subscribers is fine.
        self.tx.send(envelope).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
