//! In-memory store for development and testing.
//!
//! Mirrors the PostgreSQL constraints (unique product id, readings keep their
//! machine alive) and publishes the same change-feed payload that the
//! `sensor_readings` trigger emits, so the realtime bridge can run on top of
//! it unchanged.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use super::Store;
use crate::error::{AppError, Result};
use crate::models::{
    ChatMessage, Conversation, CreateMachineRequest, Machine, MachineSummary, MessageRole,
    NewConversation, NewReading, Prediction, ReadingWithMachine, SensorReading,
};

/// Capacity of the in-process change feed.
const FEED_CAPACITY: usize = 1024;

// ---

#[derive(Debug)]
pub struct MemoryStore {
    // ---
    machines: Arc<RwLock<HashMap<Uuid, Machine>>>,
    readings: Arc<RwLock<Vec<SensorReading>>>,
    predictions: Arc<RwLock<Vec<Prediction>>>,
    conversations: Arc<RwLock<HashMap<Uuid, Conversation>>>,
    /// Append order is message order.
    messages: Arc<RwLock<Vec<ChatMessage>>>,
    reading_seq: Arc<AtomicI64>,
    prediction_seq: Arc<AtomicI64>,
    feed: broadcast::Sender<String>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    // ---
    pub fn new() -> Self {
        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            machines: Arc::new(RwLock::new(HashMap::new())),
            readings: Arc::new(RwLock::new(Vec::new())),
            predictions: Arc::new(RwLock::new(Vec::new())),
            conversations: Arc::new(RwLock::new(HashMap::new())),
            messages: Arc::new(RwLock::new(Vec::new())),
            reading_seq: Arc::new(AtomicI64::new(0)),
            prediction_seq: Arc::new(AtomicI64::new(0)),
            feed,
        }
    }

    /// Subscribe to insert notifications on readings.
    pub fn change_feed(&self) -> broadcast::Receiver<String> {
        self.feed.subscribe()
    }

    /// Record a prediction as the external model job would.
    pub async fn insert_prediction(&self, mut prediction: Prediction) -> Prediction {
        // ---
        prediction.id = self.prediction_seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.predictions.write().await.push(prediction.clone());
        prediction
    }

    fn publish(&self, operation: &str, reading: &SensorReading) {
        // ---
        let payload = json!({
            "operation": operation,
            "table": "sensor_readings",
            "record": {
                "id": reading.id,
                "machine_id": reading.machine_id,
                "recorded_at": reading.timestamp,
                "air_temp": reading.air_temp,
                "process_temp": reading.process_temp,
                "rotational_speed": reading.rotational_speed,
                "torque": reading.torque,
                "tool_wear": reading.tool_wear,
            }
        });
        // No subscribers is fine.
        let _ = self.feed.send(payload.to_string());
    }
}

/// Newest first; ties broken by id so insertion order is stable.
fn newest_first(a: &SensorReading, b: &SensorReading) -> std::cmp::Ordering {
    b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id))
}

#[async_trait]
impl Store for MemoryStore {
    // ---
    async fn insert_machine(&self, req: &CreateMachineRequest) -> Result<Machine> {
        // ---
        let mut machines = self.machines.write().await;
        if machines.values().any(|m| m.product_id == req.product_id) {
            return Err(AppError::Conflict(format!(
                "Machine with product ID {} already exists",
                req.product_id
            )));
        }

        let machine = Machine {
            id: Uuid::new_v4(),
            product_id: req.product_id.clone(),
            machine_type: req.machine_type,
            status: "active".to_string(),
            location: None,
            created_at: Utc::now(),
        };
        machines.insert(machine.id, machine.clone());
        Ok(machine)
    }

    async fn list_machines(&self, with_counts: bool) -> Result<Vec<MachineSummary>> {
        // ---
        let machines = self.machines.read().await;
        let readings = self.readings.read().await;

        let mut list: Vec<MachineSummary> = machines
            .values()
            .map(|m| MachineSummary {
                machine: m.clone(),
                reading_count: with_counts.then(|| {
                    readings.iter().filter(|r| r.machine_id == m.id).count() as i64
                }),
            })
            .collect();
        list.sort_by(|a, b| a.machine.product_id.cmp(&b.machine.product_id));
        Ok(list)
    }

    async fn get_machine(&self, id: Uuid) -> Result<Option<Machine>> {
        Ok(self.machines.read().await.get(&id).cloned())
    }

    async fn find_machine_by_product_id(&self, product_id: &str) -> Result<Option<Machine>> {
        let machines = self.machines.read().await;
        Ok(machines.values().find(|m| m.product_id == product_id).cloned())
    }

    async fn delete_machine(&self, id: Uuid) -> Result<bool> {
        // ---
        let mut machines = self.machines.write().await;
        if !machines.contains_key(&id) {
            return Ok(false);
        }
        let referenced = self.readings.read().await.iter().any(|r| r.machine_id == id);
        if referenced {
            return Err(AppError::Conflict(format!(
                "Machine {} still has sensor readings and cannot be deleted",
                id
            )));
        }
        machines.remove(&id);

        // Conversations outlive their machine (ON DELETE SET NULL)
        for conversation in self.conversations.write().await.values_mut() {
            if conversation.machine_id == Some(id) {
                conversation.machine_id = None;
            }
        }
        Ok(true)
    }

    async fn count_readings(&self, machine_id: Uuid) -> Result<i64> {
        let readings = self.readings.read().await;
        Ok(readings.iter().filter(|r| r.machine_id == machine_id).count() as i64)
    }

    async fn count_predictions(&self, machine_id: Uuid) -> Result<i64> {
        let predictions = self.predictions.read().await;
        Ok(predictions
            .iter()
            .filter(|p| p.machine_id == machine_id)
            .count() as i64)
    }

    async fn insert_reading(&self, new: &NewReading) -> Result<SensorReading> {
        // ---
        // Held until the push so a concurrent delete cannot orphan the reading.
        let machines = self.machines.read().await;
        if !machines.contains_key(&new.machine_id) {
            return Err(AppError::machine_not_found(new.machine_id));
        }

        let m = new.measurements;
        let reading = SensorReading {
            id: self.reading_seq.fetch_add(1, Ordering::SeqCst) + 1,
            machine_id: new.machine_id,
            timestamp: new.timestamp.unwrap_or_else(Utc::now),
            air_temp: m.air_temp,
            process_temp: m.process_temp,
            rotational_speed: m.rotational_speed,
            torque: m.torque,
            tool_wear: m.tool_wear,
        };
        self.readings.write().await.push(reading.clone());
        drop(machines);

        self.publish("INSERT", &reading);
        Ok(reading)
    }

    async fn list_readings(
        &self,
        machine_id: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<ReadingWithMachine>> {
        // ---
        let machines = self.machines.read().await;
        let readings = self.readings.read().await;

        let mut selected: Vec<&SensorReading> = readings
            .iter()
            .filter(|r| machine_id.map_or(true, |id| r.machine_id == id))
            .collect();
        selected.sort_by(|a, b| newest_first(a, b));

        Ok(selected
            .into_iter()
            .take(limit.max(0) as usize)
            .filter_map(|r| {
                machines.get(&r.machine_id).map(|m| ReadingWithMachine {
                    reading: r.clone(),
                    machine: m.clone(),
                })
            })
            .collect())
    }

    async fn recent_readings(&self, machine_id: Uuid, limit: i64) -> Result<Vec<SensorReading>> {
        // ---
        let readings = self.readings.read().await;
        let mut selected: Vec<SensorReading> = readings
            .iter()
            .filter(|r| r.machine_id == machine_id)
            .cloned()
            .collect();
        selected.sort_by(newest_first);
        selected.truncate(limit.max(0) as usize);
        Ok(selected)
    }

    async fn readings_since(
        &self,
        machine_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<SensorReading>> {
        // ---
        let readings = self.readings.read().await;
        let mut selected: Vec<SensorReading> = readings
            .iter()
            .filter(|r| r.machine_id == machine_id && r.timestamp >= since)
            .cloned()
            .collect();
        selected.sort_by(newest_first);
        Ok(selected)
    }

    async fn recent_predictions(&self, machine_id: Uuid, limit: i64) -> Result<Vec<Prediction>> {
        // ---
        let predictions = self.predictions.read().await;
        let mut selected: Vec<Prediction> = predictions
            .iter()
            .filter(|p| p.machine_id == machine_id)
            .cloned()
            .collect();
        selected.sort_by(|a, b| b.predicted_at.cmp(&a.predicted_at).then(b.id.cmp(&a.id)));
        selected.truncate(limit.max(0) as usize);
        Ok(selected)
    }

    async fn insert_conversation(&self, new: &NewConversation) -> Result<Conversation> {
        // ---
        // Held until the insert, as in `insert_reading`
        let machines = self.machines.read().await;
        if let Some(machine_id) = new.machine_id {
            if !machines.contains_key(&machine_id) {
                return Err(AppError::machine_not_found(machine_id));
            }
        }

        let conversation = Conversation {
            id: Uuid::new_v4(),
            title: new.title.clone(),
            machine_id: new.machine_id,
            total_messages: 0,
            last_message_at: None,
            created_at: Utc::now(),
        };
        self.conversations
            .write()
            .await
            .insert(conversation.id, conversation.clone());
        drop(machines);
        Ok(conversation)
    }

    async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>> {
        Ok(self.conversations.read().await.get(&id).cloned())
    }

    async fn list_conversations(
        &self,
        machine_id: Option<Uuid>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Conversation>> {
        // ---
        let conversations = self.conversations.read().await;
        let mut selected: Vec<Conversation> = conversations
            .values()
            .filter(|c| machine_id.map_or(true, |id| c.machine_id == Some(id)))
            .cloned()
            .collect();

        // `None` sorts before `Some`, so reversing puts idle conversations last
        selected.sort_by(|a, b| {
            b.last_message_at
                .cmp(&a.last_message_at)
                .then(b.created_at.cmp(&a.created_at))
        });
        Ok(selected
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn delete_conversation(&self, id: Uuid) -> Result<bool> {
        // ---
        if self.conversations.write().await.remove(&id).is_none() {
            return Ok(false);
        }
        self.messages
            .write()
            .await
            .retain(|m| m.conversation_id != id);
        Ok(true)
    }

    async fn append_message(
        &self,
        conversation_id: Uuid,
        role: MessageRole,
        content: &str,
    ) -> Result<ChatMessage> {
        // ---
        let mut conversations = self.conversations.write().await;
        let conversation = conversations
            .get_mut(&conversation_id)
            .ok_or_else(|| AppError::conversation_not_found(conversation_id))?;

        let message = ChatMessage {
            id: Uuid::new_v4(),
            conversation_id,
            role,
            content: content.to_string(),
            created_at: Utc::now(),
        };
        conversation.total_messages += 1;
        conversation.last_message_at = Some(message.created_at);
        self.messages.write().await.push(message.clone());
        Ok(message)
    }

    async fn recent_messages(&self, conversation_id: Uuid, limit: i64) -> Result<Vec<ChatMessage>> {
        // ---
        let mut selected = self.conversation_messages(conversation_id).await?;
        let skip = selected.len().saturating_sub(limit.max(0) as usize);
        Ok(selected.split_off(skip))
    }

    async fn conversation_messages(&self, conversation_id: Uuid) -> Result<Vec<ChatMessage>> {
        // ---
        let messages = self.messages.read().await;
        Ok(messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect())
    }
}
