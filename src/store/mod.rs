//! Storage gateway for machines, readings, predictions and chat history.
//!
//! The services only talk to the [`Store`] trait. [`PgStore`] is the
//! production backend; [`MemoryStore`] mirrors its uniqueness and
//! foreign-key rules for tests and local runs without PostgreSQL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    ChatMessage, Conversation, CreateMachineRequest, Machine, MachineSummary, MessageRole,
    NewConversation, NewReading, Prediction, ReadingWithMachine, SensorReading,
};

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

// ---

/// Persistent storage used by the registry, ingestion and chat services.
///
/// Implementations report duplicate product ids and deletes blocked by
/// existing readings as [`crate::error::AppError::Conflict`].
#[async_trait]
pub trait Store: Send + Sync {
    // ---
    /// Insert a new machine.
    async fn insert_machine(&self, req: &CreateMachineRequest) -> Result<Machine>;

    /// All machines ordered by product id, optionally with reading counts.
    async fn list_machines(&self, with_counts: bool) -> Result<Vec<MachineSummary>>;

    async fn get_machine(&self, id: Uuid) -> Result<Option<Machine>>;

    async fn find_machine_by_product_id(&self, product_id: &str) -> Result<Option<Machine>>;

    /// Delete a machine. Returns `false` if it did not exist.
    async fn delete_machine(&self, id: Uuid) -> Result<bool>;

    async fn count_readings(&self, machine_id: Uuid) -> Result<i64>;

    async fn count_predictions(&self, machine_id: Uuid) -> Result<i64>;

    /// Persist a reading; the timestamp defaults to now.
    async fn insert_reading(&self, reading: &NewReading) -> Result<SensorReading>;

    /// Newest-first readings joined with their machine.
    async fn list_readings(
        &self,
        machine_id: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<ReadingWithMachine>>;

    /// Newest-first readings of one machine.
    async fn recent_readings(&self, machine_id: Uuid, limit: i64) -> Result<Vec<SensorReading>>;

    /// Readings of one machine with `timestamp >= since`, newest first.
    async fn readings_since(
        &self,
        machine_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<SensorReading>>;

    /// Newest-first predictions of one machine.
    async fn recent_predictions(&self, machine_id: Uuid, limit: i64) -> Result<Vec<Prediction>>;

    /// Start an empty conversation. An unknown machine is `NotFound`.
    async fn insert_conversation(&self, new: &NewConversation) -> Result<Conversation>;

    async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>>;

    /// Most recently active first; conversations without messages last.
    async fn list_conversations(
        &self,
        machine_id: Option<Uuid>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Conversation>>;

    /// Delete a conversation and its messages. Returns `false` if it did not exist.
    async fn delete_conversation(&self, id: Uuid) -> Result<bool>;

    /// Append a message and bump the conversation's counters.
    async fn append_message(
        &self,
        conversation_id: Uuid,
        role: MessageRole,
        content: &str,
    ) -> Result<ChatMessage>;

    /// The last `limit` messages of a conversation, oldest first.
    async fn recent_messages(&self, conversation_id: Uuid, limit: i64) -> Result<Vec<ChatMessage>>;

    /// Every message of a conversation, oldest first.
    async fn conversation_messages(&self, conversation_id: Uuid) -> Result<Vec<ChatMessage>>;
}
