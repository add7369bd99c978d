//! Chat conversation history: listing, lookup, deletion and the writes made
//! by the chat assistant.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{
    ChatMessage, Conversation, ConversationDetails, MessageRole, NewConversation,
};
use crate::store::Store;

pub const DEFAULT_CONVERSATION_LIMIT: i64 = 20;
pub const MAX_CONVERSATION_LIMIT: i64 = 100;

/// Longest conversation title, in characters, before it is cut.
pub const TITLE_MAX_CHARS: usize = 50;

// ---

/// Filter and page of `GET /chat/conversations`.
#[derive(Debug, Clone, Default)]
pub struct ConversationQuery {
    // ---
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub machine_id: Option<Uuid>,
}

#[derive(Clone)]
pub struct ConversationService {
    store: Arc<dyn Store>,
}

impl ConversationService {
    // ---
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Most recently active conversations first.
    pub async fn list(&self, query: ConversationQuery) -> Result<Vec<Conversation>> {
        // ---
        let limit = query.limit.unwrap_or(DEFAULT_CONVERSATION_LIMIT);
        if !(1..=MAX_CONVERSATION_LIMIT).contains(&limit) {
            return Err(AppError::validation(
                "limit",
                format!("must be between 1 and {}", MAX_CONVERSATION_LIMIT),
            ));
        }
        let offset = query.offset.unwrap_or(0);
        if offset < 0 {
            return Err(AppError::validation("offset", "must not be negative"));
        }

        self.store
            .list_conversations(query.machine_id, limit, offset)
            .await
    }

    pub async fn find(&self, id: Uuid) -> Result<Conversation> {
        self.store
            .get_conversation(id)
            .await?
            .ok_or_else(|| AppError::conversation_not_found(id))
    }

    /// Conversation with every message, oldest first.
    pub async fn get(&self, id: Uuid) -> Result<ConversationDetails> {
        // ---
        let conversation = self.find(id).await?;
        let messages = self.store.conversation_messages(id).await?;
        Ok(ConversationDetails {
            conversation,
            messages,
        })
    }

    /// Delete a conversation and its messages; returns the deleted record.
    pub async fn remove(&self, id: Uuid) -> Result<Conversation> {
        // ---
        let conversation = self.find(id).await?;
        if !self.store.delete_conversation(id).await? {
            return Err(AppError::conversation_not_found(id));
        }
        info!(conversation_id = %id, "Conversation deleted");
        Ok(conversation)
    }

    /// Start a conversation titled after its first message.
    pub async fn start(&self, first_message: &str, machine_id: Option<Uuid>) -> Result<Conversation> {
        // ---
        let conversation = self
            .store
            .insert_conversation(&NewConversation {
                title: conversation_title(first_message),
                machine_id,
            })
            .await?;
        info!(
            conversation_id = %conversation.id,
            machine_id = ?conversation.machine_id,
            "Conversation started"
        );
        Ok(conversation)
    }

    /// The last `limit` messages, oldest first.
    pub async fn history(&self, id: Uuid, limit: usize) -> Result<Vec<ChatMessage>> {
        self.store.recent_messages(id, limit as i64).await
    }

    pub async fn append(&self, id: Uuid, role: MessageRole, content: &str) -> Result<ChatMessage> {
        self.store.append_message(id, role, content).await
    }
}

/// First line of the message, cut to [`TITLE_MAX_CHARS`] with an ellipsis.
pub fn conversation_title(message: &str) -> String {
    // ---
    let line = message.trim().lines().next().unwrap_or_default().trim();
    if line.chars().count() <= TITLE_MAX_CHARS {
        return line.to_string();
    }
    let cut: String = line.chars().take(TITLE_MAX_CHARS).collect();
    format!("{}...", cut.trim_end())
}

/// Parse a conversation id supplied by a client.
pub fn parse_conversation_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw.trim())
        .map_err(|_| AppError::validation("conversationId", "must be a valid UUID"))
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::store::MemoryStore;
    use tokio_test::{assert_err, assert_ok};

    fn service() -> ConversationService {
        ConversationService::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn test_title_from_first_line() {
        // ---
        assert_eq!(conversation_title("  How is M14860?  "), "How is M14860?");
        assert_eq!(conversation_title("Status\nplease add details"), "Status");

        let long = "a".repeat(TITLE_MAX_CHARS + 10);
        let title = conversation_title(&long);
        assert_eq!(title.chars().count(), TITLE_MAX_CHARS + 3);
        assert!(title.ends_with("..."));
    }

    #[test]
    fn test_parse_conversation_id() {
        // ---
        assert!(parse_conversation_id("0315a637-b0f9-4498-9303-4844504a12f1").is_ok());
        let err = parse_conversation_id("nope").unwrap_err();
        assert!(matches!(err, AppError::Validation(ref e) if e[0].field == "conversationId"));
    }

    #[tokio::test]
    async fn test_list_limit_bounds() {
        // ---
        let svc = service();
        assert_ok!(svc.list(ConversationQuery::default()).await);

        for limit in [0, MAX_CONVERSATION_LIMIT + 1] {
            let err = assert_err!(
                svc.list(ConversationQuery {
                    limit: Some(limit),
                    ..Default::default()
                })
                .await
            );
            assert!(matches!(err, AppError::Validation(_)));
        }

        let err = assert_err!(
            svc.list(ConversationQuery {
                offset: Some(-1),
                ..Default::default()
            })
            .await
        );
        assert!(matches!(err, AppError::Validation(ref e) if e[0].field == "offset"));
    }

    #[tokio::test]
    async fn test_get_and_remove() {
        // ---
        let svc = service();
        let conversation = svc.start("Check tool wear", None).await.unwrap();
        svc.append(conversation.id, MessageRole::User, "Check tool wear")
            .await
            .unwrap();

        let details = svc.get(conversation.id).await.unwrap();
        assert_eq!(details.conversation.title, "Check tool wear");
        assert_eq!(details.conversation.total_messages, 1);
        assert_eq!(details.messages.len(), 1);

        let removed = svc.remove(conversation.id).await.unwrap();
        assert_eq!(removed.id, conversation.id);
        assert!(matches!(
            svc.get(conversation.id).await,
            Err(AppError::NotFound { entity: "Conversation", .. })
        ));
        assert!(matches!(
            svc.remove(conversation.id).await,
            Err(AppError::NotFound { .. })
        ));
    }
}
