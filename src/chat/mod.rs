//! Maintenance chat assistant backed by a hosted language model.
//!
//! Every exchange is stored: a message without `conversationId` starts a new
//! conversation, and the last [`HISTORY_LIMIT`] stored messages of an
//! existing one are replayed to the model.

mod context;
mod gemini;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::{ChatMessage, Conversation, Machine, MessageRole};
use crate::services::{
    parse_conversation_id, parse_machine_id, ConversationService, MachineRegistry,
};
use crate::store::Store;

pub use context::{mentioned_product_ids, ContextAssembler};
pub use gemini::{build_payload, extract_reply, GeminiClient, LanguageModel, ModelTurn, Role};

/// Longest accepted user message, in characters.
pub const MESSAGE_MAX_CHARS: usize = 1000;
/// Stored messages replayed to the model.
pub const HISTORY_LIMIT: usize = 10;

pub const SYSTEM_PROMPT: &str = r#"You are an expert AI assistant for Predictive Maintenance system. Your role is to:

1. Monitor and analyze machine conditions
2. Provide insights about sensor readings and predictions
3. Alert users about potential failures
4. Recommend maintenance actions
5. Answer questions about machine health and history

Response Guidelines:
- Be concise and professional
- Use technical terminology appropriately
- Provide actionable insights
- Cite specific data when available
- Alert users about high-risk situations
- Format responses in a clear, easy-to-read manner
- Use markdown formatting for better readability

When analyzing machines:
- Risk Score ≥ 0.7 = HIGH RISK (immediate attention needed) ⚠️
- Risk Score 0.4-0.7 = MODERATE RISK (schedule maintenance) ⚡
- Risk Score < 0.4 = LOW RISK (normal operation) ✅

Machine Types:
- L (Low quality variant) - Lower performance, more prone to tool wear
- M (Medium quality variant) - Balanced performance
- H (High quality variant) - Higher performance, more stable

Failure Types:
- Heat Dissipation Failure - Overheating issues
- Power Failure - Electrical system issues
- Overstrain Failure - Excessive load or stress
- Tool Wear Failure - Tool degradation over time
- Random Failures - Unpredictable failures

When given Context Data about machines, use that information to provide accurate insights."#;

// ---

/// Body of `POST /chat`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    // ---
    pub message: String,
    /// Continue this conversation; absent starts a new one.
    pub conversation_id: Option<String>,
    /// Pin the context to this machine.
    pub machine_id: Option<String>,
}

impl ChatRequest {
    // ---
    pub fn validate(&self) -> Result<()> {
        if self.message.trim().is_empty() {
            return Err(AppError::validation("message", "must not be empty"));
        }
        if self.message.chars().count() > MESSAGE_MAX_CHARS {
            return Err(AppError::validation(
                "message",
                format!("must be at most {} characters", MESSAGE_MAX_CHARS),
            ));
        }
        Ok(())
    }
}

/// Reply to `POST /chat`: the conversation after the exchange plus both
/// stored messages.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatExchange {
    // ---
    pub conversation: Conversation,
    pub message: ChatMessage,
    pub ai_response: ChatMessage,
}

fn to_model_turn(message: &ChatMessage) -> Option<ModelTurn> {
    let role = match message.role {
        MessageRole::User => Role::User,
        MessageRole::Assistant => Role::Model,
        MessageRole::System => return None,
    };
    Some(ModelTurn {
        role,
        text: message.content.clone(),
    })
}

pub struct ChatAssistant {
    model: Arc<dyn LanguageModel>,
    context: ContextAssembler,
    conversations: ConversationService,
    machines: MachineRegistry,
}

impl ChatAssistant {
    // ---
    pub fn new(model: Arc<dyn LanguageModel>, store: Arc<dyn Store>) -> Self {
        Self {
            model,
            context: ContextAssembler::new(store.clone()),
            conversations: ConversationService::new(store.clone()),
            machines: MachineRegistry::new(store),
        }
    }

    /// Gemini-backed assistant, or a `Configuration` error when no API key is set.
    pub fn from_config(config: &Config, store: Arc<dyn Store>) -> Result<Self> {
        // ---
        let api_key = config.gemini_api_key.clone().ok_or_else(|| {
            AppError::Configuration("Chat assistant is not configured: GEMINI_API_KEY is missing".into())
        })?;
        let client = GeminiClient::new(
            api_key,
            config.gemini_model.clone(),
            config.gemini_endpoint.clone(),
            config.gemini_timeout,
        )?;
        Ok(Self::new(Arc::new(client), store))
    }

    /// Answer a message and store the exchange.
    ///
    /// Nothing is stored when the model call fails.
    pub async fn reply(&self, req: ChatRequest) -> Result<ChatExchange> {
        // ---
        req.validate()?;
        let conversation_id = req
            .conversation_id
            .as_deref()
            .map(parse_conversation_id)
            .transpose()?;
        let machine_id = req.machine_id.as_deref().map(parse_machine_id).transpose()?;

        let existing = match conversation_id {
            Some(id) => Some(self.conversations.find(id).await?),
            None => None,
        };

        // The request's machine wins over the one the conversation started with
        let pinned: Option<Machine> =
            match machine_id.or(existing.as_ref().and_then(|c| c.machine_id)) {
                Some(id) => Some(self.machines.get(id).await?),
                None => None,
            };

        let preview: String = req.message.chars().take(50).collect();
        info!(
            message = %preview,
            conversation_id = ?conversation_id,
            machine = ?pinned.as_ref().map(|m| m.product_id.as_str()),
            "Processing chat message"
        );

        let mut turns: Vec<ModelTurn> = match &existing {
            Some(conversation) => self
                .conversations
                .history(conversation.id, HISTORY_LIMIT)
                .await?
                .iter()
                .filter_map(to_model_turn)
                .collect(),
            None => Vec::new(),
        };
        turns.push(ModelTurn {
            role: Role::User,
            text: self.context.enrich(&req.message, pinned.as_ref()).await,
        });

        let reply = self.model.generate(SYSTEM_PROMPT, &turns).await?;
        info!(chars = reply.len(), "Chat response generated");

        let conversation_id = match existing {
            Some(conversation) => conversation.id,
            None => self.conversations.start(&req.message, machine_id).await?.id,
        };
        let message = self
            .conversations
            .append(conversation_id, MessageRole::User, &req.message)
            .await?;
        let ai_response = self
            .conversations
            .append(conversation_id, MessageRole::Assistant, &reply)
            .await?;

        Ok(ChatExchange {
            conversation: self.conversations.find(conversation_id).await?,
            message,
            ai_response,
        })
    }
}
