//! Chat endpoints: ask the maintenance assistant and browse stored
//! conversations.
//!
//! Browsing works without model credentials; only `POST /chat` needs them.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tracing::debug;

use super::AppState;
use crate::chat::{ChatExchange, ChatRequest};
use crate::error::{AppError, Result};
use crate::models::{Conversation, ConversationDetails};
use crate::services::{parse_conversation_id, parse_machine_id, ConversationQuery};

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/chat", post(chat))
        .route("/chat/conversations", get(list_conversations))
        .route(
            "/chat/conversations/{id}",
            get(get_conversation).delete(delete_conversation),
        )
}

async fn chat(
    State(state): State<AppState>,
    body: std::result::Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatExchange>> {
    // ---
    let assistant = state.chat.as_ref().ok_or_else(|| {
        AppError::Configuration("Chat assistant is not configured".to_string())
    })?;
    let Json(req) = body.map_err(|e| AppError::validation("body", e.body_text()))?;
    Ok(Json(assistant.reply(req).await?))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConversationsQuery {
    limit: Option<i64>,
    offset: Option<i64>,
    machine_id: Option<String>,
}

async fn list_conversations(
    State(state): State<AppState>,
    query: std::result::Result<Query<ConversationsQuery>, QueryRejection>,
) -> Result<Json<Vec<Conversation>>> {
    // ---
    let Query(query) = query.map_err(|e| AppError::validation("query", e.body_text()))?;
    let machine_id = query.machine_id.as_deref().map(parse_machine_id).transpose()?;

    let conversations = state
        .conversations
        .list(ConversationQuery {
            limit: query.limit,
            offset: query.offset,
            machine_id,
        })
        .await?;
    debug!(count = conversations.len(), "Listed conversations");
    Ok(Json(conversations))
}

async fn get_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ConversationDetails>> {
    let id = parse_conversation_id(&id)?;
    Ok(Json(state.conversations.get(id).await?))
}

async fn delete_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Conversation>> {
    let id = parse_conversation_id(&id)?;
    Ok(Json(state.conversations.remove(id).await?))
}
