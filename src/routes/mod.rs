//! Route gateway: merges the per-resource subrouters and applies the shared
//! HTTP layers.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use serde::Serialize;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::chat::ChatAssistant;
use crate::realtime::{BridgeState, Hub};
use crate::services::{ConversationService, MachineRegistry, SensorService};
use crate::store::Store;

mod chat;
mod health;
mod machines;
mod readings;
mod ws;

// ---

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    // ---
    pub machines: MachineRegistry,
    pub sensors: SensorService,
    pub conversations: ConversationService,
    /// `None` when no model credentials are configured.
    pub chat: Option<Arc<ChatAssistant>>,
    pub hub: Hub,
    pub realtime: watch::Receiver<BridgeState>,
}

impl AppState {
    // ---
    pub fn new(
        store: Arc<dyn Store>,
        hub: Hub,
        realtime: watch::Receiver<BridgeState>,
        chat: Option<Arc<ChatAssistant>>,
    ) -> Self {
        let machines = MachineRegistry::new(store.clone());
        Self {
            conversations: ConversationService::new(store.clone()),
            sensors: SensorService::new(store, machines.clone()),
            machines,
            chat,
            hub,
            realtime,
        }
    }
}

/// `{success, data, count?, message?}` body used by the sensor endpoints.
#[derive(Debug, Serialize)]
pub(crate) struct ApiResponse<T> {
    // ---
    success: bool,
    data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'static str>,
}

impl<T> ApiResponse<T> {
    pub(crate) fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
            count: None,
            message: None,
        }
    }

    pub(crate) fn with_message(mut self, message: &'static str) -> Self {
        self.message = Some(message);
        self
    }
}

impl<T> ApiResponse<Vec<T>> {
    pub(crate) fn list(data: Vec<T>) -> Self {
        let count = data.len();
        Self {
            count: Some(count),
            ..Self::ok(data)
        }
    }
}

pub fn router(state: AppState, request_timeout: Duration) -> Router {
    // ---
    Router::new()
        .merge(machines::router())
        .merge(readings::router())
        .merge(ws::router())
        .merge(chat::router())
        .merge(health::router())
        .layer(TimeoutLayer::new(request_timeout))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
