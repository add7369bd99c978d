// src/routes/health.rs
//! Liveness endpoint.
//!
//! `GET /health` answers without touching the database so orchestrators can
//! poll it cheaply. It also reports the realtime bridge state and the number
//! of live subscribers, which is the only way to see from outside whether
//! live events are flowing.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use super::AppState;
use crate::realtime::BridgeState;

/// JSON response body for the `/health` endpoint.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    realtime: BridgeState,
    subscribers: usize,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        realtime: *state.realtime.borrow(),
        subscribers: state.hub.subscriber_count(),
    })
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}
