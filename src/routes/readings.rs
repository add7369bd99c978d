//! Sensor ingestion and query endpoints.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tracing::debug;

use super::{ApiResponse, AppState};
use crate::error::{AppError, Result};
use crate::models::{CreateReadingRequest, ReadingWithMachine};
use crate::services::parse_machine_id;
use crate::stats::ReadingStatistics;

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/sensors/readings", get(list).post(record))
        .route("/sensors/readings/latest", get(latest))
        .route("/sensors/statistics", get(statistics))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReadingsQuery {
    machine_id: Option<String>,
    limit: Option<i64>,
    hours: Option<i64>,
}

type QueryResult = std::result::Result<Query<ReadingsQuery>, QueryRejection>;

fn query_params(query: QueryResult) -> Result<ReadingsQuery> {
    query
        .map(|Query(q)| q)
        .map_err(|e| AppError::validation("query", e.body_text()))
}

fn required_machine_id(q: &ReadingsQuery) -> Result<uuid::Uuid> {
    match q.machine_id.as_deref() {
        Some(raw) => parse_machine_id(raw),
        None => Err(AppError::validation("machineId", "is required")),
    }
}

async fn record(
    State(state): State<AppState>,
    body: std::result::Result<Json<CreateReadingRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ApiResponse<ReadingWithMachine>>)> {
    // ---
    let Json(req) = body.map_err(|e| AppError::validation("body", e.body_text()))?;
    let saved = state.sensors.record(req).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok(saved).with_message("Sensor reading recorded successfully")),
    ))
}

async fn list(
    State(state): State<AppState>,
    query: QueryResult,
) -> Result<Json<ApiResponse<Vec<ReadingWithMachine>>>> {
    // ---
    let q = query_params(query)?;
    let machine_id = q.machine_id.as_deref().map(parse_machine_id).transpose()?;
    let readings = state.sensors.list(machine_id, q.limit).await?;
    Ok(Json(ApiResponse::list(readings)))
}

async fn latest(
    State(state): State<AppState>,
    query: QueryResult,
) -> Result<Json<ApiResponse<Option<ReadingWithMachine>>>> {
    // ---
    let machine_id = required_machine_id(&query_params(query)?)?;
    let reading = state.sensors.latest(machine_id).await?;
    debug!(%machine_id, found = reading.is_some(), "Latest reading lookup");
    Ok(Json(ApiResponse::ok(reading)))
}

async fn statistics(
    State(state): State<AppState>,
    query: QueryResult,
) -> Result<Json<ApiResponse<Option<ReadingStatistics>>>> {
    // ---
    let q = query_params(query)?;
    let machine_id = required_machine_id(&q)?;
    let stats = state.sensors.statistics(machine_id, q.hours).await?;
    Ok(Json(ApiResponse::ok(stats)))
}
