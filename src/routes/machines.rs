//! Machine registry endpoints. Bodies are the bare entities.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tracing::debug;

use super::AppState;
use crate::error::{AppError, Result};
use crate::models::{CreateMachineRequest, Machine, MachineDetails, MachineSummary};
use crate::services::parse_machine_id;

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/machines", get(list).post(create))
        .route("/machines/{id}", get(get_one).delete(remove))
        .route("/machines/{id}/stats", get(stats))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListQuery {
    include_stats: Option<String>,
}

impl ListQuery {
    /// Only the literal `true` turns counts on; any other value means off.
    fn include_stats(&self) -> bool {
        self.include_stats.as_deref() == Some("true")
    }
}

async fn create(
    State(state): State<AppState>,
    body: std::result::Result<Json<CreateMachineRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Machine>)> {
    // ---
    let Json(req) = body.map_err(|e| AppError::validation("body", e.body_text()))?;
    let machine = state.machines.create(req).await?;
    Ok((StatusCode::CREATED, Json(machine)))
}

async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<MachineSummary>>> {
    // ---
    let include_stats = query.include_stats();
    let machines = state.machines.list(include_stats).await?;
    debug!(count = machines.len(), include_stats, "Listed machines");
    Ok(Json(machines))
}

async fn get_one(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Machine>> {
    let id = parse_machine_id(&id)?;
    Ok(Json(state.machines.get(id).await?))
}

async fn stats(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MachineDetails>> {
    let id = parse_machine_id(&id)?;
    Ok(Json(state.machines.get_with_stats(id).await?))
}

async fn remove(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Machine>> {
    let id = parse_machine_id(&id)?;
    Ok(Json(state.machines.remove(id).await?))
}
