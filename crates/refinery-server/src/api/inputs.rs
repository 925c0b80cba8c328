//! Pending-input management.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use refinery_types::{PendingInput, PendingStatus};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Deserialize)]
pub(super) struct ListParams {
    status: Option<String>,
}

pub(super) async fn list(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<PendingInput>>, ApiError> {
    let status = params
        .status
        .map(|status| {
            status
                .parse::<PendingStatus>()
                .map_err(ApiError::BadRequest)
        })
        .transpose()?;
    Ok(Json(state.store.list_pending(status).await?))
}

#[derive(Deserialize)]
pub(super) struct MarkBody {
    status: String,
    #[serde(default)]
    error: Option<String>,
}

pub(super) async fn mark(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(body): Json<MarkBody>,
) -> Result<Json<PendingInput>, ApiError> {
    let status = body
        .status
        .parse::<PendingStatus>()
        .map_err(ApiError::BadRequest)?;
    let row = state
        .store
        .mark_pending(id, status, body.error.as_deref())
        .await?;
    Ok(Json(row))
}

pub(super) async fn soft_delete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.store.soft_delete_pending(id).await?;
    Ok(Json(serde_json::json!({ "deleted": id })))
}

pub(super) async fn restore(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<PendingInput>, ApiError> {
    Ok(Json(state.store.restore_pending(id).await?))
}

/// Manually hand one input to the planner.
pub(super) async fn enqueue(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<PendingInput>, ApiError> {
    // Confirm the row exists before queueing its id.
    let _ = state.store.get_pending(id).await?;
    state.plan_queue()?.enqueue(id).await?;
    let row = state
        .store
        .mark_pending(id, PendingStatus::Planning, None)
        .await?;
    Ok(Json(row))
}

#[derive(Deserialize)]
pub(super) struct PopBody {
    #[serde(default = "default_pop_max")]
    max: i64,
}

fn default_pop_max() -> i64 {
    10
}

pub(super) async fn pop(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PopBody>,
) -> Result<Json<Vec<PendingInput>>, ApiError> {
    if body.max <= 0 {
        return Err(ApiError::BadRequest("max must be positive".to_string()));
    }
    Ok(Json(state.store.pop_pending_bulk(body.max).await?))
}
