//! Build-request queue control.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Deserialize;

use refinery_queue::QueueStats;
use refinery_types::BuildRequest;

use crate::error::ApiError;
use crate::state::AppState;

pub(super) async fn list(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<BuildRequest>>, ApiError> {
    Ok(Json(state.queue.list().await?))
}

pub(super) async fn stats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<QueueStats>, ApiError> {
    Ok(Json(state.queue.stats().await?))
}

pub(super) async fn enqueue(
    State(state): State<Arc<AppState>>,
    Json(request): Json<BuildRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if request.name.is_empty() {
        return Err(ApiError::BadRequest("name is required".to_string()));
    }
    state.queue.enqueue(request).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

/// Clear the queue. The kafka backend cannot and reports its capability
/// error as a 500 the caller must tolerate.
pub(super) async fn clear(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.queue.clear().await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

#[derive(Deserialize)]
pub(super) struct PopBody {
    #[serde(default = "default_max")]
    max: usize,
}

fn default_max() -> usize {
    1
}

pub(super) async fn pop(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PopBody>,
) -> Result<Json<Vec<BuildRequest>>, ApiError> {
    if body.max == 0 {
        return Err(ApiError::BadRequest("max must be positive".to_string()));
    }
    Ok(Json(state.queue.pop(body.max, &state.cancel).await?))
}
