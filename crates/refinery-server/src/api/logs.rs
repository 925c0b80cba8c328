//! Log ingest, retrieval, search, and the single-event stream.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use refinery_types::LogEntry;

use crate::error::ApiError;
use crate::state::AppState;

const STREAM_WAIT: Duration = Duration::from_secs(10);

pub(super) async fn ingest(
    State(state): State<Arc<AppState>>,
    Json(entry): Json<LogEntry>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if entry.name.is_empty() {
        return Err(ApiError::BadRequest("name is required".to_string()));
    }
    if entry.oversized() {
        return Err(ApiError::TooLarge);
    }
    state.store.put_log(&entry).await?;
    state.log_hub.publish(entry);
    Ok(Json(serde_json::json!({ "ok": true })))
}

pub(super) async fn get_by_name(
    State(state): State<Arc<AppState>>,
    Path((name, version)): Path<(String, String)>,
) -> Result<Json<LogEntry>, ApiError> {
    Ok(Json(state.store.get_log(&name, &version).await?))
}

#[derive(Deserialize)]
pub(super) struct SearchParams {
    q: String,
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_limit() -> i64 {
    20
}

pub(super) async fn search(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<LogEntry>>, ApiError> {
    if params.q.is_empty() {
        return Err(ApiError::BadRequest("q is required".to_string()));
    }
    Ok(Json(state.store.search_logs(&params.q, params.limit).await?))
}

/// Deliver the next published log entry as one event. Long-polling stands in
/// for a streaming transport for now; an empty set means nothing arrived
/// within the window.
pub(super) async fn stream(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut receiver = state.log_hub.subscribe();
    let events = match tokio::time::timeout(STREAM_WAIT, receiver.recv()).await {
        Ok(Ok(entry)) => vec![entry],
        Ok(Err(_)) | Err(_) => Vec::new(),
    };
    Ok(Json(serde_json::json!({ "events": events })))
}
