//! Event ingest and filtered history reads.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;

use refinery_types::{Event, EventFilter};

use crate::error::ApiError;
use crate::state::AppState;

pub(super) async fn append(
    State(state): State<Arc<AppState>>,
    Json(event): Json<Event>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if event.name.is_empty() {
        return Err(ApiError::BadRequest("name is required".to_string()));
    }
    if event.status.is_empty() {
        return Err(ApiError::BadRequest("status is required".to_string()));
    }
    state.store.append_event(&event).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

pub(super) async fn list(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<EventFilter>,
) -> Result<Json<Vec<Event>>, ApiError> {
    Ok(Json(state.store.list_events(&filter).await?))
}
