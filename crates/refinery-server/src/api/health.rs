//! Readiness, metrics, and public configuration.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use chrono::Utc;

use crate::error::ApiError;
use crate::state::AppState;

pub(super) async fn healthz(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .store
        .ping()
        .await
        .map_err(|err| ApiError::Unavailable(format!("store unreachable: {err}")))?;
    state
        .queue
        .stats()
        .await
        .map_err(|err| ApiError::Unavailable(format!("queue unreachable: {err}")))?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

pub(super) async fn metrics(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let store_ok = state.store.ping().await.is_ok();
    let stats = state.queue.stats().await?;
    let oldest_age_sec = stats
        .oldest_enqueued_at
        .map(|oldest| (Utc::now() - oldest).num_seconds().max(0));
    Ok(Json(serde_json::json!({
        "queue_backend": stats.backend,
        "queue_length": stats.length,
        "queue_oldest_age_sec": oldest_age_sec,
        "store_ok": store_ok,
    })))
}

pub(super) async fn config(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(state.config.public_view(state.queue.backend()))
}
