//! Worker-facing endpoints: trigger, heartbeat, settings.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use refinery_types::{Heartbeat, Settings};

use crate::error::ApiError;
use crate::state::AppState;

/// Kick the worker fleet: POST the configured webhook and/or run the
/// configured local command, then report the queue length.
pub(super) async fn trigger(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let webhook = match &state.config.worker_webhook {
        Some(url) => {
            let client = reqwest::Client::new();
            let mut request = client.post(url);
            if let Some(token) = &state.config.token {
                request = request.bearer_auth(token);
            }
            match request.send().await {
                Ok(response) => Some(serde_json::json!({
                    "url": url,
                    "status": response.status().as_u16(),
                })),
                Err(err) => Some(serde_json::json!({
                    "url": url,
                    "error": err.to_string(),
                })),
            }
        }
        None => None,
    };

    let command = match &state.config.worker_command {
        Some(command_line) => {
            let output = tokio::process::Command::new("sh")
                .arg("-c")
                .arg(command_line)
                .output()
                .await;
            match output {
                Ok(output) => {
                    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
                    combined.push_str(&String::from_utf8_lossy(&output.stderr));
                    Some(serde_json::json!({
                        "success": output.status.success(),
                        "output": combined,
                    }))
                }
                Err(err) => Some(serde_json::json!({ "error": err.to_string() })),
            }
        }
        None => None,
    };

    let queue_length = state.queue.stats().await.map(|stats| stats.length).ok();
    Ok(Json(serde_json::json!({
        "webhook": webhook,
        "command": command,
        "queue_length": queue_length,
    })))
}

pub(super) async fn heartbeat(
    State(state): State<Arc<AppState>>,
    Json(beat): Json<Heartbeat>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if beat.worker_id.is_empty() {
        return Err(ApiError::BadRequest("worker_id is required".to_string()));
    }
    state.store.record_heartbeat(&beat).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

pub(super) async fn list_heartbeats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Heartbeat>>, ApiError> {
    Ok(Json(state.store.list_heartbeats().await?))
}

pub(super) async fn get_settings(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Settings>, ApiError> {
    Ok(Json(state.store.get_settings().await?))
}

pub(super) async fn put_settings(
    State(state): State<Arc<AppState>>,
    Json(settings): Json<Settings>,
) -> Result<Json<Settings>, ApiError> {
    state.store.put_settings(&settings).await?;
    Ok(Json(settings.apply_defaults()))
}
