//! Requirements upload: digest, object-store write, pending-input row, and
//! (when auto-plan is on) the hand-off to the plan queue.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use refinery_types::PendingStatus;

use crate::error::ApiError;
use crate::state::AppState;

const CANONICAL_FILENAME: &str = "requirements.txt";

#[derive(Deserialize)]
pub(super) struct UploadParams {
    filename: Option<String>,
}

pub(super) async fn upload(
    State(state): State<Arc<AppState>>,
    Query(params): Query<UploadParams>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    if body.is_empty() {
        return Err(ApiError::BadRequest("empty upload".to_string()));
    }
    if body.len() > state.config.upload_limit {
        return Err(ApiError::TooLarge);
    }

    let filename = params
        .filename
        .filter(|name| !name.is_empty() && !name.contains('/'))
        .unwrap_or_else(|| CANONICAL_FILENAME.to_string());
    let digest = refinery_artifact::sha256_bytes(&body);
    let short = &digest["sha256:".len().."sha256:".len() + 12];

    // Immutable per-upload object plus a canonical overwrite of the
    // well-known name.
    let (stem, extension) = match filename.rsplit_once('.') {
        Some((stem, extension)) => (stem, extension),
        None => (filename.as_str(), "txt"),
    };
    let immutable_key = format!("inputs/{stem}-{short}.{extension}");
    let canonical_key = format!("inputs/{CANONICAL_FILENAME}");

    for key in [&immutable_key, &canonical_key] {
        if let Err(err) = state
            .objects
            .put(key, body.to_vec(), "text/plain; charset=utf-8")
            .await
        {
            tracing::warn!("object store write for {key} failed: {err}");
        }
    }

    let bucket = state
        .config
        .s3
        .as_ref()
        .map(|s3| s3.bucket.clone())
        .unwrap_or_default();
    let size = i64::try_from(body.len()).unwrap_or(i64::MAX);
    let mut pending = state
        .store
        .insert_pending(
            &filename,
            &digest,
            size,
            "upload",
            &bucket,
            &immutable_key,
            "text/plain",
        )
        .await?;

    let settings = state.store.get_settings().await?;
    let mut planned = false;
    if settings.auto_plan_enabled() {
        match state.plan_queue() {
            Ok(queue) => {
                queue.enqueue(pending.id).await?;
                pending = state
                    .store
                    .mark_pending(pending.id, PendingStatus::Planning, None)
                    .await?;
                planned = true;
            }
            Err(err) => tracing::warn!("auto-plan skipped: {err}"),
        }
    }

    Ok(Json(serde_json::json!({
        "id": pending.id,
        "digest": digest,
        "status": pending.status,
        "key": immutable_key,
        "auto_planned": planned,
    })))
}
