//! Build-status leasing and completion reports, plus the manifest view.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use refinery_types::{BuildOutcome, BuildRequest, BuildRow, ManifestEntry};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Deserialize)]
pub(super) struct PopBody {
    #[serde(default = "default_max")]
    max: i64,
}

fn default_max() -> i64 {
    1
}

/// Lease up to `max` rows and hand them out as queue-shaped requests.
pub(super) async fn pop(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PopBody>,
) -> Result<Json<Vec<BuildRequest>>, ApiError> {
    if body.max <= 0 {
        return Err(ApiError::BadRequest("max must be positive".to_string()));
    }
    let leased = state.store.lease_builds(body.max).await?;
    let requests = leased
        .into_iter()
        .map(|row| BuildRequest {
            name: row.package,
            version: row.version,
            python_version: String::new(),
            python_tag: row.python_tag,
            platform_tag: row.platform_tag,
            recipes: row.recipes,
            attempts: row.attempts,
            enqueued_at: Some(row.created_at),
        })
        .collect();
    Ok(Json(requests))
}

#[derive(Deserialize)]
pub(super) struct ReportBody {
    package: String,
    version: String,
    #[serde(flatten)]
    outcome: BuildOutcome,
}

pub(super) async fn report(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ReportBody>,
) -> Result<Json<BuildRow>, ApiError> {
    if body.package.is_empty() || body.version.is_empty() {
        return Err(ApiError::BadRequest(
            "package and version are required".to_string(),
        ));
    }
    let row = state
        .store
        .report_build(
            &body.package,
            &body.version,
            &body.outcome,
            state.config.max_attempts,
        )
        .await?;
    Ok(Json(row))
}

#[derive(Deserialize)]
pub(super) struct ListParams {
    #[serde(default = "default_list_limit")]
    limit: i64,
}

fn default_list_limit() -> i64 {
    100
}

pub(super) async fn list(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<BuildRow>>, ApiError> {
    Ok(Json(state.store.list_builds(params.limit).await?))
}

pub(super) async fn manifest(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ManifestEntry>>, ApiError> {
    Ok(Json(state.store.list_manifest().await?))
}

pub(super) async fn upsert_manifest(
    State(state): State<Arc<AppState>>,
    Json(entry): Json<ManifestEntry>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if entry.name.is_empty() || entry.version.is_empty() {
        return Err(ApiError::BadRequest(
            "name and version are required".to_string(),
        ));
    }
    state.store.upsert_manifest_entry(&entry).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}
