//! Plan persistence endpoints and the compute proxy.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use refinery_types::PlanSnapshot;

use crate::error::ApiError;
use crate::state::AppState;

/// Save a snapshot. Build rows for every build-labeled node are seeded in
/// the same transaction; the response carries the new id and seed count.
pub(super) async fn save(
    State(state): State<Arc<AppState>>,
    Json(snapshot): Json<PlanSnapshot>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if snapshot.run_id.is_empty() {
        return Err(ApiError::BadRequest("run_id is required".to_string()));
    }
    let saved = state.store.save_plan(&snapshot).await?;
    Ok(Json(serde_json::json!({
        "id": saved.id,
        "seeded": saved.seeded,
    })))
}

pub(super) async fn latest(
    State(state): State<Arc<AppState>>,
) -> Result<Json<PlanSnapshot>, ApiError> {
    Ok(Json(state.store.latest_plan().await?))
}

pub(super) async fn get_by_id(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<PlanSnapshot>, ApiError> {
    Ok(Json(state.store.get_plan(id).await?))
}

#[derive(Deserialize)]
pub(super) struct ListParams {
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_limit() -> i64 {
    20
}

pub(super) async fn list(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<PlanSnapshot>>, ApiError> {
    Ok(Json(state.store.list_plans(params.limit).await?))
}

pub(super) async fn delete_by_id(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.store.delete_plan(id).await?;
    Ok(Json(serde_json::json!({ "deleted": id })))
}

#[derive(Deserialize)]
pub(super) struct ComputeBody {
    worker_url: String,
    #[serde(default)]
    request: serde_json::Value,
}

/// Proxy a plan computation to a worker, persist the result, seed builds.
pub(super) async fn compute(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ComputeBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if body.worker_url.is_empty() {
        return Err(ApiError::BadRequest("worker_url is required".to_string()));
    }
    let url = format!("{}/plan", body.worker_url.trim_end_matches('/'));
    let client = reqwest::Client::new();
    let mut request = client.post(&url).json(&body.request);
    if let Some(token) = &state.config.token {
        request = request.bearer_auth(token);
    }
    let response = request
        .send()
        .await
        .map_err(|err| ApiError::Unavailable(format!("worker unreachable: {err}")))?;
    if !response.status().is_success() {
        return Err(ApiError::Unavailable(format!(
            "worker plan endpoint returned {}",
            response.status()
        )));
    }
    let snapshot: PlanSnapshot = response
        .json()
        .await
        .map_err(|err| ApiError::Internal(format!("worker returned a malformed plan: {err}")))?;

    let saved = state.store.save_plan(&snapshot).await?;
    Ok(Json(serde_json::json!({
        "id": saved.id,
        "seeded": saved.seeded,
        "run_id": snapshot.run_id,
    })))
}
