//! Hint catalog CRUD and search.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use refinery_types::Hint;

use crate::error::ApiError;
use crate::state::AppState;

pub(super) async fn upsert(
    State(state): State<Arc<AppState>>,
    Json(hint): Json<Hint>,
) -> Result<Json<Hint>, ApiError> {
    Ok(Json(state.store.upsert_hint(hint).await?))
}

pub(super) async fn get_by_id(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Hint>, ApiError> {
    Ok(Json(state.store.get_hint(&id).await?))
}

pub(super) async fn list(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Hint>>, ApiError> {
    Ok(Json(state.store.list_hints().await?))
}

pub(super) async fn delete_by_id(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.store.delete_hint(&id).await?;
    Ok(Json(serde_json::json!({ "deleted": id })))
}

#[derive(Deserialize)]
pub(super) struct SearchParams {
    q: String,
}

pub(super) async fn search(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<Hint>>, ApiError> {
    if params.q.is_empty() {
        return Err(ApiError::BadRequest("q is required".to_string()));
    }
    Ok(Json(state.store.search_hints(&params.q).await?))
}
