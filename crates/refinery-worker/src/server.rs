//! The worker's own HTTP surface: trigger a drain, read or compute a plan.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use refinery_planner::Planner;
use refinery_types::PlanSnapshot;

use crate::drain::Drain;
use crate::plan_cache::PlanCache;

pub(crate) struct WorkerState {
    pub(crate) drain: Arc<Drain>,
    pub(crate) plan_cache: Arc<PlanCache>,
    pub(crate) planner: Arc<Planner>,
    pub(crate) token: Option<String>,
}

pub(crate) fn router(state: Arc<WorkerState>) -> Router {
    let guarded = Router::new()
        .route("/trigger", post(trigger))
        .route("/plan", post(compute_plan))
        .layer(middleware::from_fn_with_state(state.clone(), guard));
    Router::new()
        .route("/plan", get(get_plan))
        .route("/healthz", get(healthz))
        .merge(guarded)
        .with_state(state)
}

async fn guard(
    State(state): State<Arc<WorkerState>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = &state.token else {
        return next.run(request).await;
    };
    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.strip_prefix("Bearer ").unwrap_or(value).trim());
    if presented == Some(expected.as_str()) {
        next.run(request).await
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": "missing or invalid token" })),
        )
            .into_response()
    }
}

async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true }))
}

/// Run one drain and report the summary.
async fn trigger(State(state): State<Arc<WorkerState>>) -> Response {
    match state.drain.drain_once().await {
        Ok(summary) => Json(summary).into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": err.to_string() })),
        )
            .into_response(),
    }
}

/// The cached plan snapshot, if any drain or computation has produced one.
async fn get_plan(State(state): State<Arc<WorkerState>>) -> Response {
    match state.plan_cache.get().await {
        Some(snapshot) => Json(snapshot).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "no plan loaded" })),
        )
            .into_response(),
    }
}

#[derive(Deserialize, Default)]
struct ComputeRequest {
    #[serde(default)]
    requirements: Option<String>,
    #[serde(default)]
    constraints: Option<String>,
}

/// Compute a plan from a posted requirements body (or the local inputs when
/// the body is empty), cache it, and return it.
async fn compute_plan(
    State(state): State<Arc<WorkerState>>,
    body: Option<Json<ComputeRequest>>,
) -> Response {
    let request = body.map(|Json(request)| request).unwrap_or_default();
    let result: Result<PlanSnapshot, String> = if request.requirements.is_some() {
        state
            .planner
            .plan(
                request.requirements.as_deref(),
                request.constraints.as_deref(),
                None,
            )
            .await
            .map_err(|err| err.to_string())
    } else {
        state
            .plan_cache
            .load(&state.planner)
            .await
            .map_err(|err| err.to_string())
    };
    match result {
        Ok(snapshot) => {
            state.plan_cache.set(snapshot.clone()).await;
            Json(snapshot).into_response()
        }
        Err(message) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": message })),
        )
            .into_response(),
    }
}
