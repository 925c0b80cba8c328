//! Route table. Mutating routes sit behind the token guard; reads are open.

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;

use refinery_types::MAX_LOG_BYTES;

use crate::auth;
use crate::state::AppState;

mod builds;
mod events;
mod health;
mod hints;
mod inputs;
mod logs;
mod plans;
mod queue;
mod uploads;
mod worker;

pub(crate) fn router(state: Arc<AppState>) -> Router {
    let open = Router::new()
        .route("/api/healthz", get(health::healthz))
        .route("/api/metrics", get(health::metrics))
        .route("/api/config", get(health::config))
        .route("/api/inputs", get(inputs::list))
        .route("/api/plans", get(plans::list))
        .route("/api/plans/latest", get(plans::latest))
        .route("/api/plans/:id", get(plans::get_by_id))
        .route("/api/events", get(events::list))
        .route("/api/hints", get(hints::list))
        .route("/api/hints/search", get(hints::search))
        .route("/api/hints/:id", get(hints::get_by_id))
        .route("/api/queue", get(queue::list))
        .route("/api/queue/stats", get(queue::stats))
        .route("/api/builds", get(builds::list))
        .route("/api/logs/search", get(logs::search))
        .route("/api/logs/stream", get(logs::stream))
        .route("/api/logs/:name/:version", get(logs::get_by_name))
        .route("/api/settings", get(worker::get_settings))
        .route("/api/heartbeats", get(worker::list_heartbeats))
        .route("/api/manifest", get(builds::manifest));

    let guarded = Router::new()
        .route("/api/requirements", post(uploads::upload))
        .route("/api/inputs/pop", post(inputs::pop))
        .route("/api/inputs/:id/status", post(inputs::mark))
        .route("/api/inputs/:id/restore", post(inputs::restore))
        .route("/api/inputs/:id/enqueue", post(inputs::enqueue))
        .route("/api/inputs/:id", delete(inputs::soft_delete))
        .route("/api/plans", post(plans::save))
        .route("/api/plans/compute", post(plans::compute))
        .route("/api/plans/:id", delete(plans::delete_by_id))
        .route("/api/events", post(events::append))
        .route("/api/hints", post(hints::upsert))
        .route("/api/hints/:id", delete(hints::delete_by_id))
        .route("/api/queue", post(queue::enqueue))
        .route("/api/queue/clear", post(queue::clear))
        .route("/api/queue/pop", post(queue::pop))
        .route("/api/builds/pop", post(builds::pop))
        .route("/api/builds/report", post(builds::report))
        .route("/api/manifest", post(builds::upsert_manifest))
        .route("/api/worker/trigger", post(worker::trigger))
        .route("/api/logs", post(logs::ingest))
        .route("/api/heartbeat", post(worker::heartbeat))
        .route("/api/settings", post(worker::put_settings))
        .layer(middleware::from_fn_with_state(state.clone(), auth::guard));

    let body_limit = state.config.upload_limit.max(2 * MAX_LOG_BYTES);
    open.merge(guarded)
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}
