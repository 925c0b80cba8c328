//! Periodic liveness reports. Strictly best-effort: a failed POST changes
//! nothing about the worker's state.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use refinery_client::ControlPlane;
use refinery_types::Heartbeat;

use crate::config::WorkerConfig;

pub(crate) async fn run(
    config: WorkerConfig,
    client: Option<ControlPlane>,
    active: Arc<AtomicUsize>,
    cancel: CancellationToken,
) {
    let Some(client) = client else {
        return;
    };
    let worker_id = WorkerConfig::worker_id();
    let mut ticker = tokio::time::interval(config.heartbeat_interval);
    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }
        let beat = Heartbeat {
            worker_id: worker_id.clone(),
            run_id: String::new(),
            active_builds: active.load(Ordering::Relaxed),
            build_pool_size: config.build_pool_size,
            plan_pool_size: config.plan_pool_size,
            interval_sec: config.heartbeat_interval.as_secs(),
        };
        if let Err(err) = client.heartbeat(&beat).await {
            tracing::debug!("heartbeat failed: {err}");
        }
    }
}
