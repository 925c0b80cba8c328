//! The planner loop: pop pending-input ids from the plan queue, plan, and
//! hand the snapshot to the control plane (which seeds builds).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use refinery_client::ControlPlane;
use refinery_planner::Planner;
use refinery_queue::PlanQueue;

use crate::config::WorkerConfig;
use crate::plan_cache::PlanCache;

/// An id popped twice inside this window is skipped: pops are idempotent
/// across restarts as long as the marker is kept this long.
const IN_FLIGHT_WINDOW: Duration = Duration::from_secs(600);

pub(crate) struct PlannerLoop {
    pub(crate) config: WorkerConfig,
    pub(crate) client: Option<ControlPlane>,
    pub(crate) plan_queue: Option<PlanQueue>,
    pub(crate) planner: Arc<Planner>,
    pub(crate) plan_cache: Arc<PlanCache>,
}

impl PlannerLoop {
    pub(crate) async fn run(self, cancel: CancellationToken) {
        let Some(plan_queue) = &self.plan_queue else {
            tracing::info!("no plan queue configured; planner loop idle");
            return;
        };
        let mut in_flight: HashMap<i64, Instant> = HashMap::new();
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::info!("planner loop stopping");
                    return;
                }
                _ = ticker.tick() => {}
            }

            let ids = match plan_queue.pop(self.config.plan_pool_size).await {
                Ok(ids) => ids,
                Err(err) => {
                    tracing::warn!("plan queue pop failed: {err}");
                    continue;
                }
            };

            in_flight.retain(|_, seen| seen.elapsed() < IN_FLIGHT_WINDOW);
            for id in ids {
                if in_flight.contains_key(&id) {
                    tracing::debug!("input {id} already in flight, skipping");
                    continue;
                }
                in_flight.insert(id, Instant::now());
                self.plan_one(id).await;
            }
        }
    }

    #[tracing::instrument(skip(self))]
    async fn plan_one(&self, id: i64) {
        let requirements =
            match fs_err::read_to_string(self.config.input_dir.join("requirements.txt")) {
                Ok(contents) => Some(contents),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
                Err(err) => {
                    self.mark(id, "failed").await;
                    tracing::error!("failed to read requirements for input {id}: {err}");
                    return;
                }
            };
        let constraints =
            fs_err::read_to_string(self.config.input_dir.join("constraints.txt")).ok();

        let snapshot = match self
            .planner
            .plan(
                requirements.as_deref(),
                constraints.as_deref(),
                self.config.wheel_dir.as_deref(),
            )
            .await
        {
            Ok(snapshot) => snapshot,
            Err(err) => {
                tracing::error!("planning input {id} failed: {err}");
                self.mark(id, "failed").await;
                return;
            }
        };

        self.plan_cache.set(snapshot.clone()).await;

        let Some(client) = &self.client else {
            tracing::info!(run_id = %snapshot.run_id, "planned locally (no control plane)");
            return;
        };
        match client.save_plan(&snapshot).await {
            Ok(saved) => {
                tracing::info!(
                    plan_id = saved.id,
                    seeded = saved.seeded,
                    run_id = %snapshot.run_id,
                    "plan persisted"
                );
                self.mark(id, "planned").await;
                if saved.seeded > 0 {
                    self.mark(id, "build_queued").await;
                }
            }
            Err(err) => {
                tracing::error!("saving plan for input {id} failed: {err}");
                self.mark(id, "failed").await;
            }
        }
    }

    async fn mark(&self, id: i64, status: &str) {
        if let Some(client) = &self.client {
            if let Err(err) = client.mark_pending(id, status).await {
                tracing::warn!("marking input {id} as {status} failed: {err}");
            }
        }
    }
}
