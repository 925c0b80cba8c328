//! Shared application state.

use tokio_util::sync::CancellationToken;

use refinery_cas::ObjectStore;
use refinery_queue::{BuildQueue, PlanQueue};
use refinery_store::Store;

use crate::config::ServerConfig;
use crate::loghub::LogHub;

pub(crate) struct AppState {
    pub(crate) store: Store,
    pub(crate) queue: BuildQueue,
    pub(crate) plan_queue: Option<PlanQueue>,
    pub(crate) objects: ObjectStore,
    pub(crate) log_hub: LogHub,
    pub(crate) cancel: CancellationToken,
    pub(crate) config: ServerConfig,
}

impl AppState {
    pub(crate) fn plan_queue(&self) -> Result<&PlanQueue, refinery_queue::QueueError> {
        self.plan_queue
            .as_ref()
            .ok_or_else(PlanQueue::not_configured)
    }
}
