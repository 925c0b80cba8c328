//! Worker liveness reports.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub worker_id: String,
    #[serde(default)]
    pub run_id: String,
    #[serde(default)]
    pub active_builds: usize,
    #[serde(default)]
    pub build_pool_size: usize,
    #[serde(default)]
    pub plan_pool_size: usize,
    #[serde(default)]
    pub interval_sec: u64,
}
