//! Per-worker plan snapshot cache.
//!
//! Load order: the output-dir plan file, then the cache-dir plan file, then
//! synthesis through the planner. Whatever loads is kept in memory under a
//! mutex and reused by every drain until replaced.

use std::path::{Path, PathBuf};

use tokio::sync::Mutex;

use refinery_planner::Planner;
use refinery_types::PlanSnapshot;

use crate::config::WorkerConfig;

const PLAN_FILENAME: &str = "plan.json";

pub(crate) struct PlanCache {
    output_path: PathBuf,
    cache_path: PathBuf,
    input_dir: PathBuf,
    wheel_dir: Option<PathBuf>,
    cached: Mutex<Option<PlanSnapshot>>,
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum PlanCacheError {
    #[error("failed to read plan file {0}")]
    Io(String, #[source] std::io::Error),
    #[error("plan file {0} is malformed")]
    Malformed(String, #[source] serde_json::Error),
    #[error(transparent)]
    Planner(#[from] refinery_planner::PlannerError),
}

impl PlanCache {
    pub(crate) fn new(config: &WorkerConfig) -> Self {
        Self {
            output_path: config.output_dir.join(PLAN_FILENAME),
            cache_path: config.cache_dir.join(PLAN_FILENAME),
            input_dir: config.input_dir.clone(),
            wheel_dir: config.wheel_dir.clone(),
            cached: Mutex::new(None),
        }
    }

    /// Current snapshot without loading.
    pub(crate) async fn get(&self) -> Option<PlanSnapshot> {
        self.cached.lock().await.clone()
    }

    /// Replace the snapshot (e.g. a worker-side plan computation).
    pub(crate) async fn set(&self, snapshot: PlanSnapshot) {
        *self.cached.lock().await = Some(snapshot);
    }

    /// Load the plan, synthesizing one from the local inputs when no plan
    /// file exists yet.
    pub(crate) async fn load(&self, planner: &Planner) -> Result<PlanSnapshot, PlanCacheError> {
        let mut cached = self.cached.lock().await;
        if let Some(snapshot) = cached.as_ref() {
            return Ok(snapshot.clone());
        }

        for path in [&self.output_path, &self.cache_path] {
            if let Some(snapshot) = read_plan_file(path)? {
                tracing::info!("loaded plan from {}", path.display());
                *cached = Some(snapshot.clone());
                return Ok(snapshot);
            }
        }

        let requirements = read_optional(&self.input_dir.join("requirements.txt"))?;
        let constraints = read_optional(&self.input_dir.join("constraints.txt"))?;
        let snapshot = planner
            .plan(
                requirements.as_deref(),
                constraints.as_deref(),
                self.wheel_dir.as_deref(),
            )
            .await?;
        tracing::info!(run_id = %snapshot.run_id, "synthesized plan locally");

        if let Some(parent) = self.cache_path.parent() {
            let _ = fs_err::create_dir_all(parent);
        }
        if let Ok(bytes) = serde_json::to_vec_pretty(&snapshot) {
            if let Err(err) = fs_err::write(&self.cache_path, bytes) {
                tracing::warn!("failed to cache plan: {err}");
            }
        }

        *cached = Some(snapshot.clone());
        Ok(snapshot)
    }
}

fn read_plan_file(path: &Path) -> Result<Option<PlanSnapshot>, PlanCacheError> {
    match fs_err::read(path) {
        Ok(bytes) => {
            let snapshot = serde_json::from_slice(&bytes)
                .map_err(|err| PlanCacheError::Malformed(path.display().to_string(), err))?;
            Ok(Some(snapshot))
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(PlanCacheError::Io(path.display().to_string(), err)),
    }
}

fn read_optional(path: &Path) -> Result<Option<String>, PlanCacheError> {
    match fs_err::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(PlanCacheError::Io(path.display().to_string(), err)),
    }
}
