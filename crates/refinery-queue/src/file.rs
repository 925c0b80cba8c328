//! File-backed queue: a JSON array on disk, rewritten atomically.
//!
//! A process-local mutex serializes access. Cross-process writers are
//! last-writer-wins; the deployment assumption is one queue writer per host.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use refinery_types::BuildRequest;

use crate::{QueueError, QueueStats};

pub struct FileQueue {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileQueue {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn load(&self) -> Result<Vec<BuildRequest>, QueueError> {
        match fs_err::read(&self.path) {
            Ok(bytes) if bytes.is_empty() => Ok(Vec::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(err.into()),
        }
    }

    /// Write the array to a temp file in the same directory, then rename over
    /// the live path so readers never observe a torn write.
    fn persist(&self, requests: &[BuildRequest]) -> Result<(), QueueError> {
        let dir = self.path.parent().unwrap_or_else(|| std::path::Path::new("."));
        fs_err::create_dir_all(dir)?;
        let tmp = self.path.with_extension("tmp");
        fs_err::write(&tmp, serde_json::to_vec_pretty(requests)?)?;
        fs_err::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub(crate) async fn enqueue(&self, request: BuildRequest) -> Result<(), QueueError> {
        let _guard = self.lock.lock().await;
        let mut requests = self.load()?;
        requests.push(request);
        self.persist(&requests)
    }

    pub(crate) async fn list(&self) -> Result<Vec<BuildRequest>, QueueError> {
        let _guard = self.lock.lock().await;
        self.load()
    }

    pub(crate) async fn clear(&self) -> Result<(), QueueError> {
        let _guard = self.lock.lock().await;
        self.persist(&[])
    }

    pub(crate) async fn stats(&self) -> Result<QueueStats, QueueError> {
        let _guard = self.lock.lock().await;
        let requests = self.load()?;
        let oldest: Option<DateTime<Utc>> = requests.iter().filter_map(|r| r.enqueued_at).min();
        Ok(QueueStats {
            backend: "file",
            length: requests.len() as i64,
            oldest_enqueued_at: oldest,
        })
    }

    pub(crate) async fn pop(&self, max: usize) -> Result<Vec<BuildRequest>, QueueError> {
        let _guard = self.lock.lock().await;
        let mut requests = self.load()?;
        let take = max.min(requests.len());
        let rest = requests.split_off(take);
        self.persist(&rest)?;
        Ok(requests)
    }
}
