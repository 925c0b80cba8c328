//! Queue abstraction: one contract, three backends.
//!
//! The build-request queue is a tagged enum over file, Redis-list and Kafka
//! backends. The file and Redis backends are strict FIFO and guarantee that
//! two concurrent poppers never receive the same item; the Kafka backend is
//! at-least-once, which downstream tolerates because build seeding is an
//! idempotent upsert by (package, version).

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use refinery_types::BuildRequest;

pub use file::FileQueue;
pub use kafka::KafkaQueue;
pub use plan_queue::PlanQueue;
pub use redis_list::RedisQueue;

mod file;
mod kafka;
mod plan_queue;
mod redis_list;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("{0}")]
    Unsupported(String),
    #[error("queue backend not configured: {0}")]
    NotConfigured(String),
    #[error("queue file io error")]
    Io(#[from] std::io::Error),
    #[error("queue payload error")]
    Serde(#[from] serde_json::Error),
    #[error("redis error")]
    Redis(#[from] redis::RedisError),
    #[error("kafka error")]
    Kafka(#[from] rdkafka::error::KafkaError),
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub backend: &'static str,
    pub length: i64,
    pub oldest_enqueued_at: Option<DateTime<Utc>>,
}

/// The build-request queue, selected by configuration.
pub enum BuildQueue {
    File(FileQueue),
    Redis(RedisQueue),
    Kafka(KafkaQueue),
}

impl BuildQueue {
    pub fn backend(&self) -> &'static str {
        match self {
            Self::File(_) => "file",
            Self::Redis(_) => "redis",
            Self::Kafka(_) => "kafka",
        }
    }

    /// Append a request. `enqueued_at` is stamped with now when unset.
    pub async fn enqueue(&self, request: BuildRequest) -> Result<(), QueueError> {
        let request = request.with_enqueue_time(Utc::now());
        match self {
            Self::File(queue) => queue.enqueue(request).await,
            Self::Redis(queue) => queue.enqueue(request).await,
            Self::Kafka(queue) => queue.enqueue(request).await,
        }
    }

    /// Non-destructive read of queued requests. Best effort on Kafka.
    pub async fn list(&self) -> Result<Vec<BuildRequest>, QueueError> {
        match self {
            Self::File(queue) => queue.list().await,
            Self::Redis(queue) => queue.list().await,
            Self::Kafka(queue) => queue.list().await,
        }
    }

    /// Drop all queued requests. Unsupported on Kafka.
    pub async fn clear(&self) -> Result<(), QueueError> {
        match self {
            Self::File(queue) => queue.clear().await,
            Self::Redis(queue) => queue.clear().await,
            Self::Kafka(queue) => queue.clear(),
        }
    }

    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        match self {
            Self::File(queue) => queue.stats().await,
            Self::Redis(queue) => queue.stats().await,
            Self::Kafka(queue) => queue.stats().await,
        }
    }

    /// Remove and return up to `max` requests.
    pub async fn pop(
        &self,
        max: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<BuildRequest>, QueueError> {
        match self {
            Self::File(queue) => queue.pop(max).await,
            Self::Redis(queue) => queue.pop(max).await,
            Self::Kafka(queue) => queue.pop(max, cancel).await,
        }
    }
}
