//! Plan queue: pending-input ids awaiting the planner. Redis-list only.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::QueueError;

pub struct PlanQueue {
    conn: ConnectionManager,
    key: String,
}

impl PlanQueue {
    pub async fn connect(url: &str, key: impl Into<String>) -> Result<Self, QueueError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self {
            conn,
            key: key.into(),
        })
    }

    /// The plan queue is only defined for the Redis backend; other queue
    /// backends surface this error.
    pub fn not_configured() -> QueueError {
        QueueError::NotConfigured("plan queue requires the redis backend".to_string())
    }

    pub async fn enqueue(&self, id: i64) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let _: () = conn.rpush(&self.key, id).await?;
        Ok(())
    }

    pub async fn pop(&self, max: usize) -> Result<Vec<i64>, QueueError> {
        let mut conn = self.conn.clone();
        let mut ids = Vec::new();
        while ids.len() < max {
            let item: Option<String> = conn.lpop(&self.key, None).await?;
            let Some(item) = item else { break };
            match item.parse::<i64>() {
                Ok(id) => ids.push(id),
                Err(_) => tracing::warn!("dropping malformed plan queue entry `{item}`"),
            }
        }
        Ok(ids)
    }

    pub async fn len(&self) -> Result<i64, QueueError> {
        let mut conn = self.conn.clone();
        Ok(conn.llen(&self.key).await?)
    }

    pub async fn clear(&self) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(&self.key).await?;
        Ok(())
    }
}
