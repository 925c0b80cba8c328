//! Redis-list queue backend: RPUSH on enqueue, LPOP on pop.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use refinery_types::BuildRequest;

use crate::{QueueError, QueueStats};

pub struct RedisQueue {
    conn: ConnectionManager,
    key: String,
}

impl RedisQueue {
    pub async fn connect(url: &str, key: impl Into<String>) -> Result<Self, QueueError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self {
            conn,
            key: key.into(),
        })
    }

    pub(crate) async fn enqueue(&self, request: BuildRequest) -> Result<(), QueueError> {
        let payload = serde_json::to_string(&request)?;
        let mut conn = self.conn.clone();
        let _: () = conn.rpush(&self.key, payload).await?;
        Ok(())
    }

    pub(crate) async fn list(&self) -> Result<Vec<BuildRequest>, QueueError> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn.lrange(&self.key, 0, -1).await?;
        let mut requests = Vec::with_capacity(raw.len());
        for item in raw {
            match serde_json::from_str(&item) {
                Ok(request) => requests.push(request),
                Err(err) => tracing::warn!("skipping malformed queue entry: {err}"),
            }
        }
        Ok(requests)
    }

    pub(crate) async fn clear(&self) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(&self.key).await?;
        Ok(())
    }

    pub(crate) async fn stats(&self) -> Result<QueueStats, QueueError> {
        let mut conn = self.conn.clone();
        let length: i64 = conn.llen(&self.key).await?;
        let head: Option<String> = conn.lindex(&self.key, 0).await?;
        let oldest = head
            .and_then(|item| serde_json::from_str::<BuildRequest>(&item).ok())
            .and_then(|request| request.enqueued_at);
        Ok(QueueStats {
            backend: "redis",
            length,
            oldest_enqueued_at: oldest,
        })
    }

    /// LPOP one at a time: each pop is atomic on the server, so two
    /// concurrent poppers can never receive the same entry.
    pub(crate) async fn pop(&self, max: usize) -> Result<Vec<BuildRequest>, QueueError> {
        let mut conn = self.conn.clone();
        let mut requests = Vec::new();
        while requests.len() < max {
            let item: Option<String> = conn.lpop(&self.key, None).await?;
            let Some(item) = item else { break };
            match serde_json::from_str(&item) {
                Ok(request) => requests.push(request),
                Err(err) => tracing::warn!("dropping malformed queue entry: {err}"),
            }
        }
        Ok(requests)
    }
}
