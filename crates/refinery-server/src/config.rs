//! Environment-driven configuration.

use std::net::SocketAddr;

use anyhow::{bail, Context, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum QueueBackend {
    File,
    Redis,
    Kafka,
}

#[derive(Debug, Clone)]
pub(crate) struct S3Config {
    pub(crate) endpoint: String,
    pub(crate) bucket: String,
    pub(crate) access_key: String,
    pub(crate) secret_key: String,
    pub(crate) public_base: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct ServerConfig {
    pub(crate) http_addr: SocketAddr,
    pub(crate) database_url: String,
    pub(crate) queue_backend: QueueBackend,
    pub(crate) queue_file: String,
    pub(crate) redis_url: String,
    pub(crate) redis_key: String,
    pub(crate) plan_queue_key: String,
    pub(crate) kafka_brokers: String,
    pub(crate) kafka_topic: String,
    pub(crate) kafka_group: String,
    pub(crate) token: Option<String>,
    pub(crate) s3: Option<S3Config>,
    pub(crate) worker_webhook: Option<String>,
    pub(crate) worker_command: Option<String>,
    pub(crate) max_attempts: i32,
    pub(crate) upload_limit: usize,
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

impl ServerConfig {
    pub(crate) fn from_env() -> Result<Self> {
        let http_addr = var("REFINERY_HTTP_ADDR")
            .unwrap_or_else(|| "0.0.0.0:8080".to_string())
            .parse()
            .context("REFINERY_HTTP_ADDR is not a socket address")?;
        let database_url =
            var("REFINERY_DATABASE_URL").context("REFINERY_DATABASE_URL is required")?;

        let queue_backend = match var("REFINERY_QUEUE_BACKEND").as_deref() {
            None | Some("file") => QueueBackend::File,
            Some("redis") => QueueBackend::Redis,
            Some("kafka") => QueueBackend::Kafka,
            Some(other) => bail!("unknown queue backend `{other}`"),
        };

        let s3 = match (var("REFINERY_S3_ENDPOINT"), var("REFINERY_S3_BUCKET")) {
            (Some(endpoint), Some(bucket)) => Some(S3Config {
                endpoint,
                bucket,
                access_key: var("REFINERY_S3_ACCESS_KEY").unwrap_or_default(),
                secret_key: var("REFINERY_S3_SECRET_KEY").unwrap_or_default(),
                public_base: var("REFINERY_S3_PUBLIC_URL"),
            }),
            _ => None,
        };

        Ok(Self {
            http_addr,
            database_url,
            queue_backend,
            queue_file: var("REFINERY_QUEUE_FILE")
                .unwrap_or_else(|| "/var/lib/refinery/queue.json".to_string()),
            redis_url: var("REFINERY_REDIS_URL").unwrap_or_default(),
            redis_key: var("REFINERY_REDIS_KEY")
                .unwrap_or_else(|| "refinery:build-queue".to_string()),
            plan_queue_key: var("REFINERY_PLAN_QUEUE_KEY")
                .unwrap_or_else(|| "refinery:plan-queue".to_string()),
            kafka_brokers: var("REFINERY_KAFKA_BROKERS").unwrap_or_default(),
            kafka_topic: var("REFINERY_KAFKA_TOPIC")
                .unwrap_or_else(|| "refinery-builds".to_string()),
            kafka_group: var("REFINERY_KAFKA_GROUP")
                .unwrap_or_else(|| "refinery-server".to_string()),
            token: var("REFINERY_TOKEN"),
            s3,
            worker_webhook: var("REFINERY_WORKER_WEBHOOK"),
            worker_command: var("REFINERY_WORKER_COMMAND"),
            max_attempts: var("REFINERY_MAX_ATTEMPTS")
                .and_then(|value| value.parse().ok())
                .unwrap_or(refinery_store::DEFAULT_MAX_ATTEMPTS),
            upload_limit: var("REFINERY_UPLOAD_LIMIT")
                .and_then(|value| value.parse().ok())
                .unwrap_or(8 * 1024 * 1024),
        })
    }

    /// Non-secret fields, for the config endpoint.
    pub(crate) fn public_view(&self, queue_backend: &str) -> serde_json::Value {
        serde_json::json!({
            "http_addr": self.http_addr.to_string(),
            "queue_backend": queue_backend,
            "kafka_topic": self.kafka_topic,
            "max_attempts": self.max_attempts,
            "upload_limit": self.upload_limit,
            "object_store": self.s3.as_ref().map(|s3| s3.bucket.clone()),
            "auth_enabled": self.token.is_some(),
        })
    }
}
