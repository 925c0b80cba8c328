//! Control plane: HTTP API over the store, the queues and the object store.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

use refinery_cas::ObjectStore;
use refinery_queue::{BuildQueue, FileQueue, KafkaQueue, PlanQueue, RedisQueue};
use refinery_store::Store;

mod api;
mod auth;
mod config;
mod error;
mod loghub;
mod state;

use config::{QueueBackend, ServerConfig};
use state::AppState;

fn setup_logging() {
    use tracing_subscriber::{fmt, EnvFilter};
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging();
    let config = ServerConfig::from_env()?;

    let store = Store::connect(&config.database_url)
        .await
        .context("failed to connect to the store")?;

    let queue = match config.queue_backend {
        QueueBackend::File => BuildQueue::File(FileQueue::new(&config.queue_file)),
        QueueBackend::Redis => BuildQueue::Redis(
            RedisQueue::connect(&config.redis_url, &config.redis_key)
                .await
                .context("failed to connect the redis queue")?,
        ),
        QueueBackend::Kafka => BuildQueue::Kafka(
            KafkaQueue::connect(&config.kafka_brokers, &config.kafka_topic, &config.kafka_group)
                .context("failed to connect the kafka queue")?,
        ),
    };

    let plan_queue = if config.redis_url.is_empty() {
        None
    } else {
        Some(
            PlanQueue::connect(&config.redis_url, &config.plan_queue_key)
                .await
                .context("failed to connect the plan queue")?,
        )
    };

    let objects = match &config.s3 {
        Some(s3) => {
            ObjectStore::s3(
                &s3.endpoint,
                &s3.bucket,
                &s3.access_key,
                &s3.secret_key,
                s3.public_base.clone(),
            )
            .await
        }
        None => ObjectStore::Null,
    };

    let cancel = CancellationToken::new();
    let addr = config.http_addr;
    let state = Arc::new(AppState {
        store,
        queue,
        plan_queue,
        objects,
        log_hub: loghub::LogHub::new(),
        cancel: cancel.clone(),
        config,
    });

    let router = api::router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("control plane listening on {addr}");

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            shutdown.cancel();
        }
    });

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .context("server error")?;

    Ok(())
}
