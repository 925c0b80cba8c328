//! Worker: drain loop, planner loop, heartbeat, and a small HTTP surface.

use std::collections::HashMap;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

use refinery_cas::{CasClient, ObjectStore};
use refinery_client::ControlPlane;
use refinery_planner::{PackCatalog, Planner, PlannerConfig, UpgradeStrategy};
use refinery_queue::{BuildQueue, FileQueue, KafkaQueue, PlanQueue, RedisQueue};

mod artifacts;
mod config;
mod drain;
mod heartbeat;
mod plan_cache;
mod planner_loop;
mod runner;
mod server;

use artifacts::ArtifactResolver;
use config::{QueueBackend, WorkerConfig};
use drain::Drain;
use plan_cache::PlanCache;
use planner_loop::PlannerLoop;
use runner::Runner;

fn setup_logging() {
    use tracing_subscriber::{fmt, EnvFilter};
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

fn load_catalog(config: &WorkerConfig) -> PackCatalog {
    let path = config.input_dir.join("pack-catalog.json");
    match fs_err::read(&path) {
        Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(catalog) => catalog,
            Err(err) => {
                tracing::warn!("pack catalog at {} is malformed: {err}", path.display());
                PackCatalog::default()
            }
        },
        Err(_) => PackCatalog::default(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging();
    let config = WorkerConfig::from_env()?;
    for dir in [&config.output_dir, &config.cache_dir, &config.input_dir] {
        fs_err::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }

    let client = config
        .control_plane
        .clone()
        .map(|base| ControlPlane::new(base, config.token.clone()))
        .transpose()
        .context("failed to build the control plane client")?;

    // Settings overlay from the control plane, applied once at startup.
    let mut config = config;
    if let Some(client) = &client {
        match client.fetch_settings().await {
            Ok(settings) => {
                if config.python_version.is_empty() {
                    config.python_version = settings.python_version.clone();
                }
                if config.platform_tag.is_empty() {
                    config.platform_tag = settings.platform_tag.clone();
                }
                config.build_pool_size = settings.build_pool_size;
                config.plan_pool_size = settings.plan_pool_size;
            }
            Err(err) => tracing::warn!("settings overlay fetch failed: {err}"),
        }
    }
    let config = config;

    let queue = match config.queue_backend {
        QueueBackend::File => Some(BuildQueue::File(FileQueue::new(&config.queue_file))),
        QueueBackend::Redis if !config.redis_url.is_empty() => Some(BuildQueue::Redis(
            RedisQueue::connect(&config.redis_url, &config.redis_key)
                .await
                .context("failed to connect the redis queue")?,
        )),
        QueueBackend::Kafka if !config.kafka_brokers.is_empty() => Some(BuildQueue::Kafka(
            KafkaQueue::connect(&config.kafka_brokers, &config.kafka_topic, &config.kafka_group)
                .context("failed to connect the kafka queue")?,
        )),
        _ => None,
    }
    .map(Arc::new);

    let plan_queue = if config.redis_url.is_empty() {
        None
    } else {
        Some(
            PlanQueue::connect(&config.redis_url, &config.plan_queue_key)
                .await
                .context("failed to connect the plan queue")?,
        )
    };

    let cas = config
        .cas_url
        .clone()
        .map(|base| {
            let auth = config
                .cas_user
                .clone()
                .zip(config.cas_pass.clone());
            CasClient::new(base, config.cas_repo.clone(), auth)
        })
        .transpose()
        .context("failed to build the CAS client")?;

    let planner = Arc::new(Planner::new(PlannerConfig {
        python_version: config.python_version.clone(),
        platform_tag: config.platform_tag.clone(),
        index_url: config.index_url.clone(),
        upgrade: UpgradeStrategy::Pinned,
        arch: config.arch.clone(),
        policy_digest: config.policy_digest.clone(),
        toolchain: config.toolchain.clone(),
        build_frontend: config.build_frontend.clone(),
        repair_tool: config.repair_tool.clone(),
        repair_rules_hash: config.repair_rules_hash.clone(),
        catalog: load_catalog(&config),
    })?);

    let resolver = Arc::new(ArtifactResolver::new(
        cas.clone(),
        config.cache_dir.clone(),
        config.pack_builder.clone(),
    ));
    let runner = Arc::new(if config.fake_runner {
        Runner::Fake {
            failures: HashMap::new(),
        }
    } else {
        Runner::Podman {
            image: config.runner_image.clone(),
            timeout: config.runner_timeout,
        }
    });
    let plan_cache = Arc::new(PlanCache::new(&config));
    let active = Arc::new(AtomicUsize::new(0));
    let cancel = CancellationToken::new();

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

    let drain = Arc::new(Drain {
        config: config.clone(),
        client: client.clone(),
        queue: queue.clone(),
        resolver,
        runner,
        plan_cache: Arc::clone(&plan_cache),
        planner: Arc::clone(&planner),
        cas,
        objects: Arc::new(objects),
        active: Arc::clone(&active),
        cancel: cancel.clone(),
    });

    // Long-lived cooperative loops under one cancellation signal.
    let planner_task = tokio::spawn(
        PlannerLoop {
            config: config.clone(),
            client: client.clone(),
            plan_queue,
            planner: Arc::clone(&planner),
            plan_cache: Arc::clone(&plan_cache),
        }
        .run(cancel.clone()),
    );
    let heartbeat_task = tokio::spawn(heartbeat::run(
        config.clone(),
        client.clone(),
        Arc::clone(&active),
        cancel.clone(),
    ));
    let drain_task = {
        let drain = Arc::clone(&drain);
        let cancel = cancel.clone();
        let interval = config.poll_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => return,
                    _ = ticker.tick() => {}
                }
                if let Err(err) = drain.drain_once().await {
                    tracing::error!("drain failed: {err:#}");
                }
            }
        })
    };

    let state = Arc::new(server::WorkerState {
        drain,
        plan_cache,
        planner,
        token: config.token.clone(),
    });
    let router = server::router(state);
    let listener = tokio::net::TcpListener::bind(config.http_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.http_addr))?;
    info!("worker listening on {}", config.http_addr);

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            shutdown.cancel();
        }
    });

    axum::serve(listener, router)
        .with_graceful_shutdown({
            let cancel = cancel.clone();
            async move { cancel.cancelled().await }
        })
        .await
        .context("worker server error")?;

    cancel.cancel();
    let _ = tokio::join!(planner_task, heartbeat_task, drain_task);
    Ok(())
}
