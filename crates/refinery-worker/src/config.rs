//! Worker configuration from the environment.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use url::Url;

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
pub(crate) struct WorkerConfig {
    pub(crate) http_addr: SocketAddr,
    pub(crate) control_plane: Option<Url>,
    pub(crate) token: Option<String>,
    pub(crate) queue_backend: QueueBackend,
    pub(crate) queue_file: String,
    pub(crate) redis_url: String,
    pub(crate) redis_key: String,
    pub(crate) plan_queue_key: String,
    pub(crate) kafka_brokers: String,
    pub(crate) kafka_topic: String,
    pub(crate) kafka_group: String,
    pub(crate) cas_url: Option<Url>,
    pub(crate) cas_repo: String,
    pub(crate) cas_user: Option<String>,
    pub(crate) cas_pass: Option<String>,
    pub(crate) cas_push: bool,
    pub(crate) s3: Option<S3Config>,
    pub(crate) output_dir: PathBuf,
    pub(crate) cache_dir: PathBuf,
    pub(crate) input_dir: PathBuf,
    pub(crate) wheel_dir: Option<PathBuf>,
    pub(crate) python_version: String,
    pub(crate) platform_tag: String,
    pub(crate) arch: String,
    pub(crate) index_url: Url,
    pub(crate) policy_digest: String,
    pub(crate) toolchain: String,
    pub(crate) build_frontend: String,
    pub(crate) repair_tool: String,
    pub(crate) repair_rules_hash: String,
    pub(crate) runner_image: String,
    pub(crate) runner_timeout: Duration,
    pub(crate) fake_runner: bool,
    pub(crate) batch_size: usize,
    pub(crate) max_attempts: i32,
    pub(crate) requeue_on_failure: bool,
    pub(crate) auto_save_hints: bool,
    pub(crate) plan_pool_size: usize,
    pub(crate) build_pool_size: usize,
    pub(crate) poll_interval: Duration,
    pub(crate) heartbeat_interval: Duration,
    pub(crate) pack_builder: Option<String>,
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

fn flag(name: &str, default: bool) -> bool {
    match var(name).as_deref() {
        Some("1" | "true" | "yes" | "on") => true,
        Some("0" | "false" | "no" | "off") => false,
        Some(_) | None => default,
    }
}

fn secs(name: &str, default: u64) -> Duration {
    Duration::from_secs(
        var(name)
            .and_then(|value| value.parse().ok())
            .unwrap_or(default),
    )
}

impl WorkerConfig {
    pub(crate) fn from_env() -> Result<Self> {
        let http_addr = var("REFINERY_WORKER_ADDR")
            .unwrap_or_else(|| "0.0.0.0:8090".to_string())
            .parse()
            .context("REFINERY_WORKER_ADDR is not a socket address")?;
        let control_plane = var("REFINERY_CONTROL_PLANE_URL")
            .map(|value| Url::parse(&value))
            .transpose()
            .context("REFINERY_CONTROL_PLANE_URL is not a URL")?;
        let queue_backend = match var("REFINERY_QUEUE_BACKEND").as_deref() {
            None | Some("file") => QueueBackend::File,
            Some("redis") => QueueBackend::Redis,
            Some("kafka") => QueueBackend::Kafka,
            Some(other) => bail!("unknown queue backend `{other}`"),
        };
        let cas_url = var("REFINERY_CAS_URL")
            .map(|value| Url::parse(&value))
            .transpose()
            .context("REFINERY_CAS_URL is not a URL")?;
        let index_url = Url::parse(
            &var("REFINERY_INDEX_URL").unwrap_or_else(|| "https://pypi.org/simple".to_string()),
        )
        .context("REFINERY_INDEX_URL is not a URL")?;

        Ok(Self {
            http_addr,
            control_plane,
            token: var("REFINERY_TOKEN"),
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
                .unwrap_or_else(|| "refinery-worker".to_string()),
            cas_url,
            cas_repo: var("REFINERY_CAS_REPO").unwrap_or_else(|| "refinery".to_string()),
            cas_user: var("REFINERY_CAS_USER"),
            cas_pass: var("REFINERY_CAS_PASS"),
            cas_push: flag("REFINERY_CAS_PUSH", true),
            s3: match (var("REFINERY_S3_ENDPOINT"), var("REFINERY_S3_BUCKET")) {
                (Some(endpoint), Some(bucket)) => Some(S3Config {
                    endpoint,
                    bucket,
                    access_key: var("REFINERY_S3_ACCESS_KEY").unwrap_or_default(),
                    secret_key: var("REFINERY_S3_SECRET_KEY").unwrap_or_default(),
                    public_base: var("REFINERY_S3_PUBLIC_URL"),
                }),
                _ => None,
            },
            output_dir: var("REFINERY_OUTPUT_DIR")
                .unwrap_or_else(|| "/var/lib/refinery/output".to_string())
                .into(),
            cache_dir: var("REFINERY_CACHE_DIR")
                .unwrap_or_else(|| "/var/lib/refinery/cache".to_string())
                .into(),
            input_dir: var("REFINERY_INPUT_DIR")
                .unwrap_or_else(|| "/var/lib/refinery/inputs".to_string())
                .into(),
            wheel_dir: var("REFINERY_WHEEL_DIR").map(Into::into),
            python_version: var("REFINERY_PYTHON_VERSION").unwrap_or_else(|| "3.11".to_string()),
            platform_tag: var("REFINERY_PLATFORM_TAG")
                .unwrap_or_else(|| "manylinux2014_s390x".to_string()),
            arch: var("REFINERY_ARCH").unwrap_or_else(|| "s390x".to_string()),
            index_url,
            policy_digest: var("REFINERY_POLICY_DIGEST").unwrap_or_default(),
            toolchain: var("REFINERY_TOOLCHAIN").unwrap_or_else(|| "gcc-12".to_string()),
            build_frontend: var("REFINERY_BUILD_FRONTEND")
                .unwrap_or_else(|| "build-1.2.1".to_string()),
            repair_tool: var("REFINERY_REPAIR_TOOL")
                .unwrap_or_else(|| "auditwheel-6.1".to_string()),
            repair_rules_hash: var("REFINERY_REPAIR_POLICY_HASH").unwrap_or_default(),
            runner_image: var("REFINERY_RUNNER_IMAGE")
                .unwrap_or_else(|| "refinery-builder:latest".to_string()),
            runner_timeout: secs("REFINERY_RUNNER_TIMEOUT_SEC", 1800),
            fake_runner: flag("REFINERY_FAKE_RUNNER", false),
            batch_size: var("REFINERY_BATCH_SIZE")
                .and_then(|value| value.parse().ok())
                .unwrap_or(4),
            max_attempts: var("REFINERY_MAX_ATTEMPTS")
                .and_then(|value| value.parse().ok())
                .unwrap_or(3),
            requeue_on_failure: flag("REFINERY_REQUEUE_ON_FAILURE", true),
            auto_save_hints: flag("REFINERY_AUTO_SAVE_HINTS", false),
            plan_pool_size: var("REFINERY_PLAN_POOL_SIZE")
                .and_then(|value| value.parse().ok())
                .unwrap_or(2),
            build_pool_size: var("REFINERY_BUILD_POOL_SIZE")
                .and_then(|value| value.parse().ok())
                .unwrap_or(4),
            poll_interval: secs("REFINERY_POLL_INTERVAL_SEC", 5),
            heartbeat_interval: secs("REFINERY_HEARTBEAT_INTERVAL_SEC", 15),
            pack_builder: var("REFINERY_PACK_BUILDER"),
        })
    }

    pub(crate) fn worker_id() -> String {
        let hostname = var("HOSTNAME").unwrap_or_else(|| "localhost".to_string());
        format!("{hostname}-{}", std::process::id())
    }
}
