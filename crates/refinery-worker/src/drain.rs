//! The drain loop: lease build requests, match them to the plan, resolve
//! artifacts, execute, and report everything back.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;

use refinery_artifact::ArtifactType;
use refinery_autofix::JobContext;
use refinery_cas::ObjectStore;
use refinery_client::ControlPlane;
use refinery_filename::{normalize_name, PlanAction, WheelFilename};
use refinery_planner::Planner;
use refinery_queue::BuildQueue;
use refinery_types::{
    BuildOutcome, BuildRequest, DagNode, Event, Hint, LogEntry, ManifestEntry, PlanNode,
    PlanSnapshot,
};

use crate::artifacts::{ArtifactResolver, ResolvedArtifact};
use crate::config::WorkerConfig;
use crate::plan_cache::PlanCache;
use crate::runner::{RunOutcome, RunSpec, Runner};

const LOG_TAIL_LINES: usize = 200;

pub(crate) struct Drain {
    pub(crate) config: WorkerConfig,
    pub(crate) client: Option<ControlPlane>,
    pub(crate) queue: Option<Arc<BuildQueue>>,
    pub(crate) resolver: Arc<ArtifactResolver>,
    pub(crate) runner: Arc<Runner>,
    pub(crate) plan_cache: Arc<PlanCache>,
    pub(crate) planner: Arc<Planner>,
    pub(crate) cas: Option<refinery_cas::CasClient>,
    pub(crate) objects: Arc<ObjectStore>,
    pub(crate) active: Arc<AtomicUsize>,
    pub(crate) cancel: CancellationToken,
}

#[derive(Debug, Default, serde::Serialize)]
pub(crate) struct DrainSummary {
    pub(crate) popped: usize,
    pub(crate) matched: usize,
    pub(crate) built: usize,
    pub(crate) retried: usize,
    pub(crate) failed: usize,
}

#[derive(Debug, Clone)]
struct Job {
    request: BuildRequest,
    node: PlanNode,
    wheel: DagNode,
}

struct JobResult {
    job: Job,
    outcome: RunOutcome,
    uploaded: Option<Uploaded>,
}

#[derive(Debug, Default, Clone)]
struct Uploaded {
    wheel_url: String,
    repair_url: String,
    repair_digest: String,
    runtime_url: String,
    pack_urls: Vec<String>,
}

impl Drain {
    /// One full drain: pop, match, execute in parallel, report serially.
    pub(crate) async fn drain_once(&self) -> anyhow::Result<DrainSummary> {
        let snapshot = self.plan_cache.load(&self.planner).await?;
        let requests = self.pop_requests().await;
        let mut summary = DrainSummary {
            popped: requests.len(),
            ..DrainSummary::default()
        };
        if requests.is_empty() {
            return Ok(summary);
        }

        let mut jobs = Vec::new();
        for request in requests {
            match match_request(&snapshot, &request) {
                Some(job) => jobs.push(job),
                None => {
                    tracing::warn!(
                        "no plan node matches {} {}; leaving for the next plan",
                        request.name,
                        request.version
                    );
                }
            }
        }
        summary.matched = jobs.len();

        let hints = self.fetch_hints().await;
        let snapshot = Arc::new(snapshot);
        let results = join_all(
            jobs.into_iter()
                .map(|job| self.run_job(Arc::clone(&snapshot), job)),
        )
        .await;

        for result in results {
            match self.report(result, &hints).await {
                ReportDisposition::Built => summary.built += 1,
                ReportDisposition::Retried => summary.retried += 1,
                ReportDisposition::Failed => summary.failed += 1,
            }
        }
        tracing::info!(
            popped = summary.popped,
            matched = summary.matched,
            built = summary.built,
            retried = summary.retried,
            failed = summary.failed,
            "drain complete"
        );
        Ok(summary)
    }

    /// The control-plane build queue is preferred when configured; the local
    /// queue backend is the fallback.
    async fn pop_requests(&self) -> Vec<BuildRequest> {
        if let Some(client) = &self.client {
            match client.pop_builds(self.config.batch_size).await {
                Ok(requests) => return requests,
                Err(err) => {
                    tracing::warn!("build-queue pop via control plane failed: {err}");
                    return Vec::new();
                }
            }
        }
        if let Some(queue) = &self.queue {
            match queue.pop(self.config.batch_size, &self.cancel).await {
                Ok(requests) => return requests,
                Err(err) => {
                    tracing::warn!("local queue pop failed: {err}");
                }
            }
        }
        Vec::new()
    }

    async fn fetch_hints(&self) -> Vec<Hint> {
        let Some(client) = &self.client else {
            return Vec::new();
        };
        match client.list_hints().await {
            Ok(hints) => hints,
            Err(err) => {
                tracing::debug!("hint catalog fetch failed: {err}");
                Vec::new()
            }
        }
    }

    #[tracing::instrument(skip_all, fields(package = %job.node.name, version = %job.node.version))]
    async fn run_job(&self, snapshot: Arc<PlanSnapshot>, job: Job) -> JobResult {
        self.active.fetch_add(1, Ordering::Relaxed);
        let result = self.run_job_inner(&snapshot, job).await;
        self.active.fetch_sub(1, Ordering::Relaxed);
        result
    }

    async fn run_job_inner(&self, snapshot: &PlanSnapshot, job: Job) -> JobResult {
        // Packs in install order, runtime, and (for reuse) the wheel itself.
        let mut pack_dirs = Vec::new();
        let mut resolved_packs = Vec::new();
        for pack_node in ArtifactResolver::ordered_packs(snapshot, &job.wheel) {
            match self.resolver.resolve_pack(pack_node).await {
                Ok(resolved) => {
                    if let Some(dir) = &resolved.path {
                        pack_dirs.push(dir.clone());
                    }
                    resolved_packs.push(resolved);
                }
                Err(err) => {
                    tracing::warn!("pack {} unavailable: {err}", pack_node.id.digest);
                }
            }
        }

        let runtime = match snapshot
            .inputs_of(&job.wheel, ArtifactType::Runtime)
            .next()
            .and_then(|input| snapshot.dag.iter().find(|node| node.id == *input))
        {
            Some(node) => match self.resolver.resolve_runtime(node).await {
                Ok(resolved) => Some(resolved),
                Err(err) => {
                    tracing::warn!("runtime {} unavailable: {err}", node.id.digest);
                    None
                }
            },
            None => None,
        };

        let reuse_wheel = if job.wheel.action == PlanAction::Reuse {
            match self.resolver.fetch_wheel(&job.wheel).await {
                Ok(resolved) => resolved.path,
                Err(err) => {
                    tracing::warn!("reuse wheel fetch failed: {err}");
                    None
                }
            }
        } else {
            None
        };

        let spec = RunSpec {
            name: job.node.name.clone(),
            version: job.node.version.clone(),
            python_version: job.node.python_version.clone(),
            python_tag: job.node.python_tag.clone(),
            platform_tag: job.node.platform_tag.clone(),
            recipes: job.request.recipes.clone(),
            wheel_digest: job.wheel.id.digest.clone(),
            runtime_dir: runtime.as_ref().and_then(|r| r.path.clone()),
            pack_dirs,
            reuse_wheel,
            output_dir: self.config.output_dir.clone(),
            repair_tool: self.config.repair_tool.clone(),
            repair_rules_hash: self.config.repair_rules_hash.clone(),
        };

        let outcome = if job.wheel.action == PlanAction::Reuse {
            // Nothing to execute; the fetch above already materialized it.
            RunOutcome {
                duration: std::time::Duration::ZERO,
                log: format!("reused {} {}", job.node.name, job.node.version),
                error: None,
                reason: None,
            }
        } else {
            self.post_status(&job, BuildOutcome::Building).await;
            self.runner.run(&spec, &self.cancel).await
        };

        let uploaded = if outcome.success() {
            Some(
                self.upload_outputs(&job, runtime.as_ref(), &resolved_packs)
                    .await,
            )
        } else {
            None
        };

        JobResult {
            job,
            outcome,
            uploaded,
        }
    }

    /// Push build outputs: wheels to the CAS under the wheel key and to the
    /// object store under `name/version/filename`, the repair output to
    /// both, and manifest stubs for runtimes and packs.
    async fn upload_outputs(
        &self,
        job: &Job,
        runtime: Option<&ResolvedArtifact>,
        packs: &[ResolvedArtifact],
    ) -> Uploaded {
        let mut uploaded = Uploaded::default();
        let cas = self.resolver_cas();

        for wheel_path in self.matching_wheels(&job.node.name) {
            let Ok(bytes) = fs_err::read(&wheel_path) else {
                continue;
            };
            let filename = wheel_path
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or_default()
                .to_string();

            if let Some(cas) = cas {
                match cas
                    .push(&job.wheel.id.digest, bytes.clone(), "application/zip")
                    .await
                {
                    Ok(url) => uploaded.wheel_url = url,
                    Err(err) => tracing::warn!("wheel push failed: {err}"),
                }
            }
            let key = format!("{}/{}/{filename}", job.node.name, job.node.version);
            if let Err(err) = self.objects.put(&key, bytes, "application/zip").await {
                tracing::warn!("object store wheel write failed: {err}");
            } else if let Some(url) = self.objects.url(&key) {
                uploaded.wheel_url = url;
            }
        }

        // Repair output: produce (or stub) a policy-compliance record.
        let repair_name = format!("{}-{}.repair.json", job.node.name, job.node.version);
        let repair_path = self.config.output_dir.join(&repair_name);
        let repair_body = serde_json::json!({
            "wheel": job.wheel.id.digest,
            "tool": self.config.repair_tool,
            "rules": self.config.repair_rules_hash,
        })
        .to_string();
        if !repair_path.exists() {
            let _ = fs_err::write(&repair_path, &repair_body);
        }
        if let Ok(bytes) = fs_err::read(&repair_path) {
            let digest = refinery_artifact::sha256_bytes(&bytes);
            uploaded.repair_digest = digest.clone();
            if let Some(cas) = cas {
                match cas.push(&digest, bytes.clone(), "application/json").await {
                    Ok(url) => uploaded.repair_url = url,
                    Err(err) => tracing::warn!("repair push failed: {err}"),
                }
            }
            let key = format!("{}/{}/{repair_name}", job.node.name, job.node.version);
            if let Err(err) = self.objects.put(&key, bytes, "application/json").await {
                tracing::warn!("object store repair write failed: {err}");
            } else if let Some(url) = self.objects.url(&key) {
                uploaded.repair_url = url;
            }
        }

        if self.config.cas_push {
            if let Some(runtime) = runtime {
                uploaded.runtime_url = self.push_bundle_or_stub(runtime).await;
            }
            for pack in packs {
                let url = self.push_bundle_or_stub(pack).await;
                if !url.is_empty() {
                    uploaded.pack_urls.push(url);
                }
            }
        }

        uploaded
    }

    /// Push the verified blob for an artifact when one is on disk, else a
    /// small manifest stub recording what the sandbox used.
    async fn push_bundle_or_stub(&self, artifact: &ResolvedArtifact) -> String {
        let Some(cas) = self.resolver_cas() else {
            return String::new();
        };
        let blob = self.config.cache_dir.join("blobs").join(format!(
            "{}-{}.tar.gz",
            artifact.id.kind,
            artifact.id.hex()
        ));
        let bytes = match fs_err::read(&blob) {
            Ok(bytes)
                if refinery_artifact::sha256_bytes(&bytes) == artifact.id.digest =>
            {
                bytes
            }
            _ => serde_json::json!({
                "type": artifact.id.kind,
                "digest": artifact.id.digest,
                "name": artifact.name,
            })
            .to_string()
            .into_bytes(),
        };
        match cas
            .push(&artifact.id.digest, bytes, "application/octet-stream")
            .await
        {
            Ok(url) => url,
            Err(err) => {
                tracing::warn!("push for {} failed: {err}", artifact.id.digest);
                String::new()
            }
        }
    }

    fn resolver_cas(&self) -> Option<&refinery_cas::CasClient> {
        self.cas.as_ref()
    }

    async fn report(&self, mut result: JobResult, hints: &[Hint]) -> ReportDisposition {
        if result.outcome.success() {
            let uploaded = result.uploaded.take().unwrap_or_default();
            self.post_status(&result.job, BuildOutcome::Built).await;
            self.post_manifest(&result.job, &uploaded, "built").await;
            self.post_event(&result.job, "built", &result.outcome, &[])
                .await;
            self.post_log(&result.job, &result.outcome).await;
            return ReportDisposition::Built;
        }

        // Mine the failure for fix recipes before deciding on a retry.
        let tail = tail_lines(&result.outcome.log, LOG_TAIL_LINES);
        let ctx = JobContext {
            package: result.job.node.name.clone(),
            version: result.job.node.version.clone(),
            python_version: result.job.node.python_version.clone(),
            python_tag: result.job.node.python_tag.clone(),
            platform_tag: result.job.node.platform_tag.clone(),
        };
        let fix = refinery_autofix::analyze(&tail, hints, &ctx);
        let (merged, grew) =
            refinery_autofix::merge_recipes(&result.job.request.recipes, &fix.recipes);

        if self.config.auto_save_hints {
            if let Some(client) = &self.client {
                for hint in &fix.synthesized {
                    if client.get_hint(&hint.id).await.is_ok() {
                        continue;
                    }
                    if let Err(err) = client.upsert_hint(hint).await {
                        tracing::debug!("auto-save of hint {} failed: {err}", hint.id);
                    }
                }
            }
        }

        let error = result
            .outcome
            .error
            .clone()
            .unwrap_or_else(|| "build failed".to_string());
        let attempts = result.job.request.attempts;
        let retry = attempts < self.config.max_attempts;
        if grew {
            tracing::info!(
                "merged {} fix recipes for {} {}",
                merged.len(),
                result.job.node.name,
                result.job.node.version
            );
        }

        if retry {
            // The merged recipes ride along on the retry report so the next
            // lease hands them to whichever worker picks the row up.
            self.post_status(
                &result.job,
                BuildOutcome::Retry {
                    error: error.clone(),
                    recipes: merged.clone(),
                    hint_ids: fix.matched_hint_ids.clone(),
                },
            )
            .await;
            // With no control-plane build queue the retry re-enters through
            // the local queue instead.
            if self.client.is_none() && self.config.requeue_on_failure {
                if let Some(queue) = &self.queue {
                    let mut request = result.job.request.clone();
                    request.attempts += 1;
                    request.recipes = merged;
                    request.enqueued_at = None;
                    if let Err(err) = queue.enqueue(request).await {
                        tracing::warn!("local requeue failed: {err}");
                    }
                }
            }
            self.post_event(&result.job, "retry", &result.outcome, &fix.matched_hint_ids)
                .await;
            self.post_log(&result.job, &result.outcome).await;
            ReportDisposition::Retried
        } else {
            self.post_status(&result.job, BuildOutcome::Failed { error })
                .await;
            self.post_event(&result.job, "failed", &result.outcome, &fix.matched_hint_ids)
                .await;
            self.post_log(&result.job, &result.outcome).await;
            ReportDisposition::Failed
        }
    }

    async fn post_status(&self, job: &Job, outcome: BuildOutcome) {
        let Some(client) = &self.client else { return };
        if let Err(err) = client
            .report_status(&job.node.name, &job.node.version, &outcome)
            .await
        {
            tracing::warn!("status report failed: {err}");
        }
    }

    async fn post_manifest(&self, job: &Job, uploaded: &Uploaded, status: &str) {
        let Some(client) = &self.client else { return };
        let entry = ManifestEntry {
            name: job.node.name.clone(),
            version: job.node.version.clone(),
            wheel_url: uploaded.wheel_url.clone(),
            repair_url: uploaded.repair_url.clone(),
            repair_digest: uploaded.repair_digest.clone(),
            runtime_url: uploaded.runtime_url.clone(),
            pack_urls: uploaded.pack_urls.clone(),
            python_tag: job.node.python_tag.clone(),
            platform_tag: job.node.platform_tag.clone(),
            status: status.to_string(),
            created_at: None,
        };
        if let Err(err) = client.post_manifest(&entry).await {
            tracing::warn!("manifest report failed: {err}");
        }
    }

    async fn post_event(
        &self,
        job: &Job,
        status: &str,
        outcome: &RunOutcome,
        matched_hint_ids: &[String],
    ) {
        let Some(client) = &self.client else { return };
        let event = Event {
            run_id: String::new(),
            name: job.node.name.clone(),
            version: job.node.version.clone(),
            python_tag: job.node.python_tag.clone(),
            platform_tag: job.node.platform_tag.clone(),
            status: status.to_string(),
            detail: outcome.error.clone().unwrap_or_default(),
            metadata: serde_json::json!({
                "reason": outcome.reason,
                "attempts": job.request.attempts,
            }),
            matched_hint_ids: matched_hint_ids.to_vec(),
            duration_ms: i64::try_from(outcome.duration.as_millis()).unwrap_or(i64::MAX),
            timestamp: None,
        };
        if let Err(err) = client.post_event(&event).await {
            tracing::warn!("event report failed: {err}");
        }
    }

    async fn post_log(&self, job: &Job, outcome: &RunOutcome) {
        let Some(client) = &self.client else { return };
        if outcome.log.is_empty() {
            return;
        }
        let entry = LogEntry {
            name: job.node.name.clone(),
            version: job.node.version.clone(),
            content: outcome.log.clone(),
            timestamp: None,
        };
        if let Err(err) = client.post_log(&entry).await {
            tracing::warn!("log report failed: {err}");
        }
    }

    fn matching_wheels(&self, package: &str) -> Vec<PathBuf> {
        let package = normalize_name(package);
        let Ok(entries) = fs_err::read_dir(&self.config.output_dir) else {
            return Vec::new();
        };
        let mut wheels = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(filename) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            if !filename.ends_with(".whl") {
                continue;
            }
            if filename
                .parse::<WheelFilename>()
                .is_ok_and(|wheel| wheel.name == package)
            {
                wheels.push(path);
            }
        }
        wheels
    }
}

enum ReportDisposition {
    Built,
    Retried,
    Failed,
}

/// Match a popped request to the plan: case-insensitive name, and the
/// version must agree unless the request left it empty or `latest`.
fn match_request(snapshot: &PlanSnapshot, request: &BuildRequest) -> Option<Job> {
    let wanted = normalize_name(&request.name);
    let node = snapshot.plan.iter().find(|node| {
        normalize_name(&node.name) == wanted
            && (request.version.is_empty()
                || request.version == "latest"
                || node.version == request.version)
    })?;
    let wheel = snapshot.wheel_node(&node.name)?.clone();
    Some(Job {
        request: request.clone(),
        node: node.clone(),
        wheel,
    })
}

fn tail_lines(log: &str, n: usize) -> String {
    let lines: Vec<&str> = log.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use refinery_artifact::ArtifactId;

    use super::*;

    fn snapshot() -> PlanSnapshot {
        let wheel_id = ArtifactId {
            kind: ArtifactType::Wheel,
            digest: "sha256:wheel".to_string(),
        };
        PlanSnapshot {
            id: 1,
            run_id: "runrunrunrun".to_string(),
            plan: vec![PlanNode {
                name: "pillow".to_string(),
                version: "10.3.0".to_string(),
                python_version: "3.11".to_string(),
                python_tag: "cp311".to_string(),
                platform_tag: "manylinux2014_s390x".to_string(),
                action: PlanAction::Build,
            }],
            dag: vec![DagNode {
                id: wheel_id,
                kind: ArtifactType::Wheel,
                action: PlanAction::Build,
                inputs: vec![],
                metadata: serde_json::json!({ "name": "pillow" }),
            }],
        }
    }

    fn request(name: &str, version: &str) -> BuildRequest {
        BuildRequest {
            name: name.to_string(),
            version: version.to_string(),
            python_version: String::new(),
            python_tag: String::new(),
            platform_tag: String::new(),
            recipes: vec![],
            attempts: 1,
            enqueued_at: None,
        }
    }

    #[test]
    fn match_is_case_insensitive_on_name() {
        let snapshot = snapshot();
        assert!(match_request(&snapshot, &request("Pillow", "10.3.0")).is_some());
        assert!(match_request(&snapshot, &request("PILLOW", "10.3.0")).is_some());
        assert!(match_request(&snapshot, &request("numpy", "10.3.0")).is_none());
    }

    #[test]
    fn empty_or_latest_version_matches_any() {
        let snapshot = snapshot();
        assert!(match_request(&snapshot, &request("pillow", "")).is_some());
        assert!(match_request(&snapshot, &request("pillow", "latest")).is_some());
        assert!(match_request(&snapshot, &request("pillow", "9.0.0")).is_none());
    }

    #[test]
    fn tail_keeps_only_the_last_lines()
    {
        let log: String = (0..300).map(|i| format!("l{i}\n")).collect();
        let tail = tail_lines(&log, 200);
        assert!(tail.starts_with("l100"));
        assert!(tail.ends_with("l299"));
    }

    use std::collections::HashMap;

    use refinery_queue::FileQueue;

    use crate::config::{QueueBackend, WorkerConfig};
    use crate::plan_cache::PlanCache;

    fn test_config(root: &std::path::Path) -> WorkerConfig {
        WorkerConfig {
            http_addr: "127.0.0.1:0".parse().unwrap(),
            control_plane: None,
            token: None,
            queue_backend: QueueBackend::File,
            queue_file: root.join("queue.json").display().to_string(),
            redis_url: String::new(),
            redis_key: String::new(),
            plan_queue_key: String::new(),
            kafka_brokers: String::new(),
            kafka_topic: String::new(),
            kafka_group: String::new(),
            cas_url: None,
            cas_repo: "refinery".to_string(),
            cas_user: None,
            cas_pass: None,
            cas_push: false,
            s3: None,
            output_dir: root.join("output"),
            cache_dir: root.join("cache"),
            input_dir: root.join("inputs"),
            wheel_dir: None,
            python_version: "3.11".to_string(),
            platform_tag: "manylinux2014_s390x".to_string(),
            arch: "s390x".to_string(),
            index_url: url::Url::parse("https://mirror.example.com/simple").unwrap(),
            policy_digest: String::new(),
            toolchain: "gcc-12".to_string(),
            build_frontend: "build-1.2.1".to_string(),
            repair_tool: "auditwheel-6.1".to_string(),
            repair_rules_hash: String::new(),
            runner_image: String::new(),
            runner_timeout: std::time::Duration::from_secs(60),
            fake_runner: true,
            batch_size: 4,
            max_attempts: 3,
            requeue_on_failure: true,
            auto_save_hints: false,
            plan_pool_size: 1,
            build_pool_size: 2,
            poll_interval: std::time::Duration::from_secs(5),
            heartbeat_interval: std::time::Duration::from_secs(15),
            pack_builder: None,
        }
    }

    fn test_planner() -> Planner {
        Planner::new(refinery_planner::PlannerConfig {
            python_version: "3.11".to_string(),
            platform_tag: "manylinux2014_s390x".to_string(),
            index_url: url::Url::parse("https://mirror.example.com/simple").unwrap(),
            upgrade: refinery_planner::UpgradeStrategy::Pinned,
            arch: "s390x".to_string(),
            policy_digest: String::new(),
            toolchain: "gcc-12".to_string(),
            build_frontend: "build-1.2.1".to_string(),
            repair_tool: "auditwheel-6.1".to_string(),
            repair_rules_hash: String::new(),
            catalog: refinery_planner::PackCatalog::default(),
        })
        .unwrap()
    }

    async fn test_drain(
        root: &std::path::Path,
        failures: HashMap<String, String>,
    ) -> (Drain, Arc<BuildQueue>) {
        let config = test_config(root);
        for dir in [&config.output_dir, &config.cache_dir, &config.input_dir] {
            fs_err::create_dir_all(dir).unwrap();
        }
        let queue = Arc::new(BuildQueue::File(FileQueue::new(&config.queue_file)));
        let plan_cache = Arc::new(PlanCache::new(&config));
        plan_cache.set(snapshot()).await;
        let drain = Drain {
            config,
            client: None,
            queue: Some(Arc::clone(&queue)),
            resolver: Arc::new(ArtifactResolver::new(
                None,
                root.join("cache"),
                None,
            )),
            runner: Arc::new(Runner::Fake { failures }),
            plan_cache,
            planner: Arc::new(test_planner()),
            cas: None,
            objects: Arc::new(ObjectStore::Null),
            active: Arc::new(AtomicUsize::new(0)),
            cancel: CancellationToken::new(),
        };
        (drain, queue)
    }

    #[tokio::test]
    async fn successful_job_drains_to_built() {
        let root = tempfile::tempdir().unwrap();
        let (drain, queue) = test_drain(root.path(), HashMap::new()).await;
        queue.enqueue(request("pillow", "10.3.0")).await.unwrap();

        let summary = drain.drain_once().await.unwrap();
        assert_eq!(summary.popped, 1);
        assert_eq!(summary.matched, 1);
        assert_eq!(summary.built, 1);
        assert_eq!(summary.failed, 0);
        // The fake runner left a wheel in the output directory.
        assert!(!drain.matching_wheels("pillow").is_empty());
        // Nothing re-entered the queue.
        assert!(queue.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_job_requeues_locally_with_fix_recipes() {
        let root = tempfile::tempdir().unwrap();
        let failures = HashMap::from([(
            "pillow".to_string(),
            "fatal error: zlib.h: No such file or directory".to_string(),
        )]);
        let (drain, queue) = test_drain(root.path(), failures).await;
        queue.enqueue(request("pillow", "10.3.0")).await.unwrap();

        let summary = drain.drain_once().await.unwrap();
        assert_eq!(summary.retried, 1);
        let requeued = queue.list().await.unwrap();
        assert_eq!(requeued.len(), 1);
        assert_eq!(requeued[0].attempts, 2);
        assert!(requeued[0]
            .recipes
            .contains(&"apt:zlib1g-dev".to_string()));
    }

    #[tokio::test]
    async fn exhausted_attempts_fail_terminally() {
        let root = tempfile::tempdir().unwrap();
        let failures = HashMap::from([("pillow".to_string(), "boom".to_string())]);
        let (drain, queue) = test_drain(root.path(), failures).await;
        let mut req = request("pillow", "10.3.0");
        req.attempts = 3;
        queue.enqueue(req).await.unwrap();

        let summary = drain.drain_once().await.unwrap();
        assert_eq!(summary.failed, 1);
        assert!(queue.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn control_plane_retry_report_carries_merged_recipes() {
        use wiremock::matchers::{body_partial_json, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/builds/pop"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([{
                "name": "pillow",
                "version": "10.3.0",
                "attempts": 1,
            }])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/hints"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;
        // The retry report must carry the recipes the auto-fix pass merged.
        Mock::given(method("POST"))
            .and(path("/api/builds/report"))
            .and(body_partial_json(serde_json::json!({
                "package": "pillow",
                "version": "10.3.0",
                "outcome": "retry",
                "recipes": ["apt:zlib1g-dev", "dnf:zlib-devel"],
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .expect(1)
            .named("retry report with recipes")
            .mount(&server)
            .await;
        // The pre-execution `building` report and any other traffic.
        Mock::given(method("POST"))
            .and(path("/api/builds/report"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(&server)
            .await;
        for endpoint in ["/api/events", "/api/logs"] {
            Mock::given(method("POST"))
                .and(path(endpoint))
                .respond_with(
                    ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})),
                )
                .mount(&server)
                .await;
        }

        let root = tempfile::tempdir().unwrap();
        let failures = HashMap::from([(
            "pillow".to_string(),
            "fatal error: zlib.h: No such file or directory".to_string(),
        )]);
        let (mut drain, _queue) = test_drain(root.path(), failures).await;
        drain.client = Some(
            refinery_client::ControlPlane::new(
                url::Url::parse(&server.uri()).unwrap(),
                None,
            )
            .unwrap(),
        );
        drain.queue = None;

        let summary = drain.drain_once().await.unwrap();
        assert_eq!(summary.popped, 1);
        assert_eq!(summary.retried, 1);
        // Mock expectations (the recipe-carrying report) verify on drop.
    }

    #[tokio::test]
    async fn control_plane_jobs_report_building_before_execution() {
        use wiremock::matchers::{body_partial_json, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/builds/pop"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([{
                "name": "pillow",
                "version": "10.3.0",
                "attempts": 1,
            }])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/hints"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/builds/report"))
            .and(body_partial_json(serde_json::json!({
                "package": "pillow",
                "outcome": "building",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .expect(1)
            .named("building report")
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/builds/report"))
            .and(body_partial_json(serde_json::json!({
                "package": "pillow",
                "outcome": "built",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .expect(1)
            .named("built report")
            .mount(&server)
            .await;
        for endpoint in ["/api/events", "/api/logs", "/api/manifest"] {
            Mock::given(method("POST"))
                .and(path(endpoint))
                .respond_with(
                    ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})),
                )
                .mount(&server)
                .await;
        }

        let root = tempfile::tempdir().unwrap();
        let (mut drain, _queue) = test_drain(root.path(), HashMap::new()).await;
        drain.client = Some(
            refinery_client::ControlPlane::new(
                url::Url::parse(&server.uri()).unwrap(),
                None,
            )
            .unwrap(),
        );
        drain.queue = None;

        let summary = drain.drain_once().await.unwrap();
        assert_eq!(summary.built, 1);
    }

    #[tokio::test]
    async fn unmatched_requests_are_counted_but_not_run() {
        let root = tempfile::tempdir().unwrap();
        let (drain, queue) = test_drain(root.path(), HashMap::new()).await;
        queue.enqueue(request("numpy", "1.26.4")).await.unwrap();

        let summary = drain.drain_once().await.unwrap();
        assert_eq!(summary.popped, 1);
        assert_eq!(summary.matched, 0);
        assert_eq!(summary.built, 0);
    }
}
