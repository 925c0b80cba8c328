//! Build execution: a containerized runner in production, a scripted fake
//! in tests.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

/// Everything the runner needs to execute one build job.
#[derive(Debug, Clone)]
pub(crate) struct RunSpec {
    pub(crate) name: String,
    pub(crate) version: String,
    pub(crate) python_version: String,
    pub(crate) python_tag: String,
    pub(crate) platform_tag: String,
    pub(crate) recipes: Vec<String>,
    pub(crate) wheel_digest: String,
    pub(crate) runtime_dir: Option<PathBuf>,
    pub(crate) pack_dirs: Vec<PathBuf>,
    pub(crate) reuse_wheel: Option<PathBuf>,
    pub(crate) output_dir: PathBuf,
    pub(crate) repair_tool: String,
    pub(crate) repair_rules_hash: String,
}

#[derive(Debug, Clone)]
pub(crate) struct RunOutcome {
    pub(crate) duration: Duration,
    pub(crate) log: String,
    pub(crate) error: Option<String>,
    /// `error` or `timeout` on failure.
    pub(crate) reason: Option<&'static str>,
}

impl RunOutcome {
    pub(crate) fn success(&self) -> bool {
        self.error.is_none()
    }
}

pub(crate) enum Runner {
    Podman {
        image: String,
        timeout: Duration,
    },
    /// Scripted outcomes keyed by package name; unlisted packages succeed.
    Fake {
        failures: HashMap<String, String>,
    },
}

impl Runner {
    pub(crate) async fn run(&self, spec: &RunSpec, cancel: &CancellationToken) -> RunOutcome {
        match self {
            Self::Podman { image, timeout } => Self::run_podman(image, *timeout, spec, cancel).await,
            Self::Fake { failures } => Self::run_fake(failures, spec),
        }
    }

    async fn run_podman(
        image: &str,
        timeout: Duration,
        spec: &RunSpec,
        cancel: &CancellationToken,
    ) -> RunOutcome {
        let started = Instant::now();
        let mut command = tokio::process::Command::new("podman");
        command
            .arg("run")
            .arg("--rm")
            .arg("--network=host")
            .arg("-v")
            .arg(format!("{}:/out", spec.output_dir.display()));
        if let Some(runtime) = &spec.runtime_dir {
            command.arg("-v").arg(format!("{}:/runtime:ro", runtime.display()));
        }
        for (index, pack) in spec.pack_dirs.iter().enumerate() {
            command
                .arg("-v")
                .arg(format!("{}:/packs/{index}:ro", pack.display()));
        }
        if let Some(wheel) = &spec.reuse_wheel {
            command
                .arg("-v")
                .arg(format!("{}:/reuse.whl:ro", wheel.display()));
        }
        command
            .arg("-e")
            .arg(format!("REFINERY_RECIPES={}", spec.recipes.join(",")))
            .arg("-e")
            .arg(format!("REFINERY_PYTHON_VERSION={}", spec.python_version))
            .arg("-e")
            .arg(format!("REFINERY_WHEEL_DIGEST={}", spec.wheel_digest))
            .arg("-e")
            .arg(format!("REFINERY_REPAIR_TOOL={}", spec.repair_tool))
            .arg("-e")
            .arg(format!(
                "REFINERY_REPAIR_POLICY_HASH={}",
                spec.repair_rules_hash
            ))
            .arg(image)
            .arg("refinery-build")
            .arg(&spec.name)
            .arg(&spec.version)
            .arg(&spec.python_tag)
            .arg(&spec.platform_tag);

        tracing::debug!("running {:?}", command.as_std());
        let output = tokio::select! {
            () = cancel.cancelled() => {
                return RunOutcome {
                    duration: started.elapsed(),
                    log: String::new(),
                    error: Some("cancelled".to_string()),
                    reason: Some("error"),
                };
            }
            result = tokio::time::timeout(timeout, command.output()) => result,
        };

        let duration = started.elapsed();
        match output {
            Err(_elapsed) => RunOutcome {
                duration,
                log: format!("build exceeded the {}s deadline", timeout.as_secs()),
                error: Some("runner timed out".to_string()),
                reason: Some("timeout"),
            },
            Ok(Err(err)) => RunOutcome {
                duration,
                log: String::new(),
                error: Some(format!("failed to spawn podman: {err}")),
                reason: Some("error"),
            },
            Ok(Ok(output)) => {
                let mut log = String::from_utf8_lossy(&output.stdout).into_owned();
                log.push_str(&String::from_utf8_lossy(&output.stderr));
                if output.status.success() {
                    RunOutcome {
                        duration,
                        log,
                        error: None,
                        reason: None,
                    }
                } else {
                    RunOutcome {
                        duration,
                        log,
                        error: Some(format!("runner exited with {}", output.status)),
                        reason: Some("error"),
                    }
                }
            }
        }
    }

    fn run_fake(failures: &HashMap<String, String>, spec: &RunSpec) -> RunOutcome {
        match failures.get(&spec.name) {
            Some(log) => RunOutcome {
                duration: Duration::from_millis(1),
                log: log.clone(),
                error: Some("fake runner failure".to_string()),
                reason: Some("error"),
            },
            None => {
                // Drop a plausible wheel into the output directory so the
                // upload path has something to push.
                let filename = format!(
                    "{}-{}-{}-{}-{}.whl",
                    spec.name.replace('-', "_"),
                    spec.version,
                    spec.python_tag,
                    spec.python_tag,
                    spec.platform_tag
                );
                let _ = fs_err::create_dir_all(&spec.output_dir);
                let _ = fs_err::write(
                    spec.output_dir.join(filename),
                    format!("wheel {} {}", spec.name, spec.version),
                );
                RunOutcome {
                    duration: Duration::from_millis(1),
                    log: format!("built {} {}", spec.name, spec.version),
                    error: None,
                    reason: None,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, output_dir: PathBuf) -> RunSpec {
        RunSpec {
            name: name.to_string(),
            version: "1.0".to_string(),
            python_version: "3.11".to_string(),
            python_tag: "cp311".to_string(),
            platform_tag: "manylinux2014_s390x".to_string(),
            recipes: vec![],
            wheel_digest: "sha256:wheel".to_string(),
            runtime_dir: None,
            pack_dirs: vec![],
            reuse_wheel: None,
            output_dir,
            repair_tool: "auditwheel-6.1".to_string(),
            repair_rules_hash: String::new(),
        }
    }

    #[tokio::test]
    async fn fake_runner_writes_a_wheel_on_success() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Runner::Fake {
            failures: HashMap::new(),
        };
        let outcome = runner
            .run(&spec("pkg", dir.path().to_path_buf()), &CancellationToken::new())
            .await;
        assert!(outcome.success());
        assert!(dir
            .path()
            .join("pkg-1.0-cp311-cp311-manylinux2014_s390x.whl")
            .exists());
    }

    #[tokio::test]
    async fn fake_runner_scripted_failure_carries_the_log() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Runner::Fake {
            failures: HashMap::from([(
                "pkg".to_string(),
                "fatal error: zlib.h: No such file or directory".to_string(),
            )]),
        };
        let outcome = runner
            .run(&spec("pkg", dir.path().to_path_buf()), &CancellationToken::new())
            .await;
        assert!(!outcome.success());
        assert_eq!(outcome.reason, Some("error"));
        assert!(outcome.log.contains("zlib.h"));
    }
}
