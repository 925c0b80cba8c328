//! Artifact resolution for a build job: packs, runtime, and reuse wheels.
//!
//! Every blob pulled from the CAS is digest-verified by the fetch path
//! before it is extracted or handed to the runner. The pack-extract cache is
//! per-process: once a digest is extracted, later jobs reuse the directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;

use refinery_artifact::{ArtifactId, ArtifactType};
use refinery_cas::CasClient;
use refinery_filename::PlanAction;
use refinery_types::{DagNode, PlanSnapshot};

/// Fixed tie-break order for pack installation after the DAG's own edges.
const PACK_PRIORITY: &[&str] = &[
    "pkgconf", "zlib", "xz", "bzip2", "zstd", "openssl", "libffi", "sqlite", "libxml2", "libxslt",
    "libpng", "jpeg", "freetype", "openblas", "rust", "cmake", "ninja",
];

#[derive(Debug, thiserror::Error)]
pub(crate) enum ArtifactError {
    #[error(transparent)]
    Cas(#[from] refinery_cas::CasError),
    #[error("failed to extract {0}")]
    Extract(String, #[source] std::io::Error),
    #[error("pack builder failed for {0}: {1}")]
    Builder(String, String),
    #[error("io error on {0}")]
    Io(String, #[source] std::io::Error),
}

#[derive(Debug, Clone)]
pub(crate) struct ResolvedArtifact {
    pub(crate) id: ArtifactId,
    pub(crate) name: String,
    /// Extracted directory (packs/runtimes) or file path (wheels). `None`
    /// when nothing could be materialized and a stub is acceptable.
    pub(crate) path: Option<PathBuf>,
}

pub(crate) struct ArtifactResolver {
    cas: Option<CasClient>,
    cache_dir: PathBuf,
    pack_builder: Option<String>,
    pack_cache: Mutex<HashMap<String, PathBuf>>,
}

impl ArtifactResolver {
    pub(crate) fn new(
        cas: Option<CasClient>,
        cache_dir: PathBuf,
        pack_builder: Option<String>,
    ) -> Self {
        Self {
            cas,
            cache_dir,
            pack_builder,
            pack_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Packs of a wheel node in installation order: topological by DAG
    /// edges, then the fixed priority list, then insertion order.
    pub(crate) fn ordered_packs<'a>(
        snapshot: &'a PlanSnapshot,
        wheel_node: &'a DagNode,
    ) -> Vec<&'a DagNode> {
        let packs: Vec<&DagNode> = wheel_node
            .inputs
            .iter()
            .filter(|input| input.kind == ArtifactType::Pack)
            .filter_map(|input| snapshot.dag.iter().find(|node| node.id == *input))
            .collect();

        let in_set = |id: &ArtifactId| packs.iter().any(|node| node.id == *id);
        let mut remaining: Vec<&DagNode> = packs.clone();
        let mut placed: Vec<&DagNode> = Vec::new();

        while !remaining.is_empty() {
            // Nodes whose in-set dependencies are already placed.
            let mut ready: Vec<usize> = remaining
                .iter()
                .enumerate()
                .filter(|(_, node)| {
                    node.inputs
                        .iter()
                        .filter(|input| input.kind == ArtifactType::Pack && in_set(input))
                        .all(|input| placed.iter().any(|done| done.id == *input))
                })
                .map(|(index, _)| index)
                .collect();
            if ready.is_empty() {
                // A cycle slipped past the planner; fall back to input order.
                tracing::warn!("pack inputs contain a cycle, using DAG order");
                placed.extend(remaining.drain(..));
                break;
            }
            ready.sort_by_key(|&index| priority_rank(pack_name(remaining[index])));
            let chosen = ready[0];
            placed.push(remaining.remove(chosen));
        }
        placed
    }

    /// Materialize one pack: the extract cache, then the CAS, then (for
    /// build-action packs) the pack builder command.
    pub(crate) async fn resolve_pack(
        &self,
        node: &DagNode,
    ) -> Result<ResolvedArtifact, ArtifactError> {
        let name = pack_name(node).to_string();
        let digest = &node.id.digest;

        if let Some(dir) = self.pack_cache.lock().await.get(digest) {
            return Ok(ResolvedArtifact {
                id: node.id.clone(),
                name,
                path: Some(dir.clone()),
            });
        }

        let extract_dir = self.cache_dir.join("packs").join(node.id.hex());
        let blob_path = self
            .cache_dir
            .join("blobs")
            .join(format!("pack-{}.tar.gz", node.id.hex()));

        let fetched = match &self.cas {
            Some(cas) => match cas.fetch(digest, &blob_path).await {
                Ok(()) => true,
                Err(err) => {
                    tracing::warn!("pack fetch for {digest} failed: {err}");
                    false
                }
            },
            None => false,
        };

        let materialized = if fetched {
            extract_tar_gz(&blob_path, &extract_dir)?;
            true
        } else if node.action == PlanAction::Build {
            self.build_pack(&name, digest, &blob_path, &extract_dir)
                .await?
        } else {
            false
        };

        if materialized {
            self.pack_cache
                .lock()
                .await
                .insert(digest.clone(), extract_dir.clone());
        }
        Ok(ResolvedArtifact {
            id: node.id.clone(),
            name,
            path: materialized.then_some(extract_dir),
        })
    }

    /// Materialize the runtime bundle. A reuse action with no fetchable blob
    /// yields nothing; a build action without a builder leaves a stub
    /// directory so the runner mount point exists.
    pub(crate) async fn resolve_runtime(
        &self,
        node: &DagNode,
    ) -> Result<ResolvedArtifact, ArtifactError> {
        let digest = &node.id.digest;
        let extract_dir = self.cache_dir.join("runtimes").join(node.id.hex());
        let blob_path = self
            .cache_dir
            .join("blobs")
            .join(format!("runtime-{}.tar.gz", node.id.hex()));

        let fetched = match &self.cas {
            Some(cas) => match cas.fetch(digest, &blob_path).await {
                Ok(()) => true,
                Err(err) => {
                    tracing::warn!("runtime fetch for {digest} failed: {err}");
                    false
                }
            },
            None => false,
        };

        let path = if fetched {
            extract_tar_gz(&blob_path, &extract_dir)?;
            Some(extract_dir)
        } else if node.action == PlanAction::Build {
            fs_err::create_dir_all(&extract_dir)
                .map_err(|err| ArtifactError::Io(extract_dir.display().to_string(), err))?;
            Some(extract_dir)
        } else {
            None
        };

        Ok(ResolvedArtifact {
            id: node.id.clone(),
            name: "runtime".to_string(),
            path,
        })
    }

    /// Fetch a reuse wheel into the local CAS path.
    pub(crate) async fn fetch_wheel(
        &self,
        node: &DagNode,
    ) -> Result<ResolvedArtifact, ArtifactError> {
        let dest = self
            .cache_dir
            .join("wheels")
            .join(format!("{}.whl", node.id.hex()));
        let path = match &self.cas {
            Some(cas) => match cas.fetch(&node.id.digest, &dest).await {
                Ok(()) => Some(dest),
                Err(err) => {
                    tracing::warn!("wheel fetch for {} failed: {err}", node.id.digest);
                    None
                }
            },
            None => None,
        };
        Ok(ResolvedArtifact {
            id: node.id.clone(),
            name: pack_name(node).to_string(),
            path,
        })
    }

    async fn build_pack(
        &self,
        name: &str,
        digest: &str,
        blob_path: &Path,
        extract_dir: &Path,
    ) -> Result<bool, ArtifactError> {
        let Some(builder) = &self.pack_builder else {
            return Ok(false);
        };
        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(format!(
                "{builder} {name} {digest} {}",
                blob_path.display()
            ))
            .output()
            .await
            .map_err(|err| ArtifactError::Io(builder.clone(), err))?;
        if !output.status.success() {
            let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            return Err(ArtifactError::Builder(name.to_string(), combined));
        }
        extract_tar_gz(blob_path, extract_dir)?;
        Ok(true)
    }
}

fn pack_name(node: &DagNode) -> &str {
    node.metadata
        .get("name")
        .and_then(|value| value.as_str())
        .unwrap_or("")
}

fn priority_rank(name: &str) -> usize {
    PACK_PRIORITY
        .iter()
        .position(|&candidate| candidate == name)
        .unwrap_or(PACK_PRIORITY.len())
}

fn extract_tar_gz(archive: &Path, dest: &Path) -> Result<(), ArtifactError> {
    let display = archive.display().to_string();
    fs_err::create_dir_all(dest)
        .map_err(|err| ArtifactError::Io(dest.display().to_string(), err))?;
    let file = fs_err::File::open(archive).map_err(|err| ArtifactError::Io(display.clone(), err))?;
    let decoder = flate2::read::GzDecoder::new(file);
    tar::Archive::new(decoder)
        .unpack(dest)
        .map_err(|err| ArtifactError::Extract(display, err))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pack(name: &str, digest: &str, deps: &[&str]) -> DagNode {
        DagNode {
            id: ArtifactId {
                kind: ArtifactType::Pack,
                digest: format!("sha256:{digest}"),
            },
            kind: ArtifactType::Pack,
            action: PlanAction::Build,
            inputs: deps
                .iter()
                .map(|dep| ArtifactId {
                    kind: ArtifactType::Pack,
                    digest: format!("sha256:{dep}"),
                })
                .collect(),
            metadata: serde_json::json!({ "name": name }),
        }
    }

    fn wheel_with(packs: &[&DagNode]) -> DagNode {
        DagNode {
            id: ArtifactId {
                kind: ArtifactType::Wheel,
                digest: "sha256:wheel".to_string(),
            },
            kind: ArtifactType::Wheel,
            action: PlanAction::Build,
            inputs: packs.iter().map(|node| node.id.clone()).collect(),
            metadata: serde_json::json!({ "name": "pkg" }),
        }
    }

    #[test]
    fn priority_breaks_ties_between_independent_packs() {
        let openssl = pack("openssl", "openssl", &[]);
        let zlib = pack("zlib", "zlib", &[]);
        let cmake = pack("cmake", "cmake", &[]);
        let wheel = wheel_with(&[&cmake, &openssl, &zlib]);
        let snapshot = PlanSnapshot {
            id: 0,
            run_id: "r".to_string(),
            plan: vec![],
            dag: vec![openssl.clone(), zlib.clone(), cmake.clone(), wheel.clone()],
        };
        let ordered = ArtifactResolver::ordered_packs(&snapshot, &wheel);
        let names: Vec<_> = ordered.iter().map(|node| pack_name(node)).collect();
        assert_eq!(names, vec!["zlib", "openssl", "cmake"]);
    }

    #[test]
    fn dag_edges_beat_priority() {
        // libxslt depends on libxml2 even though priority alone would not
        // reorder them; zlib has no edges and the highest priority.
        let zlib = pack("zlib", "zlib", &[]);
        let libxml2 = pack("libxml2", "libxml2", &["zlib"]);
        let libxslt = pack("libxslt", "libxslt", &["libxml2"]);
        let wheel = wheel_with(&[&libxslt, &libxml2, &zlib]);
        let snapshot = PlanSnapshot {
            id: 0,
            run_id: "r".to_string(),
            plan: vec![],
            dag: vec![libxslt.clone(), libxml2.clone(), zlib.clone(), wheel.clone()],
        };
        let ordered = ArtifactResolver::ordered_packs(&snapshot, &wheel);
        let names: Vec<_> = ordered.iter().map(|node| pack_name(node)).collect();
        assert_eq!(names, vec!["zlib", "libxml2", "libxslt"]);
    }

    #[test]
    fn unknown_packs_sort_after_known_ones() {
        let custom = pack("customlib", "custom", &[]);
        let jpeg = pack("jpeg", "jpeg", &[]);
        let wheel = wheel_with(&[&custom, &jpeg]);
        let snapshot = PlanSnapshot {
            id: 0,
            run_id: "r".to_string(),
            plan: vec![],
            dag: vec![custom.clone(), jpeg.clone(), wheel.clone()],
        };
        let ordered = ArtifactResolver::ordered_packs(&snapshot, &wheel);
        let names: Vec<_> = ordered.iter().map(|node| pack_name(node)).collect();
        assert_eq!(names, vec!["jpeg", "customlib"]);
    }

    #[tokio::test]
    async fn pack_cache_returns_extracted_dir_without_refetch() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = ArtifactResolver::new(None, dir.path().to_path_buf(), None);
        let node = pack("zlib", "zlibdigest", &[]);
        let cached_dir = dir.path().join("pre-extracted");
        fs_err::create_dir_all(&cached_dir).unwrap();
        resolver
            .pack_cache
            .lock()
            .await
            .insert(node.id.digest.clone(), cached_dir.clone());

        let resolved = resolver.resolve_pack(&node).await.unwrap();
        assert_eq!(resolved.path.as_deref(), Some(cached_dir.as_path()));
    }

    #[tokio::test]
    async fn build_pack_without_cas_or_builder_yields_stub() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = ArtifactResolver::new(None, dir.path().to_path_buf(), None);
        let node = pack("zlib", "zlibdigest", &[]);
        let resolved = resolver.resolve_pack(&node).await.unwrap();
        assert!(resolved.path.is_none());
    }

    #[tokio::test]
    async fn reuse_runtime_without_blob_is_empty_but_build_gets_a_stub_dir() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = ArtifactResolver::new(None, dir.path().to_path_buf(), None);

        let mut runtime = pack("runtime", "runtimedigest", &[]);
        runtime.kind = ArtifactType::Runtime;
        runtime.id.kind = ArtifactType::Runtime;
        runtime.action = PlanAction::Reuse;
        let reuse = resolver.resolve_runtime(&runtime).await.unwrap();
        assert!(reuse.path.is_none());

        runtime.action = PlanAction::Build;
        let build = resolver.resolve_runtime(&runtime).await.unwrap();
        let path = build.path.unwrap();
        assert!(path.is_dir());
    }

    #[test]
    fn tar_gz_round_trip_extracts_files() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("bundle.tar.gz");
        let payload_dir = dir.path().join("payload");
        fs_err::create_dir_all(&payload_dir).unwrap();
        fs_err::write(payload_dir.join("lib.so"), b"binary").unwrap();

        let file = std::fs::File::create(&archive_path).unwrap();
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        builder.append_dir_all("pack", &payload_dir).unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        let dest = dir.path().join("extracted");
        extract_tar_gz(&archive_path, &dest).unwrap();
        assert!(dest.join("pack").join("lib.so").exists());
    }
}
