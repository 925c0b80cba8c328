//! Flat-plan and DAG emission.

use std::collections::BTreeMap;
use std::path::Path;

use rand::Rng;
use url::Url;

use refinery_artifact::{ArtifactId, ArtifactType, PackKey, RuntimeKey, WheelKey};
use refinery_filename::{normalize_name, PlanAction, WheelFilename};
use refinery_types::{DagNode, PlanNode, PlanSnapshot};

use crate::{
    extract_requires_dist, parse_requirements, IndexClient, PackCatalog, PlannerError,
    RequirementSpec, UpgradeStrategy,
};

const RUN_ID_LEN: usize = 12;
const RUN_ID_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

#[derive(Debug, Clone)]
pub struct PlannerConfig {
    pub python_version: String,
    pub platform_tag: String,
    pub index_url: Url,
    pub upgrade: UpgradeStrategy,
    pub arch: String,
    pub policy_digest: String,
    pub toolchain: String,
    pub build_frontend: String,
    pub repair_tool: String,
    pub repair_rules_hash: String,
    pub catalog: PackCatalog,
}

impl PlannerConfig {
    /// `3.11` or `3.11.9` become the `cp311` interpreter tag.
    pub fn python_tag(&self) -> String {
        let mut parts = self.python_version.split('.');
        let major = parts.next().unwrap_or("3");
        let minor = parts.next().unwrap_or("0");
        format!("cp{major}{minor}")
    }
}

pub struct Planner {
    config: PlannerConfig,
    index: IndexClient,
}

impl Planner {
    pub fn new(config: PlannerConfig) -> Result<Self, PlannerError> {
        let index = IndexClient::new(config.index_url.clone())?;
        Ok(Self { config, index })
    }

    /// Override the index client, e.g. for a mirror that speaks the pypi
    /// JSON dialect under another host.
    pub fn with_index(config: PlannerConfig, index: IndexClient) -> Self {
        Self { config, index }
    }

    /// Produce a plan snapshot from any combination of a requirements file
    /// body, a constraints file body, and a directory of wheels.
    pub async fn plan(
        &self,
        requirements: Option<&str>,
        constraints: Option<&str>,
        wheel_dir: Option<&Path>,
    ) -> Result<PlanSnapshot, PlannerError> {
        let python_tag = self.config.python_tag();
        let constraint_pins: BTreeMap<String, String> = constraints
            .map(parse_requirements)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|spec| spec.pin.map(|pin| (spec.name, pin)))
            .collect();

        // 1. Wheels on disk, deduplicated by (name, version), plus the
        //    dependencies their METADATA declares.
        let mut wheels: Vec<WheelFilename> = Vec::new();
        let mut dependencies: Vec<RequirementSpec> = Vec::new();
        if let Some(dir) = wheel_dir {
            for wheel in scan_wheel_dir(dir)? {
                if wheels
                    .iter()
                    .any(|seen| seen.name == wheel.0.name && seen.version == wheel.0.version)
                {
                    continue;
                }
                dependencies.extend(extract_requires_dist(&wheel.1)?);
                wheels.push(wheel.0);
            }
        }

        // 2. Direct requirements.
        let requirement_specs = requirements.map(parse_requirements).unwrap_or_default();

        // 3. Assemble the flat plan: wheels first, then requirement rows,
        //    then dependency rows, all build-labeled, first spelling wins.
        let mut plan: Vec<PlanNode> = Vec::new();
        for wheel in &wheels {
            plan.push(PlanNode {
                name: wheel.name.clone(),
                version: wheel.version.clone(),
                python_version: self.config.python_version.clone(),
                python_tag: wheel.python_tag.clone(),
                platform_tag: wheel.platform_tag.clone(),
                action: wheel.classify(&python_tag, &self.config.platform_tag),
            });
        }
        for spec in requirement_specs.iter().chain(dependencies.iter()) {
            let name = normalize_name(&spec.name);
            if plan.iter().any(|node| node.name == name) {
                continue;
            }
            let version = self
                .resolve_version(&name, spec.pin.as_deref(), &constraint_pins)
                .await;
            plan.push(PlanNode {
                name,
                version,
                python_version: self.config.python_version.clone(),
                python_tag: python_tag.clone(),
                platform_tag: self.config.platform_tag.clone(),
                action: PlanAction::Build,
            });
        }

        let dag = self.emit_dag(&plan, &python_tag)?;

        Ok(PlanSnapshot {
            id: 0,
            run_id: new_run_id(),
            plan,
            dag,
        })
    }

    /// Pin, then constraint pin, then index resolution, then `"latest"`.
    async fn resolve_version(
        &self,
        name: &str,
        pin: Option<&str>,
        constraints: &BTreeMap<String, String>,
    ) -> String {
        if let Some(pin) = pin {
            return pin.to_string();
        }
        if let Some(pin) = constraints.get(name) {
            return pin.clone();
        }
        match self.index.resolve(name, self.config.upgrade).await {
            Ok(version) => version,
            Err(err) => {
                tracing::warn!("could not resolve `{name}`: {err}; planning as latest");
                "latest".to_string()
            }
        }
    }

    fn emit_dag(
        &self,
        plan: &[PlanNode],
        python_tag: &str,
    ) -> Result<Vec<DagNode>, PlannerError> {
        let mut dag: Vec<DagNode> = Vec::new();

        let runtime_key = RuntimeKey {
            arch: self.config.arch.clone(),
            policy_digest: self.config.policy_digest.clone(),
            python_version: self.config.python_version.clone(),
            build_flags: Vec::new(),
            toolchain: self.config.toolchain.clone(),
            deps_hash: String::new(),
        };
        let runtime_id = ArtifactId::runtime(&runtime_key)?;
        dag.push(DagNode {
            id: runtime_id.clone(),
            kind: ArtifactType::Runtime,
            action: PlanAction::Build,
            inputs: Vec::new(),
            metadata: serde_json::json!({
                "python_version": self.config.python_version,
                "arch": self.config.arch,
            }),
        });

        for node in plan {
            let selected = self.config.catalog.select(&node.name, None);
            let ordered = self.config.catalog.topo_order(&selected)?;

            let mut pack_ids = Vec::with_capacity(ordered.len());
            for pack in &ordered {
                let key = PackKey {
                    arch: self.config.arch.clone(),
                    policy_digest: self.config.policy_digest.clone(),
                    name: pack.name.clone(),
                    version: pack.version.clone(),
                    recipe_digest: pack.recipe_digest.clone(),
                };
                let id = ArtifactId::pack(&key)?;
                if !dag.iter().any(|existing| existing.id == id) {
                    let inputs = pack
                        .depends_on
                        .iter()
                        .filter_map(|dep| self.config.catalog.get(dep))
                        .map(|dep| {
                            ArtifactId::pack(&PackKey {
                                arch: self.config.arch.clone(),
                                policy_digest: self.config.policy_digest.clone(),
                                name: dep.name.clone(),
                                version: dep.version.clone(),
                                recipe_digest: dep.recipe_digest.clone(),
                            })
                        })
                        .collect::<Result<Vec<_>, _>>()?;
                    dag.push(DagNode {
                        id: id.clone(),
                        kind: ArtifactType::Pack,
                        action: PlanAction::Build,
                        inputs,
                        metadata: serde_json::json!({
                            "name": pack.name,
                            "version": pack.version,
                        }),
                    });
                }
                pack_ids.push(id);
            }

            let wheel_key = WheelKey::new(
                refinery_artifact::sha256_bytes(
                    format!("{}=={}", node.name, node.version).as_bytes(),
                ),
                python_tag.to_string(),
                self.config.platform_tag.clone(),
                runtime_id.digest.clone(),
                pack_ids.iter().map(|id| id.digest.clone()).collect(),
                self.config.build_frontend.clone(),
                String::new(),
                self.config.repair_tool.clone(),
                self.config.repair_rules_hash.clone(),
            );
            let wheel_id = ArtifactId::wheel(&wheel_key)?;
            let mut inputs = vec![runtime_id.clone()];
            inputs.extend(pack_ids);
            dag.push(DagNode {
                id: wheel_id,
                kind: ArtifactType::Wheel,
                action: node.action,
                inputs,
                metadata: serde_json::json!({
                    "name": node.name,
                    "version": node.version,
                    "reuse": node.action == PlanAction::Reuse,
                }),
            });
        }

        Ok(dag)
    }
}

fn scan_wheel_dir(
    dir: &Path,
) -> Result<Vec<(WheelFilename, std::path::PathBuf)>, PlannerError> {
    let mut wheels = Vec::new();
    let entries = match fs_err::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(wheels),
        Err(err) => return Err(PlannerError::Io(dir.display().to_string(), err)),
    };
    for entry in entries {
        let entry = entry.map_err(|err| PlannerError::Io(dir.display().to_string(), err))?;
        let path = entry.path();
        let Some(filename) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        if !filename.ends_with(".whl") {
            continue;
        }
        wheels.push((filename.parse::<WheelFilename>()?, path));
    }
    wheels.sort_by(|a, b| a.0.name.cmp(&b.0.name).then(a.0.version.cmp(&b.0.version)));
    Ok(wheels)
}

fn new_run_id() -> String {
    let mut rng = rand::thread_rng();
    (0..RUN_ID_LEN)
        .map(|_| RUN_ID_CHARS[rng.gen_range(0..RUN_ID_CHARS.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use zip::write::SimpleFileOptions;

    use crate::{IndexProtocol, PackCatalogEntry};

    use super::*;

    fn config() -> PlannerConfig {
        PlannerConfig {
            python_version: "3.11".to_string(),
            platform_tag: "manylinux2014_s390x".to_string(),
            index_url: Url::parse("https://mirror.example.com/simple").unwrap(),
            upgrade: UpgradeStrategy::Pinned,
            arch: "s390x".to_string(),
            policy_digest: "sha256:policy".to_string(),
            toolchain: "gcc-12".to_string(),
            build_frontend: "build-1.2.1".to_string(),
            repair_tool: "auditwheel-6.1".to_string(),
            repair_rules_hash: "sha256:rules".to_string(),
            catalog: PackCatalog::default(),
        }
    }

    fn planner(config: PlannerConfig) -> Planner {
        Planner::new(config).unwrap()
    }

    fn write_wheel(dir: &Path, filename: &str, requires: &[&str]) {
        let stem = filename.strip_suffix(".whl").unwrap();
        let mut parts = stem.split('-');
        let name = parts.next().unwrap();
        let version = parts.next().unwrap();
        let file = std::fs::File::create(dir.join(filename)).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        writer
            .start_file(format!("{name}-{version}.dist-info/METADATA"), options)
            .unwrap();
        let mut metadata = format!("Metadata-Version: 2.1\nName: {name}\nVersion: {version}\n");
        for requirement in requires {
            metadata.push_str(&format!("Requires-Dist: {requirement}\n"));
        }
        writer.write_all(metadata.as_bytes()).unwrap();
        writer.finish().unwrap();
    }

    #[tokio::test]
    async fn empty_inputs_yield_an_empty_plan() {
        let snapshot = planner(config()).plan(None, None, None).await.unwrap();
        assert!(snapshot.plan.is_empty());
        assert_eq!(snapshot.run_id.len(), RUN_ID_LEN);
        assert!(snapshot
            .run_id
            .bytes()
            .all(|b| RUN_ID_CHARS.contains(&b)));
        // Only the runtime node is present.
        assert_eq!(snapshot.dag.len(), 1);
    }

    #[tokio::test]
    async fn pure_wheel_plans_as_reuse() {
        let dir = tempfile::tempdir().unwrap();
        write_wheel(dir.path(), "purepkg-1.0.0-py3-none-any.whl", &[]);
        let snapshot = planner(config())
            .plan(None, None, Some(dir.path()))
            .await
            .unwrap();
        assert_eq!(snapshot.plan.len(), 1);
        assert_eq!(snapshot.plan[0].action, PlanAction::Reuse);
        let wheel_node = snapshot.wheel_node("purepkg").unwrap();
        assert_eq!(wheel_node.action, PlanAction::Reuse);
    }

    #[tokio::test]
    async fn pinned_requirement_plans_as_build_without_the_index() {
        let snapshot = planner(config())
            .plan(Some("pkg==1.0\n"), None, None)
            .await
            .unwrap();
        assert_eq!(snapshot.plan.len(), 1);
        assert_eq!(snapshot.plan[0].name, "pkg");
        assert_eq!(snapshot.plan[0].version, "1.0");
        assert_eq!(snapshot.plan[0].action, PlanAction::Build);
        assert_eq!(snapshot.plan[0].python_tag, "cp311");

        let wheel_node = snapshot.wheel_node("pkg").unwrap();
        let runtime_inputs: Vec<_> = snapshot
            .inputs_of(wheel_node, ArtifactType::Runtime)
            .collect();
        assert_eq!(runtime_inputs.len(), 1);
    }

    #[tokio::test]
    async fn unresolvable_dependency_becomes_latest() {
        // The configured index host is unsupported, so resolution fails.
        let snapshot = planner(config())
            .plan(Some("mystery\n"), None, None)
            .await
            .unwrap();
        assert_eq!(snapshot.plan[0].version, "latest");
    }

    #[tokio::test]
    async fn constraints_pin_unpinned_requirements() {
        let snapshot = planner(config())
            .plan(Some("mystery\n"), Some("mystery==9.9.9\n"), None)
            .await
            .unwrap();
        assert_eq!(snapshot.plan[0].version, "9.9.9");
    }

    #[tokio::test]
    async fn wheel_metadata_dependencies_join_the_plan() {
        let dir = tempfile::tempdir().unwrap();
        write_wheel(
            dir.path(),
            "native-2.0-cp311-cp311-manylinux2014_x86_64.whl",
            &["helper (==0.5)"],
        );
        let snapshot = planner(config())
            .plan(None, None, Some(dir.path()))
            .await
            .unwrap();
        assert_eq!(snapshot.plan.len(), 2);
        assert_eq!(snapshot.plan[0].name, "native");
        assert_eq!(snapshot.plan[0].action, PlanAction::Build);
        assert_eq!(snapshot.plan[1].name, "helper");
        assert_eq!(snapshot.plan[1].version, "0.5");
    }

    #[tokio::test]
    async fn duplicate_wheels_are_planned_once() {
        let dir = tempfile::tempdir().unwrap();
        write_wheel(dir.path(), "dup-1.0-py3-none-any.whl", &[]);
        write_wheel(dir.path(), "dup-1.0-1-py3-none-any.whl", &[]);
        let snapshot = planner(config())
            .plan(None, None, Some(dir.path()))
            .await
            .unwrap();
        assert_eq!(snapshot.plan.len(), 1);
    }

    #[tokio::test]
    async fn packs_selected_from_the_catalog_become_wheel_inputs() {
        let mut cfg = config();
        cfg.catalog = PackCatalog {
            entries: vec![
                PackCatalogEntry {
                    name: "zlib".to_string(),
                    version: "1.3".to_string(),
                    matches: vec!["pillow".to_string()],
                    backend: None,
                    recipe_digest: "sha256:zlib-recipe".to_string(),
                    depends_on: vec![],
                },
                PackCatalogEntry {
                    name: "jpeg".to_string(),
                    version: "9e".to_string(),
                    matches: vec!["pillow".to_string()],
                    backend: None,
                    recipe_digest: "sha256:jpeg-recipe".to_string(),
                    depends_on: vec!["zlib".to_string()],
                },
            ],
        };
        let snapshot = planner(cfg)
            .plan(Some("pillow==10.3.0\n"), None, None)
            .await
            .unwrap();
        let wheel_node = snapshot.wheel_node("pillow").unwrap();
        let packs: Vec<_> = snapshot.inputs_of(wheel_node, ArtifactType::Pack).collect();
        assert_eq!(packs.len(), 2);
        // Pack nodes are in the DAG with their own dependency edges.
        let pack_nodes: Vec<_> = snapshot
            .dag
            .iter()
            .filter(|node| node.kind == ArtifactType::Pack)
            .collect();
        assert_eq!(pack_nodes.len(), 2);
        assert!(pack_nodes.iter().any(|node| !node.inputs.is_empty()));
    }

    #[tokio::test]
    async fn catalog_cycles_fail_the_plan() {
        let mut cfg = config();
        cfg.catalog = PackCatalog {
            entries: vec![
                PackCatalogEntry {
                    name: "a".to_string(),
                    version: "1".to_string(),
                    matches: vec!["pkg".to_string()],
                    backend: None,
                    recipe_digest: String::new(),
                    depends_on: vec!["b".to_string()],
                },
                PackCatalogEntry {
                    name: "b".to_string(),
                    version: "1".to_string(),
                    matches: vec![],
                    backend: None,
                    recipe_digest: String::new(),
                    depends_on: vec!["a".to_string()],
                },
            ],
        };
        let err = planner(cfg)
            .plan(Some("pkg==1.0\n"), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PlannerError::PackCycle(_)));
    }

    #[tokio::test]
    async fn mirror_with_pypi_protocol_resolves() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pypi/requests/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "info": {"version": "2.32.3"},
            })))
            .mount(&server)
            .await;

        let cfg = config();
        let index = IndexClient::with_protocol(
            Url::parse(&server.uri()).unwrap(),
            IndexProtocol::PypiJson,
        )
        .unwrap();
        let snapshot = Planner::with_index(cfg, index)
            .plan(Some("requests\n"), None, None)
            .await
            .unwrap();
        assert_eq!(snapshot.plan[0].version, "2.32.3");
    }
}
