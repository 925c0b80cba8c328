//! End-to-end planning over mixed inputs: wheels on disk, a requirements
//! file, and a pack catalog, with version resolution through a mock index.

use std::io::Write;
use std::path::Path;

use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zip::write::SimpleFileOptions;

use refinery_artifact::ArtifactType;
use refinery_filename::PlanAction;
use refinery_planner::{
    IndexClient, IndexProtocol, PackCatalog, PackCatalogEntry, Planner, PlannerConfig,
    UpgradeStrategy,
};

fn config(catalog: PackCatalog) -> PlannerConfig {
    PlannerConfig {
        python_version: "3.11".to_string(),
        platform_tag: "manylinux2014_s390x".to_string(),
        index_url: Url::parse("https://pypi.org/simple").unwrap(),
        upgrade: UpgradeStrategy::Eager,
        arch: "s390x".to_string(),
        policy_digest: "sha256:policy".to_string(),
        toolchain: "gcc-12".to_string(),
        build_frontend: "build-1.2.1".to_string(),
        repair_tool: "auditwheel-6.1".to_string(),
        repair_rules_hash: "sha256:rules".to_string(),
        catalog,
    }
}

fn write_wheel(dir: &Path, filename: &str, requires: &[&str]) {
    let stem = filename.strip_suffix(".whl").unwrap();
    let mut parts = stem.split('-');
    let name = parts.next().unwrap();
    let version = parts.next().unwrap();
    let file = std::fs::File::create(dir.join(filename)).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
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
async fn mixed_inputs_produce_a_complete_snapshot() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/pypi/requests/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "info": {"version": "2.32.3"},
        })))
        .mount(&server)
        .await;

    let wheels = tempfile::tempdir().unwrap();
    write_wheel(wheels.path(), "purepkg-1.0.0-py3-none-any.whl", &[]);
    write_wheel(
        wheels.path(),
        "lxml-5.2.0-cp311-cp311-manylinux2014_x86_64.whl",
        &["cssselect ; extra == 'cssselect'"],
    );

    let catalog = PackCatalog {
        entries: vec![
            PackCatalogEntry {
                name: "libxml2".to_string(),
                version: "2.12".to_string(),
                matches: vec!["lxml".to_string()],
                backend: None,
                recipe_digest: "sha256:libxml2".to_string(),
                depends_on: vec!["zlib".to_string()],
            },
            PackCatalogEntry {
                name: "zlib".to_string(),
                version: "1.3".to_string(),
                matches: vec!["lxml".to_string()],
                backend: None,
                recipe_digest: "sha256:zlib".to_string(),
                depends_on: vec![],
            },
        ],
    };

    let index =
        IndexClient::with_protocol(Url::parse(&server.uri()).unwrap(), IndexProtocol::PypiJson)
            .unwrap();
    let planner = Planner::with_index(config(catalog), index);
    let snapshot = planner
        .plan(Some("requests\n"), None, Some(wheels.path()))
        .await
        .unwrap();

    // Flat plan: the two wheels first, then the resolved requirement.
    assert_eq!(snapshot.plan.len(), 3);
    let lxml = snapshot.plan.iter().find(|n| n.name == "lxml").unwrap();
    assert_eq!(lxml.action, PlanAction::Build);
    let pure = snapshot.plan.iter().find(|n| n.name == "purepkg").unwrap();
    assert_eq!(pure.action, PlanAction::Reuse);
    let requests = snapshot.plan.iter().find(|n| n.name == "requests").unwrap();
    assert_eq!(requests.version, "2.32.3");

    // DAG: lxml's wheel node carries the runtime plus both packs.
    let wheel_node = snapshot.wheel_node("lxml").unwrap();
    assert_eq!(
        snapshot
            .inputs_of(wheel_node, ArtifactType::Runtime)
            .count(),
        1
    );
    assert_eq!(snapshot.inputs_of(wheel_node, ArtifactType::Pack).count(), 2);

    // Every node id is a canonical sha256 digest.
    for node in &snapshot.dag {
        assert!(node.id.digest.starts_with("sha256:"), "{:?}", node.id);
    }
    assert_eq!(snapshot.run_id.len(), 12);
}

#[tokio::test]
async fn snapshot_round_trips_through_the_wire_format() {
    let planner = Planner::new(config(PackCatalog::default())).unwrap();
    let snapshot = planner
        .plan(Some("pkg==1.0\nother==2.0\n"), None, None)
        .await
        .unwrap();

    let wire = serde_json::to_string(&snapshot).unwrap();
    let back: refinery_types::PlanSnapshot = serde_json::from_str(&wire).unwrap();
    assert_eq!(back.plan, snapshot.plan);
    assert_eq!(back.dag, snapshot.dag);
}
