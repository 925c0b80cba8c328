//! Plan snapshots: the flat plan the worker iterates and the content-addressed
//! DAG it resolves artifacts from.

use serde::{Deserialize, Serialize};

use refinery_artifact::{ArtifactId, ArtifactType};
use refinery_filename::PlanAction;

/// One row of the flat plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanNode {
    pub name: String,
    pub version: String,
    pub python_version: String,
    pub python_tag: String,
    pub platform_tag: String,
    pub action: PlanAction,
}

/// One node of the artifact DAG. Edges point at inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DagNode {
    pub id: ArtifactId,
    #[serde(rename = "type")]
    pub kind: ArtifactType,
    pub action: PlanAction,
    #[serde(default)]
    pub inputs: Vec<ArtifactId>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// A persisted plan: the unit the worker acts upon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanSnapshot {
    #[serde(default)]
    pub id: i64,
    pub run_id: String,
    pub plan: Vec<PlanNode>,
    #[serde(default)]
    pub dag: Vec<DagNode>,
}

impl PlanSnapshot {
    /// Find the DAG wheel node whose metadata names this package, along with
    /// its runtime input and pack inputs.
    pub fn wheel_node(&self, name: &str) -> Option<&DagNode> {
        let name = refinery_filename::normalize_name(name);
        self.dag.iter().find(|node| {
            node.kind == ArtifactType::Wheel
                && node
                    .metadata
                    .get("name")
                    .and_then(|v| v.as_str())
                    .is_some_and(|n| refinery_filename::normalize_name(n) == name)
        })
    }

    /// Inputs of `node` of the given artifact type, in DAG order.
    pub fn inputs_of<'a>(
        &'a self,
        node: &'a DagNode,
        kind: ArtifactType,
    ) -> impl Iterator<Item = &'a ArtifactId> {
        node.inputs.iter().filter(move |input| input.kind == kind)
    }
}
