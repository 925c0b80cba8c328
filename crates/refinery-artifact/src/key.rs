//! Canonical key structures behind each artifact digest.
//!
//! Field order in these structs is load-bearing: the digest is computed over
//! the serialized JSON, and serde emits fields in declaration order. Reorder a
//! field and every previously published digest changes.

use serde::Serialize;

use crate::{canonical_digest, Error};

/// Key for a prebuilt interpreter runtime bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuntimeKey {
    pub arch: String,
    pub policy_digest: String,
    pub python_version: String,
    pub build_flags: Vec<String>,
    pub toolchain: String,
    pub deps_hash: String,
}

impl RuntimeKey {
    pub fn digest(&self) -> Result<String, Error> {
        canonical_digest(self)
    }
}

/// Key for a prebuilt native dependency pack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackKey {
    pub arch: String,
    pub policy_digest: String,
    pub name: String,
    pub version: String,
    pub recipe_digest: String,
}

impl PackKey {
    pub fn digest(&self) -> Result<String, Error> {
        canonical_digest(self)
    }
}

/// Key for a built wheel.
///
/// `pack_digests` is sorted at construction so that permutations of the same
/// pack set address the same wheel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WheelKey {
    pub source_digest: String,
    pub python_tag: String,
    pub platform_tag: String,
    pub runtime_digest: String,
    pack_digests: Vec<String>,
    pub build_frontend: String,
    pub config_digest: String,
    pub repair_tool: String,
    pub repair_rules_hash: String,
}

impl WheelKey {
    pub fn new(
        source_digest: String,
        python_tag: String,
        platform_tag: String,
        runtime_digest: String,
        mut pack_digests: Vec<String>,
        build_frontend: String,
        config_digest: String,
        repair_tool: String,
        repair_rules_hash: String,
    ) -> Self {
        pack_digests.sort_unstable();
        Self {
            source_digest,
            python_tag,
            platform_tag,
            runtime_digest,
            pack_digests,
            build_frontend,
            config_digest,
            repair_tool,
            repair_rules_hash,
        }
    }

    pub fn pack_digests(&self) -> &[String] {
        &self.pack_digests
    }

    pub fn digest(&self) -> Result<String, Error> {
        canonical_digest(self)
    }
}

/// Key for a repaired (policy-compliant) wheel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepairKey {
    pub wheel_digest: String,
    pub repair_tool: String,
    pub rules_digest: String,
}

impl RepairKey {
    pub fn digest(&self) -> Result<String, Error> {
        canonical_digest(self)
    }
}
