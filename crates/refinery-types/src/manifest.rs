//! Manifest entries: the user-facing record of what a build produced.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub wheel_url: String,
    #[serde(default)]
    pub repair_url: String,
    #[serde(default)]
    pub repair_digest: String,
    #[serde(default)]
    pub runtime_url: String,
    #[serde(default)]
    pub pack_urls: Vec<String>,
    #[serde(default)]
    pub python_tag: String,
    #[serde(default)]
    pub platform_tag: String,
    pub status: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}
