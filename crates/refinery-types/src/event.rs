//! Append-only build events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(default)]
    pub run_id: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub python_tag: String,
    #[serde(default)]
    pub platform_tag: String,
    pub status: String,
    #[serde(default)]
    pub detail: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default)]
    pub matched_hint_ids: Vec<String>,
    #[serde(default)]
    pub duration_ms: i64,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Filter for reading back events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFilter {
    #[serde(default)]
    pub package: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}
