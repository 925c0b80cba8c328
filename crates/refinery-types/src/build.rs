//! Build-status rows and the queue payload that references them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State of a `build_status` row, serialized as the `status` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    Pending,
    Retry,
    Building,
    Built,
    Failed,
}

impl BuildStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Retry => "retry",
            Self::Building => "building",
            Self::Built => "built",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for BuildStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "retry" => Ok(Self::Retry),
            "building" => Ok(Self::Building),
            "built" => Ok(Self::Built),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown build status `{other}`")),
        }
    }
}

/// A durable build-status row. Unique by (package, version).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildRow {
    #[serde(default)]
    pub id: i64,
    pub package: String,
    pub version: String,
    pub python_tag: String,
    pub platform_tag: String,
    pub status: BuildStatus,
    #[serde(default)]
    pub attempts: i32,
    #[serde(default)]
    pub backoff_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: String,
    #[serde(default)]
    pub recipes: Vec<String>,
    #[serde(default)]
    pub hint_ids: Vec<String>,
    #[serde(default)]
    pub run_id: String,
    #[serde(default)]
    pub plan_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Status a worker reports for a leased row: `building` right before
/// execution, then exactly one terminal outcome.
///
/// A retry carries the recipes merged by the auto-fix pass (and the hint ids
/// that matched) so the next lease hands them back to whichever worker picks
/// the row up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "outcome")]
pub enum BuildOutcome {
    Building,
    Built,
    Retry {
        error: String,
        #[serde(default)]
        recipes: Vec<String>,
        #[serde(default)]
        hint_ids: Vec<String>,
    },
    Failed {
        error: String,
    },
}

/// The message enqueued on the build-request queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildRequest {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub python_version: String,
    #[serde(default)]
    pub python_tag: String,
    #[serde(default)]
    pub platform_tag: String,
    #[serde(default)]
    pub recipes: Vec<String>,
    #[serde(default)]
    pub attempts: i32,
    #[serde(default)]
    pub enqueued_at: Option<DateTime<Utc>>,
}

impl BuildRequest {
    /// Stamp `enqueued_at` with `now` when unset.
    pub fn with_enqueue_time(mut self, now: DateTime<Utc>) -> Self {
        if self.enqueued_at.is_none() {
            self.enqueued_at = Some(now);
        }
        self
    }
}
