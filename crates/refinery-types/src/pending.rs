//! Pending inputs: uploaded requirement sets awaiting planning.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a pending input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingStatus {
    Pending,
    Planning,
    Planned,
    Queued,
    BuildQueued,
    Failed,
    Deleted,
}

impl PendingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Planning => "planning",
            Self::Planned => "planned",
            Self::Queued => "queued",
            Self::BuildQueued => "build_queued",
            Self::Failed => "failed",
            Self::Deleted => "deleted",
        }
    }
}

impl std::str::FromStr for PendingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "planning" => Ok(Self::Planning),
            "planned" => Ok(Self::Planned),
            "queued" => Ok(Self::Queued),
            "build_queued" => Ok(Self::BuildQueued),
            "failed" => Ok(Self::Failed),
            "deleted" => Ok(Self::Deleted),
            other => Err(format!("unknown pending status `{other}`")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingInput {
    #[serde(default)]
    pub id: i64,
    pub filename: String,
    pub digest: String,
    #[serde(default)]
    pub size: i64,
    pub status: PendingStatus,
    #[serde(default)]
    pub source_type: String,
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default)]
    pub loaded_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub planned_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_uses_snake_case_on_the_wire() {
        let json = serde_json::to_string(&PendingStatus::BuildQueued).unwrap();
        assert_eq!(json, "\"build_queued\"");
        assert_eq!(
            "build_queued".parse::<PendingStatus>().unwrap(),
            PendingStatus::BuildQueued
        );
    }
}
