//! Build log entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-entry content cap; larger ingests are rejected with 413.
pub const MAX_LOG_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub name: String,
    pub version: String,
    pub content: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl LogEntry {
    pub fn oversized(&self) -> bool {
        self.content.len() > MAX_LOG_BYTES
    }

    /// Last `n` lines of the content, for failure mining.
    pub fn tail(&self, n: usize) -> String {
        let lines: Vec<&str> = self.content.lines().collect();
        let start = lines.len().saturating_sub(n);
        lines[start..].join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_keeps_last_lines() {
        let entry = LogEntry {
            name: "pkg".to_string(),
            version: "1.0".to_string(),
            content: (1..=300).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n"),
            timestamp: None,
        };
        let tail = entry.tail(200);
        assert!(tail.starts_with("line 101"));
        assert!(tail.ends_with("line 300"));
    }

    #[test]
    fn oversize_detection() {
        let entry = LogEntry {
            name: "pkg".to_string(),
            version: "1.0".to_string(),
            content: "x".repeat(MAX_LOG_BYTES + 1),
            timestamp: None,
        };
        assert!(entry.oversized());
    }
}
