//! Process-wide tunables persisted by the control plane.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub python_version: String,
    #[serde(default)]
    pub platform_tag: String,
    #[serde(default)]
    pub poll_ms: u64,
    #[serde(default)]
    pub recent_limit: i64,
    /// Absent means enabled; explicit `false` is preserved.
    #[serde(default)]
    pub auto_plan: Option<bool>,
    #[serde(default)]
    pub auto_build: Option<bool>,
    #[serde(default)]
    pub plan_pool_size: usize,
    #[serde(default)]
    pub build_pool_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            python_version: "3.11".to_string(),
            platform_tag: "manylinux2014_s390x".to_string(),
            poll_ms: 2000,
            recent_limit: 50,
            auto_plan: None,
            auto_build: None,
            plan_pool_size: 2,
            build_pool_size: 4,
        }
    }
}

impl Settings {
    /// Fill zero-valued fields with defaults. Optional booleans read as true
    /// when absent; an explicit `false` survives.
    pub fn apply_defaults(mut self) -> Self {
        let defaults = Self::default();
        if self.python_version.is_empty() {
            self.python_version = defaults.python_version;
        }
        if self.platform_tag.is_empty() {
            self.platform_tag = defaults.platform_tag;
        }
        if self.poll_ms == 0 {
            self.poll_ms = defaults.poll_ms;
        }
        if self.recent_limit == 0 {
            self.recent_limit = defaults.recent_limit;
        }
        if self.plan_pool_size == 0 {
            self.plan_pool_size = defaults.plan_pool_size;
        }
        if self.build_pool_size == 0 {
            self.build_pool_size = defaults.build_pool_size;
        }
        self
    }

    pub fn auto_plan_enabled(&self) -> bool {
        self.auto_plan.unwrap_or(true)
    }

    pub fn auto_build_enabled(&self) -> bool {
        self.auto_build.unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_booleans_read_true() {
        let settings = Settings {
            auto_plan: None,
            auto_build: None,
            ..Settings::default()
        };
        assert!(settings.auto_plan_enabled());
        assert!(settings.auto_build_enabled());
    }

    #[test]
    fn explicit_false_survives_defaults() {
        let settings: Settings = serde_json::from_str(r#"{"auto_plan": false}"#).unwrap();
        let applied = settings.apply_defaults();
        assert_eq!(applied.auto_plan, Some(false));
        assert!(!applied.auto_plan_enabled());
        assert!(applied.auto_build_enabled());
        assert_eq!(applied.poll_ms, 2000);
    }

    #[test]
    fn zeroes_pick_up_defaults() {
        let settings: Settings = serde_json::from_str("{}").unwrap();
        let applied = settings.apply_defaults();
        assert_eq!(applied.python_version, "3.11");
        assert_eq!(applied.build_pool_size, 4);
    }
}
