//! Fix hints: a stored pattern + recipe + scope triple used to match build
//! failures and produce fix recipes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const ALLOWED_SEVERITIES: &[&str] = &["info", "warn", "warning", "error"];
const ALLOWED_CONFIDENCES: &[&str] = &["low", "medium", "high"];

#[derive(Debug, thiserror::Error)]
pub enum HintError {
    #[error("hint id must not be empty")]
    EmptyId,
    #[error("hint `{0}` has an empty note")]
    EmptyNote(String),
    #[error("hint `{0}` has an invalid pattern: {1}")]
    BadPattern(String, #[source] regex::Error),
    #[error("hint `{0}` has no recipes")]
    NoRecipes(String),
    #[error("hint `{0}` has unknown severity `{1}`")]
    BadSeverity(String, String),
    #[error("hint `{0}` has unparseable confidence `{1}`")]
    BadConfidence(String, String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Hint {
    pub id: String,
    pub pattern: String,
    /// Package-manager name (apt, dnf, pip, env) to ordered install tokens.
    #[serde(default)]
    pub recipes: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub severity: String,
    /// Facet (python_tag, platform_tag, package, ...) to allowed values.
    #[serde(default)]
    pub applies_to: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub confidence: String,
    #[serde(default)]
    pub examples: Vec<String>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Hint {
    /// Check the invariants a hint must satisfy before it is persisted.
    pub fn validate(&self) -> Result<(), HintError> {
        if self.id.is_empty() {
            return Err(HintError::EmptyId);
        }
        if self.note.is_empty() {
            return Err(HintError::EmptyNote(self.id.clone()));
        }
        regex::Regex::new(&self.pattern)
            .map_err(|err| HintError::BadPattern(self.id.clone(), err))?;
        if !self.recipes.values().any(|tokens| !tokens.is_empty()) {
            return Err(HintError::NoRecipes(self.id.clone()));
        }
        if !self.severity.is_empty() && !ALLOWED_SEVERITIES.contains(&self.severity.as_str()) {
            return Err(HintError::BadSeverity(
                self.id.clone(),
                self.severity.clone(),
            ));
        }
        if !self.confidence.is_empty()
            && !ALLOWED_CONFIDENCES.contains(&self.confidence.as_str())
            && !self
                .confidence
                .parse::<f64>()
                .is_ok_and(|v| (0.0..=1.0).contains(&v))
        {
            return Err(HintError::BadConfidence(
                self.id.clone(),
                self.confidence.clone(),
            ));
        }
        Ok(())
    }

    /// Canonicalize a hint in place. Idempotent: normalizing twice is the
    /// same as normalizing once.
    pub fn normalize(mut self) -> Self {
        self.id = self.id.trim().to_string();
        self.note = self.note.trim().to_string();
        self.severity = self.severity.trim().to_lowercase();
        self.confidence = self.confidence.trim().to_lowercase();
        self.tags = dedup_lowercase(&self.tags);
        for tokens in self.recipes.values_mut() {
            *tokens = dedup_preserving_order(tokens);
        }
        self
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

fn dedup_lowercase(values: &[String]) -> Vec<String> {
    let lowered: Vec<String> = values.iter().map(|v| v.trim().to_lowercase()).collect();
    dedup_preserving_order(&lowered)
}

/// Dedup preserving first-seen order, comparing case-insensitively.
pub(crate) fn dedup_preserving_order(values: &[String]) -> Vec<String> {
    let mut seen = Vec::new();
    let mut out = Vec::new();
    for value in values {
        let key = value.to_lowercase();
        if !value.is_empty() && !seen.contains(&key) {
            seen.push(key);
            out.push(value.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hint() -> Hint {
        Hint {
            id: "zlib-headers".to_string(),
            pattern: r"fatal error: zlib\.h".to_string(),
            recipes: BTreeMap::from([
                ("apt".to_string(), vec!["zlib1g-dev".to_string()]),
                ("dnf".to_string(), vec!["zlib-devel".to_string()]),
            ]),
            note: "zlib headers missing".to_string(),
            ..Hint::default()
        }
    }

    #[test]
    fn valid_hint_passes() {
        hint().validate().unwrap();
    }

    #[test]
    fn empty_id_fails() {
        let mut h = hint();
        h.id = String::new();
        assert!(matches!(h.validate(), Err(HintError::EmptyId)));
    }

    #[test]
    fn bad_regex_fails() {
        let mut h = hint();
        h.pattern = "(".to_string();
        assert!(matches!(h.validate(), Err(HintError::BadPattern(..))));
    }

    #[test]
    fn empty_recipes_fail() {
        let mut h = hint();
        h.recipes = BTreeMap::from([("apt".to_string(), vec![])]);
        assert!(matches!(h.validate(), Err(HintError::NoRecipes(..))));
    }

    #[test]
    fn numeric_confidence_is_accepted() {
        let mut h = hint();
        h.confidence = "0.85".to_string();
        h.validate().unwrap();
        h.confidence = "1.5".to_string();
        assert!(matches!(h.validate(), Err(HintError::BadConfidence(..))));
    }

    #[test]
    fn severity_allowlist() {
        let mut h = hint();
        h.severity = "warning".to_string();
        h.validate().unwrap();
        h.severity = "fatal".to_string();
        assert!(matches!(h.validate(), Err(HintError::BadSeverity(..))));
    }

    #[test]
    fn normalize_is_idempotent() {
        let mut h = hint();
        h.tags = vec!["GCC".to_string(), "gcc".to_string(), " Linker ".to_string()];
        h.note = "  spaced  ".to_string();
        let once = h.clone().normalize();
        let twice = once.clone().normalize();
        assert_eq!(once, twice);
        assert_eq!(once.tags, vec!["gcc", "linker"]);
        assert_eq!(once.note, "spaced");
    }

    #[test]
    fn dedup_keeps_first_spelling() {
        let values = vec![
            "Zlib1g-dev".to_string(),
            "zlib1g-dev".to_string(),
            "libssl-dev".to_string(),
        ];
        assert_eq!(
            dedup_preserving_order(&values),
            vec!["Zlib1g-dev".to_string(), "libssl-dev".to_string()]
        );
    }
}
