//! Requirements and constraints file parsing.
//!
//! This is deliberately not a full PEP 508 parser: the refinery only needs
//! the package name and an exact `==` pin when one is present. Everything
//! else (extras, markers, ranges) is recorded pinless and resolved through
//! the index.

use std::sync::OnceLock;

use regex::Regex;

use refinery_filename::normalize_name;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequirementSpec {
    pub name: String,
    pub pin: Option<String>,
}

fn pin_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"==\s*([0-9][A-Za-z0-9.\-_+!]*)").unwrap())
}

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^([A-Za-z0-9][A-Za-z0-9._\-]*)").unwrap())
}

/// Parse a requirements or constraints file body.
pub fn parse_requirements(text: &str) -> Vec<RequirementSpec> {
    let mut specs = Vec::new();
    for raw_line in text.lines() {
        let line = match raw_line.split_once('#') {
            Some((before, _comment)) => before.trim(),
            None => raw_line.trim(),
        };
        if line.is_empty() || line.starts_with('-') {
            // Skip blanks and pip options (-r, -c, --index-url, ...).
            continue;
        }
        let Some(name_match) = name_pattern().captures(line) else {
            tracing::debug!("skipping unparseable requirement line `{line}`");
            continue;
        };
        let name = normalize_name(&name_match[1]);
        let pin = pin_pattern()
            .captures(line)
            .map(|captures| captures[1].to_string());
        specs.push(RequirementSpec { name, pin });
    }
    specs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pins_comments_and_options() {
        let text = "\
# build inputs
requests==2.32.3
Flask_SQLAlchemy==3.1.1  # pinned for the ORM
numpy>=1.26
-r other.txt
--index-url https://pypi.org/simple

scipy";
        let specs = parse_requirements(text);
        assert_eq!(
            specs,
            vec![
                RequirementSpec {
                    name: "requests".to_string(),
                    pin: Some("2.32.3".to_string()),
                },
                RequirementSpec {
                    name: "flask-sqlalchemy".to_string(),
                    pin: Some("3.1.1".to_string()),
                },
                RequirementSpec {
                    name: "numpy".to_string(),
                    pin: None,
                },
                RequirementSpec {
                    name: "scipy".to_string(),
                    pin: None,
                },
            ]
        );
    }

    #[test]
    fn extras_and_markers_do_not_confuse_the_name() {
        let specs = parse_requirements("uvicorn[standard]==0.30.1 ; python_version >= \"3.9\"");
        assert_eq!(specs[0].name, "uvicorn");
        assert_eq!(specs[0].pin.as_deref(), Some("0.30.1"));
    }

    #[test]
    fn empty_input_yields_no_specs() {
        assert!(parse_requirements("").is_empty());
        assert!(parse_requirements("# only a comment\n").is_empty());
    }
}
