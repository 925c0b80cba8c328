//! Auto-fix engine: mine a failed build's log tail for known failure
//! patterns and convert them into install recipes for a hint-driven retry.
//!
//! Cataloged hints are consulted first; the fixed inference library only
//! fires when no cataloged hint matched. Recipe tokens are scoped by package
//! manager, e.g. `apt:zlib1g-dev`, `pip:requests`.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use sha2::{Digest, Sha256};

use refinery_types::Hint;

mod tables;

use tables::{header_packages, tool_packages};

/// Job facets a hint's `applies_to` constraints are evaluated against.
#[derive(Debug, Clone, Default)]
pub struct JobContext {
    pub package: String,
    pub version: String,
    pub python_version: String,
    pub python_tag: String,
    pub platform_tag: String,
}

impl JobContext {
    fn facet(&self, key: &str) -> Option<&str> {
        match key {
            "package" | "name" => Some(&self.package),
            "version" => Some(&self.version),
            "python_version" => Some(&self.python_version),
            "python_tag" => Some(&self.python_tag),
            "platform_tag" => Some(&self.platform_tag),
            _ => None,
        }
    }
}

/// Result of one analysis pass.
#[derive(Debug, Default)]
pub struct AutoFix {
    /// Scoped recipe tokens, ordered as discovered.
    pub recipes: Vec<String>,
    /// Ids of cataloged hints that matched.
    pub matched_hint_ids: Vec<String>,
    /// Hints synthesized by the inference pass, candidates for auto-save.
    pub synthesized: Vec<Hint>,
}

impl AutoFix {
    pub fn is_empty(&self) -> bool {
        self.recipes.is_empty()
    }
}

/// Analyze a failure log tail against the hint catalog and, failing that,
/// the built-in inference library.
pub fn analyze(log_tail: &str, hints: &[Hint], ctx: &JobContext) -> AutoFix {
    let mut fix = AutoFix::default();

    for hint in hints {
        if hint.is_deleted() || !applies(hint, ctx) {
            continue;
        }
        let Ok(pattern) = Regex::new(&hint.pattern) else {
            tracing::warn!("hint {} has an uncompilable pattern, skipping", hint.id);
            continue;
        };
        if pattern.is_match(log_tail) {
            fix.matched_hint_ids.push(hint.id.clone());
            fix.recipes.extend(recipe_tokens(&hint.recipes));
        }
    }

    if fix.matched_hint_ids.is_empty() {
        infer(log_tail, ctx, &mut fix);
    }

    fix
}

/// Merge inferred recipe tokens into a job's existing list: dedup preserving
/// order, case-insensitive. Returns the merged list and whether it grew.
pub fn merge_recipes(existing: &[String], inferred: &[String]) -> (Vec<String>, bool) {
    let mut merged: Vec<String> = Vec::new();
    let mut seen: Vec<String> = Vec::new();
    for token in existing.iter().chain(inferred) {
        let key = token.to_lowercase();
        if !token.is_empty() && !seen.contains(&key) {
            seen.push(key);
            merged.push(token.clone());
        }
    }
    let grew = merged.len() > existing.len();
    (merged, grew)
}

fn applies(hint: &Hint, ctx: &JobContext) -> bool {
    hint.applies_to.iter().all(|(facet, allowed)| {
        allowed.is_empty()
            || ctx.facet(facet).is_some_and(|value| {
                allowed
                    .iter()
                    .any(|candidate| candidate.eq_ignore_ascii_case(value))
            })
    })
}

fn recipe_tokens(recipes: &BTreeMap<String, Vec<String>>) -> Vec<String> {
    recipes
        .iter()
        .flat_map(|(manager, packages)| {
            packages
                .iter()
                .map(move |package| format!("{manager}:{package}"))
        })
        .collect()
}

struct InferencePatterns {
    module: Regex,
    header: Regex,
    library: Regex,
    tool: Regex,
}

fn patterns() -> &'static InferencePatterns {
    static PATTERNS: OnceLock<InferencePatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| InferencePatterns {
        module: Regex::new(r"ModuleNotFoundError: No module named '([A-Za-z0-9_.\-]+)'")
            .unwrap(),
        header: Regex::new(r"fatal error: ([A-Za-z0-9_./\-]+)\.h: No such file or directory")
            .unwrap(),
        library: Regex::new(r"cannot find -l([A-Za-z0-9_\-]+)").unwrap(),
        tool: Regex::new(r"([A-Za-z0-9_+\-]+): command not found").unwrap(),
    })
}

fn infer(log_tail: &str, ctx: &JobContext, fix: &mut AutoFix) {
    let patterns = patterns();

    if let Some(captures) = patterns.module.captures(log_tail) {
        let module = captures[1].to_string();
        let recipes = BTreeMap::from([("pip".to_string(), vec![module.clone()])]);
        push_synthesized(
            fix,
            patterns.module.as_str(),
            recipes,
            format!("python module `{module}` missing at build time"),
            vec!["auto".to_string(), "python".to_string()],
            ctx,
        );
    }

    if let Some(captures) = patterns.header.captures(log_tail) {
        let header = captures[1].rsplit('/').next().unwrap_or(&captures[1]);
        let (apt, dnf) = header_packages(header);
        let recipes = BTreeMap::from([
            ("apt".to_string(), vec![apt]),
            ("dnf".to_string(), vec![dnf]),
        ]);
        push_synthesized(
            fix,
            patterns.header.as_str(),
            recipes,
            format!("development headers for `{header}.h` missing"),
            vec!["auto".to_string(), "headers".to_string()],
            ctx,
        );
    }

    if let Some(captures) = patterns.library.captures(log_tail) {
        let library = &captures[1];
        let (apt, dnf) = header_packages(library);
        let recipes = BTreeMap::from([
            ("apt".to_string(), vec![apt]),
            ("dnf".to_string(), vec![dnf]),
        ]);
        push_synthesized(
            fix,
            patterns.library.as_str(),
            recipes,
            format!("linker could not find -l{library}"),
            vec!["auto".to_string(), "linker".to_string()],
            ctx,
        );
    }

    if let Some(captures) = patterns.tool.captures(log_tail) {
        if let Some((apt, dnf)) = tool_packages(&captures[1]) {
            let recipes = BTreeMap::from([
                ("apt".to_string(), vec![apt.to_string()]),
                ("dnf".to_string(), vec![dnf.to_string()]),
            ]);
            push_synthesized(
                fix,
                patterns.tool.as_str(),
                recipes,
                format!("build tool `{}` missing", &captures[1]),
                vec!["auto".to_string(), "tooling".to_string()],
                ctx,
            );
        }
    }
}

fn push_synthesized(
    fix: &mut AutoFix,
    pattern: &str,
    recipes: BTreeMap<String, Vec<String>>,
    note: String,
    tags: Vec<String>,
    ctx: &JobContext,
) {
    fix.recipes.extend(recipe_tokens(&recipes));
    let mut applies_to = BTreeMap::new();
    if !ctx.platform_tag.is_empty() {
        applies_to.insert("platform_tag".to_string(), vec![ctx.platform_tag.clone()]);
    }
    let hint = Hint {
        id: synthesized_id(pattern, &tags, &recipes, ctx),
        pattern: pattern.to_string(),
        recipes,
        note,
        tags,
        severity: "warn".to_string(),
        applies_to,
        confidence: "medium".to_string(),
        ..Hint::default()
    };
    fix.synthesized.push(hint);
}

/// Stable id for a synthesized hint: sha256 over the pattern, tags, recipes
/// and context facets, truncated to 12 hex characters.
fn synthesized_id(
    pattern: &str,
    tags: &[String],
    recipes: &BTreeMap<String, Vec<String>>,
    ctx: &JobContext,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(pattern.as_bytes());
    for tag in tags {
        hasher.update(tag.as_bytes());
    }
    if let Ok(bytes) = serde_json::to_vec(recipes) {
        hasher.update(&bytes);
    }
    hasher.update(ctx.python_tag.as_bytes());
    hasher.update(ctx.platform_tag.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("auto-{}", &digest[..12])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> JobContext {
        JobContext {
            package: "pillow".to_string(),
            version: "10.3.0".to_string(),
            python_version: "3.11".to_string(),
            python_tag: "cp311".to_string(),
            platform_tag: "manylinux2014_s390x".to_string(),
        }
    }

    #[test]
    fn missing_zlib_header_yields_apt_and_dnf_recipes() {
        let fix = analyze(
            "gcc -c foo.c\nfatal error: zlib.h: No such file or directory",
            &[],
            &ctx(),
        );
        assert!(fix.recipes.contains(&"apt:zlib1g-dev".to_string()));
        assert!(fix.recipes.contains(&"dnf:zlib-devel".to_string()));
        assert_eq!(fix.synthesized.len(), 1);
        assert!(fix.matched_hint_ids.is_empty());
    }

    #[test]
    fn missing_module_yields_pip_recipe() {
        let fix = analyze(
            "ModuleNotFoundError: No module named 'setuptools_scm'",
            &[],
            &ctx(),
        );
        assert_eq!(fix.recipes, vec!["pip:setuptools_scm"]);
    }

    #[test]
    fn missing_linker_library_uses_the_header_table() {
        let fix = analyze("/usr/bin/ld: cannot find -lz", &[], &ctx());
        assert!(fix.recipes.contains(&"apt:zlib1g-dev".to_string()));
    }

    #[test]
    fn missing_tool_is_recognized_from_allowlist() {
        let fix = analyze("sh: cmake: command not found", &[], &ctx());
        assert!(fix.recipes.contains(&"apt:cmake".to_string()));

        let unknown = analyze("sh: frobnicate: command not found", &[], &ctx());
        assert!(unknown.is_empty());
    }

    #[test]
    fn unknown_header_falls_back_to_dev_package_guess() {
        let fix = analyze(
            "fatal error: foobar.h: No such file or directory",
            &[],
            &ctx(),
        );
        assert!(fix.recipes.contains(&"apt:libfoobar-dev".to_string()));
        assert!(fix.recipes.contains(&"dnf:foobar-devel".to_string()));
    }

    #[test]
    fn cataloged_hint_preempts_inference() {
        let hint = Hint {
            id: "zlib-headers".to_string(),
            pattern: r"zlib\.h".to_string(),
            recipes: BTreeMap::from([("apt".to_string(), vec!["zlib1g-dev".to_string()])]),
            note: "zlib headers".to_string(),
            ..Hint::default()
        };
        let fix = analyze(
            "fatal error: zlib.h: No such file or directory",
            &[hint],
            &ctx(),
        );
        assert_eq!(fix.matched_hint_ids, vec!["zlib-headers"]);
        assert_eq!(fix.recipes, vec!["apt:zlib1g-dev"]);
        assert!(fix.synthesized.is_empty());
    }

    #[test]
    fn applies_to_gates_cataloged_hints() {
        let hint = Hint {
            id: "x86-only".to_string(),
            pattern: "error".to_string(),
            recipes: BTreeMap::from([("apt".to_string(), vec!["gcc".to_string()])]),
            note: "only on x86".to_string(),
            applies_to: BTreeMap::from([(
                "platform_tag".to_string(),
                vec!["manylinux2014_x86_64".to_string()],
            )]),
            ..Hint::default()
        };
        let fix = analyze("error: something", &[hint], &ctx());
        assert!(fix.matched_hint_ids.is_empty());
    }

    #[test]
    fn synthesized_ids_are_stable() {
        let a = analyze("cannot find -lssl", &[], &ctx());
        let b = analyze("cannot find -lssl", &[], &ctx());
        assert_eq!(a.synthesized[0].id, b.synthesized[0].id);
        assert!(a.synthesized[0].id.starts_with("auto-"));
        assert_eq!(a.synthesized[0].id.len(), "auto-".len() + 12);
    }

    #[test]
    fn merge_dedups_case_insensitively_and_reports_growth() {
        let existing = vec!["apt:zlib1g-dev".to_string()];
        let inferred = vec!["APT:ZLIB1G-DEV".to_string(), "dnf:zlib-devel".to_string()];
        let (merged, grew) = merge_recipes(&existing, &inferred);
        assert_eq!(merged, vec!["apt:zlib1g-dev", "dnf:zlib-devel"]);
        assert!(grew);

        let (_, grew_again) = merge_recipes(&merged, &inferred);
        assert!(!grew_again);
    }
}
