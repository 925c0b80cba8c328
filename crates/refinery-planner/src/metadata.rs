//! `Requires-Dist` extraction from wheel archives.

use std::io::Read;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use zip::ZipArchive;

use refinery_filename::normalize_name;

use crate::{PlannerError, RequirementSpec};

fn requires_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^Requires-Dist:\s*([A-Za-z0-9][A-Za-z0-9._\-]*)\s*(.*)$").unwrap()
    })
}

fn pin_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"==\s*([0-9][A-Za-z0-9.\-_+!]*)").unwrap())
}

/// Open a wheel and parse the `Requires-Dist:` lines of its METADATA.
///
/// Requirements guarded by an `extra ==` marker are optional by definition
/// and skipped.
pub fn extract_requires_dist(wheel_path: &Path) -> Result<Vec<RequirementSpec>, PlannerError> {
    let display = wheel_path.display().to_string();
    let file =
        fs_err::File::open(wheel_path).map_err(|err| PlannerError::Io(display.clone(), err))?;
    let mut archive =
        ZipArchive::new(file).map_err(|err| PlannerError::Zip(display.clone(), err))?;

    // Like pip, locate the single `.dist-info/METADATA` member.
    let metadata_name = archive
        .file_names()
        .find(|name| {
            name.ends_with("/METADATA")
                && name
                    .split_once('/')
                    .is_some_and(|(dir, rest)| dir.ends_with(".dist-info") && rest == "METADATA")
        })
        .map(String::from)
        .ok_or_else(|| PlannerError::MissingMetadata(display.clone()))?;

    let mut contents = String::new();
    archive
        .by_name(&metadata_name)
        .map_err(|err| PlannerError::Zip(display.clone(), err))?
        .read_to_string(&mut contents)
        .map_err(|err| PlannerError::Io(display, err))?;

    Ok(parse_metadata(&contents))
}

fn parse_metadata(contents: &str) -> Vec<RequirementSpec> {
    let mut specs = Vec::new();
    for line in contents.lines() {
        let Some(captures) = requires_pattern().captures(line) else {
            continue;
        };
        let rest = &captures[2];
        if rest.contains("extra ==") {
            continue;
        }
        specs.push(RequirementSpec {
            name: normalize_name(&captures[1]),
            pin: pin_pattern()
                .captures(rest)
                .map(|pin| pin[1].to_string()),
        });
    }
    specs
}
