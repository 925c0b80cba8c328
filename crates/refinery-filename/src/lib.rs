//! Wheel filename parsing and reuse classification.
//!
//! A wheel filename follows `<pkg>-<version>-<pytag>-<abi>-<platform>.whl`,
//! optionally with a build tag between version and python tag. See
//! <https://www.python.org/dev/peps/pep-0427/#file-name-convention>.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum WheelFilenameError {
    #[error("the wheel filename \"{0}\" is invalid: {1}")]
    InvalidWheelFileName(String, String),
}

/// Normalize a package name: lowercase, `_` and `.` collapse to `-`.
pub fn normalize_name(name: &str) -> String {
    name.to_lowercase().replace(['_', '.'], "-")
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WheelFilename {
    pub name: String,
    pub version: String,
    pub python_tag: String,
    pub abi_tag: String,
    pub platform_tag: String,
}

impl FromStr for WheelFilename {
    type Err = WheelFilenameError;

    fn from_str(filename: &str) -> Result<Self, Self::Err> {
        let basename = filename.strip_suffix(".whl").ok_or_else(|| {
            WheelFilenameError::InvalidWheelFileName(
                filename.to_string(),
                "must end with .whl".to_string(),
            )
        })?;
        match basename.split('-').collect::<Vec<_>>().as_slice() {
            &[name, version, _, python_tag, abi_tag, platform_tag]
            | &[name, version, python_tag, abi_tag, platform_tag] => Ok(WheelFilename {
                name: normalize_name(name),
                version: version.to_string(),
                python_tag: python_tag.to_string(),
                abi_tag: abi_tag.to_string(),
                platform_tag: platform_tag.to_string(),
            }),
            _ => Err(WheelFilenameError::InvalidWheelFileName(
                filename.to_string(),
                "expected four or five \"-\" in the filename".to_string(),
            )),
        }
    }
}

impl Display for WheelFilename {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}-{}-{}-{}-{}.whl",
            self.name.replace('-', "_"),
            self.version,
            self.python_tag,
            self.abi_tag,
            self.platform_tag
        )
    }
}

/// Whether a plan node reuses an existing wheel or requires a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanAction {
    Reuse,
    Build,
}

impl Display for PlanAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reuse => f.write_str("reuse"),
            Self::Build => f.write_str("build"),
        }
    }
}

impl WheelFilename {
    /// Classify this wheel against a build target.
    ///
    /// A wheel is reusable iff its python tag matches the target (or is a
    /// generic `py3`/`cp3` tag), its abi is `none` or a `cp3` abi, and its
    /// platform is `any` or the target platform. A platform tag of `any` is
    /// reusable regardless of the target.
    pub fn classify(&self, target_python_tag: &str, target_platform_tag: &str) -> PlanAction {
        let python_ok = self.python_tag == target_python_tag
            || self.python_tag.starts_with("py3")
            || self.python_tag.starts_with("cp3");
        let abi_ok = self.abi_tag == "none" || self.abi_tag.starts_with("cp3");
        let platform_ok = self.platform_tag == "any" || self.platform_tag == target_platform_tag;
        if python_ok && abi_ok && platform_ok {
            PlanAction::Reuse
        } else {
            PlanAction::Build
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TARGET_PY: &str = "cp311";
    const TARGET_PLATFORM: &str = "manylinux2014_s390x";

    #[test]
    fn ok_wheel_filename() {
        let parsed = WheelFilename::from_str("foo-1.2.3-py3-none-any.whl").unwrap();
        assert_eq!(parsed.name, "foo");
        assert_eq!(parsed.version, "1.2.3");
        assert_eq!(parsed.python_tag, "py3");
        assert_eq!(parsed.abi_tag, "none");
        assert_eq!(parsed.platform_tag, "any");
    }

    #[test]
    fn ok_build_tag_ignored() {
        let parsed = WheelFilename::from_str("foo-1.2.3-1-py3-none-any.whl").unwrap();
        assert_eq!(parsed.version, "1.2.3");
        assert_eq!(parsed.python_tag, "py3");
    }

    #[test]
    fn underscores_normalize_to_dashes() {
        let parsed = WheelFilename::from_str("My_Package-0.1-py3-none-any.whl").unwrap();
        assert_eq!(parsed.name, "my-package");
        assert_eq!(parsed.to_string(), "my_package-0.1-py3-none-any.whl");
    }

    #[test]
    fn err_not_a_wheel() {
        let err = WheelFilename::from_str("foo-1.2.3.tar.gz").unwrap_err();
        assert!(err.to_string().contains("must end with .whl"));
    }

    #[test]
    fn err_too_few_parts() {
        let err = WheelFilename::from_str("foo-1.2.3-none-any.whl").unwrap_err();
        assert!(err.to_string().contains("expected four or five"));
    }

    #[test]
    fn pure_wheel_is_reuse() {
        let wheel = WheelFilename::from_str("purepkg-1.0.0-py3-none-any.whl").unwrap();
        assert_eq!(wheel.classify(TARGET_PY, TARGET_PLATFORM), PlanAction::Reuse);
    }

    #[test]
    fn any_platform_is_reuse_regardless_of_target() {
        let wheel = WheelFilename::from_str("purepkg-1.0.0-py3-none-any.whl").unwrap();
        assert_eq!(wheel.classify("cp39", "musllinux_1_2_x86_64"), PlanAction::Reuse);
    }

    #[test]
    fn foreign_platform_is_build() {
        let wheel =
            WheelFilename::from_str("numpy-1.26.4-cp311-cp311-manylinux2014_x86_64.whl").unwrap();
        assert_eq!(wheel.classify(TARGET_PY, TARGET_PLATFORM), PlanAction::Build);
    }

    #[test]
    fn matching_platform_is_reuse() {
        let wheel =
            WheelFilename::from_str("numpy-1.26.4-cp311-cp311-manylinux2014_s390x.whl").unwrap();
        assert_eq!(wheel.classify(TARGET_PY, TARGET_PLATFORM), PlanAction::Reuse);
    }

    #[test]
    fn exotic_abi_is_build() {
        let wheel = WheelFilename::from_str("oldpkg-0.9-py2-abi3x-any.whl").unwrap();
        assert_eq!(wheel.classify(TARGET_PY, TARGET_PLATFORM), PlanAction::Build);
    }
}
