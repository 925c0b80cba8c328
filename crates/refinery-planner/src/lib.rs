//! The planner: turns heterogeneous inputs (requirements files, constraint
//! files, directories of wheels) into a flat plan and a content-addressed
//! artifact DAG, resolving unpinned versions through the package index.

pub use catalog::{PackCatalog, PackCatalogEntry};
pub use index::{IndexClient, IndexProtocol, UpgradeStrategy};
pub use metadata::extract_requires_dist;
pub use plan::{Planner, PlannerConfig};
pub use requirements::{parse_requirements, RequirementSpec};

mod catalog;
mod index;
mod metadata;
mod plan;
mod requirements;

#[derive(Debug, thiserror::Error)]
pub enum PlannerError {
    #[error("failed to read {0}")]
    Io(String, #[source] std::io::Error),
    #[error("wheel {0} is not a valid zip archive")]
    Zip(String, #[source] zip::result::ZipError),
    #[error("wheel {0} has no .dist-info/METADATA entry")]
    MissingMetadata(String),
    #[error(transparent)]
    Filename(#[from] refinery_filename::WheelFilenameError),
    #[error(transparent)]
    Artifact(#[from] refinery_artifact::Error),
    #[error("index request failed")]
    Index(#[from] reqwest::Error),
    #[error("index host `{0}` is unsupported; supply version pins")]
    UnsupportedIndex(String),
    #[error("package `{0}` not found in the index")]
    PackageNotFound(String),
    #[error("invalid index URL")]
    Url(#[from] url::ParseError),
    #[error("pack catalog contains a dependency cycle through `{0}`")]
    PackCycle(String),
}
