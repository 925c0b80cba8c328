//! Core types shared between the control plane, the store, and the workers.

pub use build::{BuildOutcome, BuildRequest, BuildRow, BuildStatus};
pub use event::{Event, EventFilter};
pub use heartbeat::Heartbeat;
pub use hint::{Hint, HintError};
pub use log::{LogEntry, MAX_LOG_BYTES};
pub use manifest::ManifestEntry;
pub use pending::{PendingInput, PendingStatus};
pub use plan::{DagNode, PlanNode, PlanSnapshot};
pub use settings::Settings;

mod build;
mod event;
mod heartbeat;
mod hint;
mod log;
mod manifest;
mod pending;
mod plan;
mod settings;
