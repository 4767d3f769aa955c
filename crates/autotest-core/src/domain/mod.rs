//! Domain models for autotest.
//!
//! - `StageResult`: outcome of one stage in one run
//! - `RunSummary`: ordered stage results plus the overall verdict
//! - `EnvironmentDescriptor` / `EnvironmentMetadata`: the provisioned environment

pub mod environment;
pub mod run;
pub mod stage;

pub use environment::{EnvironmentDescriptor, EnvironmentMetadata, UNKNOWN_VERSION};
pub use run::RunSummary;
pub use stage::{SkipReason, StageKind, StageResult, StageStatus};
