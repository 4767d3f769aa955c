//! autotest core library
//!
//! Shared building blocks for the autotest pipeline:
//! - `domain`: stage results, run summaries, environment descriptors
//! - `process`: argv-only process execution with a scoped environment
//! - `reporter`: append-only run log and environment report document
//! - `obs` / `telemetry`: tracing hooks and subscriber setup

pub mod domain;
pub mod obs;
pub mod process;
pub mod reporter;
pub mod telemetry;

pub use domain::{
    EnvironmentDescriptor, EnvironmentMetadata, RunSummary, SkipReason, StageKind, StageResult,
    StageStatus, UNKNOWN_VERSION,
};
pub use process::{EnvPolicy, PathMode, ProcessError, ProcessOutput, ProcessRunner, ScopedEnv};
pub use reporter::{LogRotation, ReportDocument, ReportError, Reporter, RunLog};
pub use telemetry::init_tracing;
