//! autotest CI - stage execution and run orchestration
//!
//! Provides the pipeline that:
//! - Runs the CI stage, then the CD stage, inside a provisioned environment
//! - Skips CD when CI fails unless `continue_on_failure` is set
//! - Evaluates the overall verdict and the process exit code
//! - Drives a full run (provision, execute, report) via `AutoTest`

pub mod gate;
pub mod orchestrator;
pub mod pipeline;
pub mod runner;
pub mod stage;

// Re-export key types
pub use gate::{ExitCode, Verdict};
pub use orchestrator::{AutoTest, AutoTestConfig, ReportingConfig, RunOutcome};
pub use pipeline::{PipelineConfig, StagePipeline};
pub use runner::StageRunner;
pub use stage::{default_stages, StageConfig, SCRIPT_SUFFIX};
