//! Pipeline stages and their per-run outcomes.

use serde::{Deserialize, Serialize};

/// The two stages of the pipeline, ordered as they must run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    /// Continuous integration: build and test.
    Ci,

    /// Continuous delivery: package and publish.
    Cd,
}

impl StageKind {
    /// Display name used in logs and summaries.
    pub fn name(&self) -> &'static str {
        match self {
            StageKind::Ci => "CI",
            StageKind::Cd => "CD",
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Why a stage was not invoked.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    /// The stage executable does not exist.
    MissingExecutable,

    /// The executable exists but could not be launched.
    LaunchFailed(String),

    /// An earlier stage did not pass.
    PrerequisiteFailed,

    /// The run was cancelled before this stage started.
    Cancelled,

    /// The stage is disabled in configuration.
    Disabled,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::MissingExecutable => f.write_str("executable not found"),
            SkipReason::LaunchFailed(msg) => write!(f, "launch failed: {msg}"),
            SkipReason::PrerequisiteFailed => f.write_str("an earlier stage did not pass"),
            SkipReason::Cancelled => f.write_str("run cancelled"),
            SkipReason::Disabled => f.write_str("disabled"),
        }
    }
}

/// Outcome of a stage within one run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageStatus {
    Passed,
    Failed,
    TimedOut,
    NotRun(SkipReason),
}

impl StageStatus {
    /// Summary label written to the run log.
    pub fn label(&self) -> &'static str {
        match self {
            StageStatus::Passed => "PASSED",
            StageStatus::Failed => "FAILED",
            StageStatus::TimedOut => "TIMED OUT",
            StageStatus::NotRun(_) => "NOT RUN",
        }
    }

    /// Whether the stage's executable was actually started.
    pub fn was_executed(&self) -> bool {
        !matches!(self, StageStatus::NotRun(_))
    }
}

/// Result of one stage in one run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageResult {
    /// Stage name ("CI" or "CD").
    pub stage_name: String,

    /// Stage outcome.
    pub status: StageStatus,

    /// Exit code, present only when the process ran to completion.
    pub exit_code: Option<i32>,

    /// Combined stdout and stderr.
    pub captured_output: String,

    /// Duration in milliseconds (0 when not run).
    pub duration_ms: u64,

    /// Whether the stage ran and exited 0.
    pub passed: bool,
}

impl StageResult {
    /// Result for a process that ran to completion.
    pub fn completed(
        stage: StageKind,
        exit_code: i32,
        captured_output: String,
        duration_ms: u64,
    ) -> Self {
        let passed = exit_code == 0;
        Self {
            stage_name: stage.name().to_string(),
            status: if passed {
                StageStatus::Passed
            } else {
                StageStatus::Failed
            },
            exit_code: Some(exit_code),
            captured_output,
            duration_ms,
            passed,
        }
    }

    /// Result for a process killed after exceeding its timeout.
    pub fn timed_out(stage: StageKind, captured_output: String, duration_ms: u64) -> Self {
        Self {
            stage_name: stage.name().to_string(),
            status: StageStatus::TimedOut,
            exit_code: None,
            captured_output,
            duration_ms,
            passed: false,
        }
    }

    /// Result for a stage that was never invoked.
    pub fn not_run(stage: StageKind, reason: SkipReason) -> Self {
        Self {
            stage_name: stage.name().to_string(),
            status: StageStatus::NotRun(reason),
            exit_code: None,
            captured_output: String::new(),
            duration_ms: 0,
            passed: false,
        }
    }

    /// The skip reason, if the stage was not run.
    pub fn skip_reason(&self) -> Option<&SkipReason> {
        match &self.status {
            StageStatus::NotRun(reason) => Some(reason),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completed_zero_exit_passes() {
        let result = StageResult::completed(StageKind::Ci, 0, "ok\n".to_string(), 12);
        assert!(result.passed);
        assert_eq!(result.status, StageStatus::Passed);
        assert_eq!(result.stage_name, "CI");
    }

    #[test]
    fn test_completed_nonzero_exit_fails() {
        let result = StageResult::completed(StageKind::Cd, 2, String::new(), 5);
        assert!(!result.passed);
        assert_eq!(result.status, StageStatus::Failed);
        assert_eq!(result.exit_code, Some(2));
    }

    #[test]
    fn test_not_run_is_not_executed() {
        let result = StageResult::not_run(StageKind::Cd, SkipReason::PrerequisiteFailed);
        assert!(!result.passed);
        assert!(!result.status.was_executed());
        assert_eq!(result.status.label(), "NOT RUN");
        assert_eq!(result.skip_reason(), Some(&SkipReason::PrerequisiteFailed));
    }

    #[test]
    fn test_stage_status_serde_shape() {
        let status = StageStatus::NotRun(SkipReason::MissingExecutable);
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["status"], "not_run");
        assert_eq!(value["reason"], "missing_executable");
    }

    #[test]
    fn test_ci_orders_before_cd() {
        assert!(StageKind::Ci < StageKind::Cd);
    }

    #[test]
    fn test_stage_kind_serde() {
        let kind: StageKind = serde_json::from_str("\"cd\"").unwrap();
        assert_eq!(kind, StageKind::Cd);
        assert_eq!(kind.to_string(), "CD");
    }
}
