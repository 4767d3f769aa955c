//! Pass/fail evaluation and process exit codes.

use autotest_core::{RunSummary, SkipReason, StageResult, StageStatus};
use serde::{Deserialize, Serialize};

/// Gate evaluation verdict.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Verdict {
    /// Whether the run passed.
    pub passed: bool,

    /// Whether the run was cancelled.
    pub cancelled: bool,

    /// Violations that caused failure (empty if passed).
    pub violations: Vec<String>,

    /// Summary message.
    pub message: String,
}

impl Verdict {
    /// Evaluate a run's stage results.
    ///
    /// Gate rule:
    /// - at least one stage must have executed
    /// - every executed stage must have exited 0
    /// - no stage may have timed out
    /// - the run must not have been cancelled
    /// - with `skip_counts_as_failure`, a stage whose executable was
    ///   missing or could not be launched fails the run
    ///
    /// Disabled stages and stages skipped behind a failed prerequisite add
    /// no violation of their own.
    pub fn evaluate(results: &[StageResult], skip_counts_as_failure: bool) -> Verdict {
        let mut violations = Vec::new();
        let mut cancelled = false;

        for result in results {
            let stage = &result.stage_name;
            match &result.status {
                StageStatus::Passed => {}
                StageStatus::Failed => violations.push(format!(
                    "Stage '{}' exited with code {}",
                    stage,
                    result.exit_code.unwrap_or(-1)
                )),
                StageStatus::TimedOut => violations.push(format!("Stage '{stage}' timed out")),
                StageStatus::NotRun(SkipReason::Cancelled) => {
                    if !cancelled {
                        violations.push(format!("Run cancelled before stage '{stage}'"));
                    }
                    cancelled = true;
                }
                StageStatus::NotRun(
                    reason @ (SkipReason::MissingExecutable | SkipReason::LaunchFailed(_)),
                ) => {
                    if skip_counts_as_failure {
                        violations.push(format!("Stage '{stage}' was not run: {reason}"));
                    }
                }
                StageStatus::NotRun(SkipReason::PrerequisiteFailed | SkipReason::Disabled) => {}
            }
        }

        if !results.iter().any(|r| r.status.was_executed()) && !cancelled {
            violations.push("No stage was executed".to_string());
        }

        let passed = violations.is_empty();
        let message = if passed {
            "All stages passed".to_string()
        } else if cancelled {
            "Run cancelled".to_string()
        } else {
            format!("Gate failed with {} violation(s)", violations.len())
        };

        Verdict {
            passed,
            cancelled,
            violations,
            message,
        }
    }
}

/// Process exit code of an `autotest` invocation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExitCode {
    /// Every stage passed.
    Success,
    /// A pipeline stage failed, timed out or was not run.
    StageFailure,
    /// The environment could not be provisioned.
    ProvisionFailure,
    /// The configuration could not be loaded.
    ConfigError,
    /// The run was interrupted.
    Cancelled,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        match self {
            ExitCode::Success => 0,
            ExitCode::StageFailure => 1,
            ExitCode::ProvisionFailure => 2,
            ExitCode::ConfigError => 3,
            ExitCode::Cancelled => 130,
        }
    }

    /// Exit code for a completed pipeline run.
    pub fn for_summary(summary: &RunSummary) -> ExitCode {
        let cancelled = summary
            .stage_results
            .iter()
            .any(|r| r.skip_reason() == Some(&SkipReason::Cancelled));
        if cancelled {
            ExitCode::Cancelled
        } else if summary.overall_passed {
            ExitCode::Success
        } else {
            ExitCode::StageFailure
        }
    }
}
