//! Run summaries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::stage::StageResult;

/// Aggregate outcome of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    /// Unique identifier for this run.
    pub run_id: Uuid,

    /// Per-stage results in execution order.
    pub stage_results: Vec<StageResult>,

    /// Whether the run as a whole passed.
    pub overall_passed: bool,

    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// When the run finished.
    pub finished_at: DateTime<Utc>,
}

impl RunSummary {
    /// Number of stages that passed.
    pub fn passed_count(&self) -> usize {
        self.stage_results.iter().filter(|s| s.passed).count()
    }

    /// Number of stages that ran and did not pass.
    pub fn failed_count(&self) -> usize {
        self.stage_results
            .iter()
            .filter(|s| s.status.was_executed() && !s.passed)
            .count()
    }

    /// Number of stages that were never invoked.
    pub fn not_run_count(&self) -> usize {
        self.stage_results
            .iter()
            .filter(|s| !s.status.was_executed())
            .count()
    }

    /// Look up a stage result by name.
    pub fn stage(&self, name: &str) -> Option<&StageResult> {
        self.stage_results.iter().find(|s| s.stage_name == name)
    }

    /// Total wall-clock duration in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64
    }
}
