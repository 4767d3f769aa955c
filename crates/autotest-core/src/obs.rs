//! Structured observability hooks for the run lifecycle.
//!
//! This module provides:
//! - A run-scoped tracing span (`run_span`)
//! - Emission functions for lifecycle events: run start/finish, provisioning,
//!   stage start/finish and reporting errors
//!
//! Events are emitted at `info!` level (`warn!` for reporting errors) and
//! follow `RUST_LOG` filtering.

use tracing::{info, warn};

/// Span tagged with the run id, meant to instrument the whole run future.
///
/// ```ignore
/// use tracing::Instrument;
/// orchestrate().instrument(run_span("5b0c...")).await;
/// // every event inside carries run_id = "5b0c..."
/// ```
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("autotest.run", run_id = %run_id)
}

pub fn emit_run_started(run_id: &str, project_root: &str) {
    info!(event = "run.started", run_id = %run_id, project_root = %project_root);
}

pub fn emit_provision_started(target: &str) {
    info!(event = "provision.started", target = %target);
}

pub fn emit_provision_finished(root: &str, duration_ms: u64, success: bool) {
    info!(
        event = "provision.finished",
        root = %root,
        duration_ms = duration_ms,
        success = success,
    );
}

pub fn emit_stage_started(stage: &str, executable: &str) {
    info!(event = "stage.started", stage = %stage, executable = %executable);
}

/// Emit event: stage finished with its status label.
pub fn emit_stage_finished(stage: &str, status: &str, exit_code: Option<i32>, duration_ms: u64) {
    info!(
        event = "stage.finished",
        stage = %stage,
        status = %status,
        exit_code = exit_code,
        duration_ms = duration_ms,
    );
}

/// Emit event: run finished with the overall verdict and exit code.
pub fn emit_run_finished(run_id: &str, duration_ms: u64, overall_passed: bool, exit_code: i32) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        overall_passed = overall_passed,
        exit_code = exit_code,
    );
}

/// Emit event: a report artifact could not be written (warning level).
pub fn emit_report_error(error: &dyn std::fmt::Display) {
    warn!(event = "report.error", error = %error);
}
