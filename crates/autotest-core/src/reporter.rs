//! Run log and environment report artifacts.
//!
//! Two append-only outputs:
//! - `RunLog`: plain-text log of every run (markers, stage output, summary lines)
//! - `ReportDocument`: human-readable Markdown with one environment block per run
//!
//! Every write opens the file in append mode, writes one block and flushes.
//! Nothing here ever truncates a file, so a crash mid-run loses at most the
//! block being written.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::{EnvironmentMetadata, RunSummary, StageResult, StageStatus};

const RULE: &str =
    "================================================================================";

/// Failures while writing report artifacts. Never fatal to a run.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to append to {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to rotate {}: {source}", .path.display())]
    Rotate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Size-based rotation for the run log.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogRotation {
    /// Rotate before a run once the log is larger than this.
    pub max_bytes: u64,

    /// Number of rotated files to keep (`<log>.1` is the newest).
    pub keep: usize,
}

fn append_to(path: &Path, text: &str) -> Result<(), ReportError> {
    let write_err = |source| ReportError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(write_err)?;
    file.write_all(text.as_bytes()).map_err(write_err)?;
    file.flush().map_err(write_err)
}

/// Append-only run log.
#[derive(Debug, Clone)]
pub struct RunLog {
    path: PathBuf,
    rotation: Option<LogRotation>,
}

impl RunLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            rotation: None,
        }
    }

    pub fn with_rotation(mut self, rotation: LogRotation) -> Self {
        self.rotation = Some(rotation);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current size in bytes (0 if the log does not exist yet).
    pub fn len(&self) -> u64 {
        std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append one block.
    pub fn append(&self, text: &str) -> Result<(), ReportError> {
        append_to(&self.path, text)
    }

    fn rotated_path(&self, index: usize) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(format!(".{index}"));
        PathBuf::from(name)
    }

    /// Shift the log to `<log>.1` when it exceeds the rotation limit.
    ///
    /// Returns `true` if a rotation happened. No-op without a rotation policy.
    pub fn rotate_if_needed(&self) -> Result<bool, ReportError> {
        let Some(rotation) = self.rotation else {
            return Ok(false);
        };
        if rotation.keep == 0 || self.len() <= rotation.max_bytes {
            return Ok(false);
        }

        let rotate_err = |source| ReportError::Rotate {
            path: self.path.clone(),
            source,
        };

        let oldest = self.rotated_path(rotation.keep);
        if oldest.exists() {
            std::fs::remove_file(&oldest).map_err(rotate_err)?;
        }
        for index in (1..rotation.keep).rev() {
            let from = self.rotated_path(index);
            if from.exists() {
                std::fs::rename(&from, self.rotated_path(index + 1)).map_err(rotate_err)?;
            }
        }
        std::fs::rename(&self.path, self.rotated_path(1)).map_err(rotate_err)?;

        info!(log = %self.path.display(), keep = rotation.keep, "rotated run log");
        Ok(true)
    }
}

/// Append-only Markdown document of environment metadata.
#[derive(Debug, Clone)]
pub struct ReportDocument {
    path: PathBuf,
}

impl ReportDocument {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one environment block.
    pub fn append_metadata(
        &self,
        metadata: &EnvironmentMetadata,
        result: &str,
        at: DateTime<Utc>,
    ) -> Result<(), ReportError> {
        append_to(&self.path, &render_metadata_block(metadata, result, at))
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Run-start marker plus the environment header.
pub fn render_run_start(run_id: Uuid, at: DateTime<Utc>, metadata: &EnvironmentMetadata) -> String {
    format!(
        "{RULE}\nRUN START {run_id} {}\n{RULE}\n\
         Environment: {}\n\
         Absolute Path: {}\n\
         Runtime Executable: {}\n\
         Runtime Version: {}\n\
         Package Manager: {}\n\n",
        timestamp(at),
        metadata.name,
        metadata.root_path.display(),
        metadata.runtime_executable.display(),
        metadata.runtime_version,
        metadata.package_manager_version,
    )
}

/// One stage's heading and captured output.
pub fn render_stage(result: &StageResult) -> String {
    let heading = match &result.status {
        StageStatus::NotRun(reason) => format!("--- {} (not run: {reason}) ---\n", result.stage_name),
        StageStatus::TimedOut => format!(
            "--- {} (timed out after {}ms) ---\n",
            result.stage_name, result.duration_ms
        ),
        _ => format!(
            "--- {} (exit code {}, {}ms) ---\n",
            result.stage_name,
            result.exit_code.unwrap_or(-1),
            result.duration_ms
        ),
    };

    let mut block = heading;
    block.push_str(&result.captured_output);
    if !result.captured_output.is_empty() && !result.captured_output.ends_with('\n') {
        block.push('\n');
    }
    block
}

/// Run-end marker, one line per stage and the overall verdict.
pub fn render_run_end(summary: &RunSummary) -> String {
    let mut block = format!(
        "{RULE}\nRUN END {} {}\n{RULE}\n",
        summary.run_id,
        timestamp(summary.finished_at)
    );
    for result in &summary.stage_results {
        block.push_str(&format!("{}: {}\n", result.stage_name, result.status.label()));
    }
    block.push_str(&format!("Overall: {}\n\n", verdict_label(summary.overall_passed)));
    block
}

/// Block recorded when provisioning fails before any stage runs.
pub fn render_setup_failure(run_id: Uuid, at: DateTime<Utc>, error: &str) -> String {
    format!(
        "{RULE}\nRUN START {run_id} {}\n{RULE}\n\
         Environment setup failed: {error}\n\
         Overall: FAILED\n\n",
        timestamp(at)
    )
}

/// Markdown environment block for the report document.
pub fn render_metadata_block(
    metadata: &EnvironmentMetadata,
    result: &str,
    at: DateTime<Utc>,
) -> String {
    format!(
        "\n## Environment Information ({})\n\n\
         - **Environment Name**: {}\n\
         - **Absolute Path**: {}\n\
         - **Runtime Executable**: {}\n\
         - **Runtime Version**: {}\n\
         - **Package Manager**: {}\n\
         - **Manifest Digest**: {}\n\
         - **Pipeline Result**: {}\n",
        timestamp(at),
        metadata.name,
        metadata.root_path.display(),
        metadata.runtime_executable.display(),
        metadata.runtime_version,
        metadata.package_manager_version,
        metadata.manifest_digest.as_deref().unwrap_or("n/a"),
        result,
    )
}

fn verdict_label(passed: bool) -> &'static str {
    if passed {
        "PASSED"
    } else {
        "FAILED"
    }
}

/// Writes a run's results to the log and the report document.
#[derive(Debug, Clone)]
pub struct Reporter {
    log: RunLog,
    document: ReportDocument,
}

impl Reporter {
    pub fn new(log: RunLog, document: ReportDocument) -> Self {
        Self { log, document }
    }

    pub fn log(&self) -> &RunLog {
        &self.log
    }

    pub fn document(&self) -> &ReportDocument {
        &self.document
    }

    /// Append the full run block to the log and a metadata block to the
    /// report document.
    ///
    /// Each section is a separate append. Failures are collected and
    /// returned; later sections are still attempted.
    pub fn report(&self, summary: &RunSummary, metadata: &EnvironmentMetadata) -> Vec<ReportError> {
        let mut errors = Vec::new();

        let mut record = |result: Result<(), ReportError>| {
            if let Err(e) = result {
                errors.push(e);
            }
        };

        record(
            self.log
                .append(&render_run_start(summary.run_id, summary.started_at, metadata)),
        );
        for stage in &summary.stage_results {
            record(self.log.append(&render_stage(stage)));
        }
        record(self.log.append(&render_run_end(summary)));
        record(self.document.append_metadata(
            metadata,
            verdict_label(summary.overall_passed),
            summary.finished_at,
        ));

        debug!(
            run_id = %summary.run_id,
            errors = errors.len(),
            "report written"
        );
        errors
    }

    /// Record a provisioning failure; the report document is still appended.
    pub fn record_setup_failure(
        &self,
        run_id: Uuid,
        error: &str,
        metadata: &EnvironmentMetadata,
    ) -> Vec<ReportError> {
        let now = Utc::now();
        [
            self.log.append(&render_setup_failure(run_id, now, error)),
            self.document
                .append_metadata(metadata, "ENVIRONMENT SETUP FAILED", now),
        ]
        .into_iter()
        .filter_map(Result::err)
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{SkipReason, StageKind};

    fn metadata() -> EnvironmentMetadata {
        EnvironmentMetadata {
            name: ".venv".to_string(),
            root_path: PathBuf::from("/work/.venv"),
            runtime_executable: PathBuf::from("/work/.venv/bin/python"),
            runtime_version: "3.11.4".to_string(),
            package_manager_version: "pip 23.2".to_string(),
            manifest_digest: Some("abc123".to_string()),
        }
    }

    #[test]
    fn test_render_stage_not_run() {
        let result = StageResult::not_run(StageKind::Cd, SkipReason::PrerequisiteFailed);
        let block = render_stage(&result);
        assert!(block.starts_with("--- CD (not run: an earlier stage did not pass) ---"));
    }

    #[test]
    fn test_render_stage_terminates_output() {
        let result = StageResult::completed(StageKind::Ci, 0, "no newline".to_string(), 3);
        assert!(render_stage(&result).ends_with("no newline\n"));
    }

    #[test]
    fn test_render_metadata_block_fields() {
        let block = render_metadata_block(&metadata(), "PASSED", Utc::now());
        assert!(block.contains("**Absolute Path**: /work/.venv"));
        assert!(block.contains("**Runtime Version**: 3.11.4"));
        assert!(block.contains("**Manifest Digest**: abc123"));
    }

    #[test]
    fn test_rotation_disabled_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let log = RunLog::new(dir.path().join("run.log"));
        log.append("x".repeat(100).as_str()).unwrap();
        assert!(!log.rotate_if_needed().unwrap());
        assert_eq!(log.len(), 100);
    }

    #[test]
    fn test_rotation_shifts_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.log");
        let log = RunLog::new(&path).with_rotation(LogRotation {
            max_bytes: 10,
            keep: 2,
        });

        log.append("first run output\n").unwrap();
        assert!(log.rotate_if_needed().unwrap());
        assert!(!path.exists());

        log.append("second run output\n").unwrap();
        assert!(log.rotate_if_needed().unwrap());

        let newest = std::fs::read_to_string(dir.path().join("run.log.1")).unwrap();
        let older = std::fs::read_to_string(dir.path().join("run.log.2")).unwrap();
        assert_eq!(newest, "second run output\n");
        assert_eq!(older, "first run output\n");
    }

    #[test]
    fn test_append_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let log = RunLog::new(dir.path().join("logs").join("nested").join("run.log"));
        log.append("hello\n").unwrap();
        assert_eq!(log.len(), 6);
    }
}
