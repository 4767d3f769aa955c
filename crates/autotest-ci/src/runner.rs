//! Stage execution.

use crate::stage::StageConfig;
use autotest_core::{obs, ProcessError, ProcessRunner, ScopedEnv, SkipReason, StageResult};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

/// Runs a single stage inside a provisioned environment.
#[derive(Debug, Clone)]
pub struct StageRunner {
    project_root: PathBuf,
    default_timeout_secs: u64,
}

impl StageRunner {
    /// Resolve stage paths against `project_root`.
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            default_timeout_secs: 0,
        }
    }

    /// Timeout for stages that do not set their own; 0 means none.
    pub fn with_default_timeout(mut self, secs: u64) -> Self {
        self.default_timeout_secs = secs;
        self
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Absolute path of the stage executable.
    pub fn resolve_executable(&self, config: &StageConfig) -> PathBuf {
        self.project_root.join(&config.executable)
    }

    /// Absolute working directory for the stage.
    pub fn resolve_working_dir(&self, config: &StageConfig) -> PathBuf {
        match &config.working_dir {
            Some(dir) => self.project_root.join(dir),
            None => self
                .resolve_executable(config)
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| self.project_root.clone()),
        }
    }

    /// Execute a single stage and return its result.
    ///
    /// Never fails: a missing executable or a launch error becomes a
    /// `NotRun` result, an expired timeout becomes `TimedOut`.
    pub async fn execute(&self, config: &StageConfig, env: &ScopedEnv) -> StageResult {
        let executable = self.resolve_executable(config);
        let name = config.name();

        if !executable.is_file() {
            warn!(stage = name, executable = %executable.display(), "Stage executable not found");
            let result = StageResult::not_run(config.kind, SkipReason::MissingExecutable);
            obs::emit_stage_finished(name, result.status.label(), None, 0);
            return result;
        }

        let argv = config.command(&executable);
        let cwd = self.resolve_working_dir(config);
        let timeout_secs = config.timeout_secs.unwrap_or(self.default_timeout_secs);
        let runner = ProcessRunner::from_timeout_secs(timeout_secs);

        obs::emit_stage_started(name, &executable.display().to_string());
        info!(stage = name, cwd = %cwd.display(), "Executing stage");

        let start = Instant::now();
        let result = match runner.run(&argv, &cwd, env).await {
            Ok(output) => StageResult::completed(
                config.kind,
                output.exit_code,
                output.combined_output,
                output.duration_ms,
            ),
            Err(ProcessError::TimedOut {
                after_secs,
                partial_output,
                ..
            }) => {
                warn!(stage = name, after_secs, "Stage timed out");
                StageResult::timed_out(
                    config.kind,
                    partial_output,
                    start.elapsed().as_millis() as u64,
                )
            }
            Err(e) => {
                warn!(stage = name, error = %e, "Stage could not be launched");
                StageResult::not_run(config.kind, SkipReason::LaunchFailed(e.to_string()))
            }
        };

        obs::emit_stage_finished(
            name,
            result.status.label(),
            result.exit_code,
            result.duration_ms,
        );
        result
    }
}
