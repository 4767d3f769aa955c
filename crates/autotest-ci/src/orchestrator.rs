//! Top-level run: provision, execute stages, report.

use crate::gate::ExitCode;
use crate::pipeline::{PipelineConfig, StagePipeline};
use crate::runner::StageRunner;
use autotest_core::{obs, LogRotation, ReportDocument, ReportError, Reporter, RunLog, RunSummary};
use autotest_env::{EnvironmentBackend, ProvisionConfig, Provisioner, VenvBackend};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Instrument};
use uuid::Uuid;

/// Where run artifacts are written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReportingConfig {
    /// Run log, relative to the project root.
    pub log: PathBuf,

    /// Markdown report document, relative to the project root.
    pub report: PathBuf,

    /// Rotate the log before a run once it exceeds this size; unset disables rotation.
    pub rotate_max_bytes: Option<u64>,

    /// Rotated logs to keep.
    pub rotate_keep: usize,
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            log: Path::new("logs").join("test_run.log"),
            report: PathBuf::from("README.md"),
            rotate_max_bytes: None,
            rotate_keep: 3,
        }
    }
}

impl ReportingConfig {
    pub fn rotation(&self) -> Option<LogRotation> {
        self.rotate_max_bytes.map(|max_bytes| LogRotation {
            max_bytes,
            keep: self.rotate_keep,
        })
    }
}

/// Complete configuration of one `autotest` invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AutoTestConfig {
    /// Directory every relative path is resolved against.
    pub project_root: PathBuf,
    pub environment: ProvisionConfig,
    pub pipeline: PipelineConfig,
    pub reporting: ReportingConfig,
}

impl Default for AutoTestConfig {
    fn default() -> Self {
        Self {
            project_root: PathBuf::from("."),
            environment: ProvisionConfig::default(),
            pipeline: PipelineConfig::default(),
            reporting: ReportingConfig::default(),
        }
    }
}

/// Result of one run.
#[derive(Debug)]
pub struct RunOutcome {
    pub run_id: Uuid,

    /// Stage results; `None` when provisioning failed.
    pub summary: Option<RunSummary>,

    pub exit_code: ExitCode,

    /// Provisioning error message, when provisioning failed.
    pub provision_error: Option<String>,

    /// Report artifacts that could not be written. Never affects `exit_code`.
    pub reporting_errors: Vec<ReportError>,
}

/// The auto-test orchestrator.
pub struct AutoTest {
    project_root: PathBuf,
    env_root: PathBuf,
    provisioner: Provisioner,
    pipeline: StagePipeline,
    reporter: Reporter,
}

impl AutoTest {
    /// Build an orchestrator using the `venv` backend.
    pub fn new(config: AutoTestConfig) -> Self {
        let backend = VenvBackend::new(config.environment.runtime.clone())
            .with_env_policy(config.pipeline.env_policy());
        Self::with_backend(config, Arc::new(backend))
    }

    /// Build an orchestrator around an explicit environment backend.
    pub fn with_backend(config: AutoTestConfig, backend: Arc<dyn EnvironmentBackend>) -> Self {
        let project_root = config
            .project_root
            .canonicalize()
            .unwrap_or_else(|_| config.project_root.clone());
        let at_root = |p: &Path| project_root.join(p);

        let provisioner = Provisioner::new(backend, at_root(&config.environment.manifest))
            .with_containment(config.environment.containment);

        let mut log = RunLog::new(at_root(&config.reporting.log));
        if let Some(rotation) = config.reporting.rotation() {
            log = log.with_rotation(rotation);
        }
        let reporter = Reporter::new(log, ReportDocument::new(at_root(&config.reporting.report)));

        Self {
            env_root: at_root(&config.environment.root),
            pipeline: StagePipeline::new(config.pipeline, StageRunner::new(&project_root)),
            provisioner,
            reporter,
            project_root,
        }
    }

    /// Replace the binaries the provisioner refuses to delete.
    pub fn with_running_binaries(mut self, running: Vec<PathBuf>) -> Self {
        self.provisioner = self.provisioner.with_running_binaries(running);
        self
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn reporter(&self) -> &Reporter {
        &self.reporter
    }

    /// Run the pipeline once: provision, run the stages, report.
    pub async fn run(&self, cancel: CancellationToken) -> RunOutcome {
        let run_id = Uuid::new_v4();
        self.run_inner(run_id, cancel)
            .instrument(obs::run_span(&run_id.to_string()))
            .await
    }

    async fn run_inner(&self, run_id: Uuid, cancel: CancellationToken) -> RunOutcome {
        let start = Instant::now();
        obs::emit_run_started(&run_id.to_string(), &self.project_root.display().to_string());

        let mut reporting_errors = Vec::new();
        match self.reporter.log().rotate_if_needed() {
            Ok(true) => info!(log = %self.reporter.log().path().display(), "Rotated run log"),
            Ok(false) => {}
            Err(e) => reporting_errors.push(e),
        }

        let stages = &self.pipeline.config().stages;

        let (summary, env_root) = if cancel.is_cancelled() {
            info!("Run cancelled before provisioning");
            (self.pipeline.cancelled_run(run_id, stages), self.resolved_env_root())
        } else {
            let env = match self.provisioner.provision(&self.env_root).await {
                Ok(env) => env,
                Err(e) => {
                    error!(error = %e, "Environment setup failed");
                    let metadata = self.provisioner.describe(&self.env_root).await;
                    reporting_errors.extend(self.reporter.record_setup_failure(
                        run_id,
                        &e.to_string(),
                        &metadata,
                    ));
                    return self.finish(
                        run_id,
                        start,
                        None,
                        ExitCode::ProvisionFailure,
                        Some(e.to_string()),
                        reporting_errors,
                    );
                }
            };
            let summary = self
                .pipeline
                .execute_run(run_id, stages, &env, &cancel)
                .await;
            (summary, env.root_path)
        };

        let metadata = self.provisioner.describe(&env_root).await;
        reporting_errors.extend(self.reporter.report(&summary, &metadata));

        let exit_code = ExitCode::for_summary(&summary);
        self.finish(run_id, start, Some(summary), exit_code, None, reporting_errors)
    }

    fn resolved_env_root(&self) -> PathBuf {
        self.env_root
            .canonicalize()
            .unwrap_or_else(|_| self.env_root.clone())
    }

    fn finish(
        &self,
        run_id: Uuid,
        start: Instant,
        summary: Option<RunSummary>,
        exit_code: ExitCode,
        provision_error: Option<String>,
        reporting_errors: Vec<ReportError>,
    ) -> RunOutcome {
        for e in &reporting_errors {
            obs::emit_report_error(e);
        }
        let overall_passed = summary.as_ref().is_some_and(|s| s.overall_passed);
        obs::emit_run_finished(
            &run_id.to_string(),
            start.elapsed().as_millis() as u64,
            overall_passed,
            exit_code.code(),
        );

        RunOutcome {
            run_id,
            summary,
            exit_code,
            provision_error,
            reporting_errors,
        }
    }
}
