//! Pipeline orchestration: run stages in order under the skip policies.

use crate::gate::Verdict;
use crate::runner::StageRunner;
use crate::stage::{default_stages, StageConfig};
use autotest_core::process::DEFAULT_INHERITED_VARS;
use autotest_core::{
    EnvPolicy, EnvironmentDescriptor, PathMode, RunSummary, ScopedEnv, SkipReason, StageResult,
    StageStatus,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

/// Pipeline policies and stage list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Run later stages even after an earlier one failed.
    pub continue_on_failure: bool,

    /// Treat a missing or unlaunchable executable as a failure.
    pub skip_counts_as_failure: bool,

    /// Default per-stage timeout in seconds; 0 means none.
    pub stage_timeout_secs: u64,

    /// Export `PYTEST_DISABLE_PLUGIN_AUTOLOAD=1` to stages.
    pub disable_plugin_autoload: bool,

    /// How the environment's binaries directory joins `PATH`.
    pub path_mode: PathMode,

    /// Parent variables passed through to stages.
    pub inherit_env: Vec<String>,

    /// Stages in execution order.
    pub stages: Vec<StageConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            continue_on_failure: false,
            skip_counts_as_failure: true,
            stage_timeout_secs: 0,
            disable_plugin_autoload: true,
            path_mode: PathMode::Prepend,
            inherit_env: DEFAULT_INHERITED_VARS.iter().map(|v| v.to_string()).collect(),
            stages: default_stages(),
        }
    }
}

impl PipelineConfig {
    /// Child-environment rules for stage processes.
    pub fn env_policy(&self) -> EnvPolicy {
        EnvPolicy {
            inherit: self.inherit_env.clone(),
            path_mode: self.path_mode,
            disable_plugin_autoload: self.disable_plugin_autoload,
        }
    }
}

/// Executes stages in order inside a provisioned environment.
#[derive(Debug, Clone)]
pub struct StagePipeline {
    config: PipelineConfig,
    runner: StageRunner,
}

impl StagePipeline {
    pub fn new(config: PipelineConfig, runner: StageRunner) -> Self {
        let runner = runner.with_default_timeout(config.stage_timeout_secs);
        Self { config, runner }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn runner(&self) -> &StageRunner {
        &self.runner
    }

    /// Execute `stages` under a fresh run id.
    pub async fn execute(
        &self,
        stages: &[StageConfig],
        env: &EnvironmentDescriptor,
        cancel: &CancellationToken,
    ) -> RunSummary {
        self.execute_run(Uuid::new_v4(), stages, env, cancel).await
    }

    /// Execute `stages` in order.
    ///
    /// The cancellation token is checked before every stage. A stage only
    /// starts once every earlier stage passed, unless `continue_on_failure`
    /// is set; a skipped or disabled stage is not a pass. A stage that times
    /// out halts the pipeline regardless.
    pub async fn execute_run(
        &self,
        run_id: Uuid,
        stages: &[StageConfig],
        env: &EnvironmentDescriptor,
        cancel: &CancellationToken,
    ) -> RunSummary {
        let started_at = Utc::now();
        let scoped = ScopedEnv::scoped(
            &self.config.env_policy(),
            Some(env.root_path.as_path()),
            Some(env.binaries_path.as_path()),
        );

        info!(run_id = %run_id, stages = stages.len(), "Starting pipeline");

        let mut stage_results = Vec::with_capacity(stages.len());
        let mut prerequisites_passed = true;
        let mut halted = false;

        for config in stages {
            let result = if cancel.is_cancelled() {
                info!(stage = config.name(), "Run cancelled, not starting stage");
                StageResult::not_run(config.kind, SkipReason::Cancelled)
            } else if !config.enabled {
                info!(stage = config.name(), "Skipping disabled stage");
                StageResult::not_run(config.kind, SkipReason::Disabled)
            } else if halted || (!prerequisites_passed && !self.config.continue_on_failure) {
                info!(stage = config.name(), "Skipping stage after earlier failure");
                StageResult::not_run(config.kind, SkipReason::PrerequisiteFailed)
            } else {
                self.runner.execute(config, &scoped).await
            };

            if result.status == StageStatus::TimedOut {
                halted = true;
            }
            prerequisites_passed &= result.passed;
            stage_results.push(result);
        }

        let verdict = Verdict::evaluate(&stage_results, self.config.skip_counts_as_failure);
        info!(run_id = %run_id, passed = verdict.passed, "{}", verdict.message);

        RunSummary {
            run_id,
            stage_results,
            overall_passed: verdict.passed,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// A summary in which no stage ran because the run was cancelled.
    pub fn cancelled_run(&self, run_id: Uuid, stages: &[StageConfig]) -> RunSummary {
        let now = Utc::now();
        RunSummary {
            run_id,
            stage_results: stages
                .iter()
                .map(|s| StageResult::not_run(s.kind, SkipReason::Cancelled))
                .collect(),
            overall_passed: false,
            started_at: now,
            finished_at: now,
        }
    }
}
