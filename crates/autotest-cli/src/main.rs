//! autotest - provision an isolated environment, run CI then CD, report
//!
//! The `autotest` command:
//! - recreates the project's virtual environment from its manifest
//! - runs the CI stage, then the CD stage when CI passed
//! - appends the run to `logs/test_run.log` and environment details to `README.md`
//! - exits 0 on success, 1 on a stage failure, 2 when provisioning failed,
//!   3 on a configuration error and 130 when interrupted

mod config;

use anyhow::{Context, Result};
use autotest_ci::{AutoTest, ExitCode, RunOutcome};
use autotest_core::StageStatus;
use clap::Parser;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn, Level};

use crate::config::Overrides;

const RULE: &str = "================================================================================";

#[derive(Parser)]
#[command(name = "autotest")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Provision a clean environment and run the CI/CD pipeline", long_about = None)]
struct Cli {
    /// Config file (default: <project-root>/autotest.toml when present)
    #[arg(short, long, env = "AUTOTEST_CONFIG")]
    config: Option<PathBuf>,

    /// Project root (default: current directory)
    #[arg(long)]
    project_root: Option<PathBuf>,

    /// Run CD even when CI failed
    #[arg(long)]
    continue_on_failure: bool,

    /// Do not fail the run when a stage executable is missing
    #[arg(long)]
    allow_skipped: bool,

    /// Per-stage timeout in seconds (0 = none)
    #[arg(long)]
    stage_timeout: Option<u64>,

    /// Print the run summary as JSON on stdout
    #[arg(long)]
    json: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    autotest_core::init_tracing(cli.log_json, level);

    let code = match run(cli).await {
        Ok(code) => code.code(),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::StageFailure.code()
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let overrides = Overrides {
        project_root: cli.project_root.clone(),
        continue_on_failure: cli.continue_on_failure,
        allow_skipped: cli.allow_skipped,
        stage_timeout_secs: cli.stage_timeout,
    };
    let config = match config::load(cli.config.as_deref(), &overrides) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Configuration error");
            eprintln!("configuration error: {e}");
            return Ok(ExitCode::ConfigError);
        }
    };

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, no further stages will start");
                cancel.cancel();
            }
        }
    });

    let autotest = AutoTest::new(config);
    println!("Project Root: {}", autotest.project_root().display());
    println!("Log File: {}", autotest.reporter().log().path().display());
    println!();

    let outcome = autotest.run(cancel).await;

    for e in &outcome.reporting_errors {
        eprintln!("warning: {e}");
    }
    print!("{}", render_summary(&outcome));

    if cli.json {
        if let Some(summary) = &outcome.summary {
            let json =
                serde_json::to_string_pretty(summary).context("Failed to serialize run summary")?;
            println!("{json}");
        }
    }

    Ok(outcome.exit_code)
}

/// Console summary printed after every run.
fn render_summary(outcome: &RunOutcome) -> String {
    let mut out = format!("\n{RULE}\nTEST SUMMARY\n{RULE}\n");

    if let Some(error) = &outcome.provision_error {
        out.push_str(&format!("Environment setup failed: {error}\n"));
    }
    if let Some(summary) = &outcome.summary {
        for result in &summary.stage_results {
            let line = match &result.status {
                StageStatus::NotRun(reason) => {
                    format!("{} Pipeline: NOT RUN ({reason})", result.stage_name)
                }
                StageStatus::Failed => format!(
                    "{} Pipeline: FAILED (exit code {})",
                    result.stage_name,
                    result.exit_code.unwrap_or(-1)
                ),
                status => format!("{} Pipeline: {}", result.stage_name, status.label()),
            };
            out.push_str(&line);
            out.push('\n');
        }
    }

    let overall = match outcome.exit_code {
        ExitCode::Success => "ALL TESTS PASSED",
        ExitCode::Cancelled => "CANCELLED",
        _ => "TESTS FAILED",
    };
    out.push_str(&format!("Overall Result: {overall}\n{RULE}\n"));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use autotest_core::{RunSummary, SkipReason, StageKind, StageResult};
    use chrono::Utc;
    use clap::CommandFactory;
    use uuid::Uuid;

    fn outcome(results: Vec<StageResult>, exit_code: ExitCode) -> RunOutcome {
        let now = Utc::now();
        let run_id = Uuid::new_v4();
        RunOutcome {
            run_id,
            summary: Some(RunSummary {
                run_id,
                overall_passed: exit_code == ExitCode::Success,
                stage_results: results,
                started_at: now,
                finished_at: now,
            }),
            exit_code,
            provision_error: None,
            reporting_errors: Vec::new(),
        }
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_flags() {
        let cli = Cli::try_parse_from([
            "autotest",
            "--project-root",
            "/work",
            "--continue-on-failure",
            "--stage-timeout",
            "120",
            "--json",
        ])
        .unwrap();
        assert_eq!(cli.project_root, Some(PathBuf::from("/work")));
        assert!(cli.continue_on_failure);
        assert!(!cli.allow_skipped);
        assert_eq!(cli.stage_timeout, Some(120));
        assert!(cli.json);
    }

    #[test]
    fn test_summary_all_passed() {
        let text = render_summary(&outcome(
            vec![
                StageResult::completed(StageKind::Ci, 0, String::new(), 10),
                StageResult::completed(StageKind::Cd, 0, String::new(), 10),
            ],
            ExitCode::Success,
        ));
        assert!(text.contains("CI Pipeline: PASSED"));
        assert!(text.contains("CD Pipeline: PASSED"));
        assert!(text.contains("Overall Result: ALL TESTS PASSED"));
    }

    #[test]
    fn test_summary_ci_failed() {
        let text = render_summary(&outcome(
            vec![
                StageResult::completed(StageKind::Ci, 1, String::new(), 10),
                StageResult::not_run(StageKind::Cd, SkipReason::PrerequisiteFailed),
            ],
            ExitCode::StageFailure,
        ));
        assert!(text.contains("CI Pipeline: FAILED (exit code 1)"));
        assert!(text.contains("CD Pipeline: NOT RUN"));
        assert!(text.contains("Overall Result: TESTS FAILED"));
    }

    #[test]
    fn test_summary_provisioning_failed() {
        let run = RunOutcome {
            run_id: Uuid::new_v4(),
            summary: None,
            exit_code: ExitCode::ProvisionFailure,
            provision_error: Some("dependency installation failed".to_string()),
            reporting_errors: Vec::new(),
        };
        let text = render_summary(&run);
        assert!(text.contains("Environment setup failed: dependency installation failed"));
        assert!(text.contains("Overall Result: TESTS FAILED"));
    }
}
