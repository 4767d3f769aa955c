use autotest_core::reporter::{render_run_end, render_stage};
use autotest_core::{
    EnvironmentMetadata, ReportDocument, Reporter, RunLog, RunSummary, SkipReason, StageKind,
    StageResult,
};
use chrono::Utc;
use std::path::{Path, PathBuf};
use uuid::Uuid;

fn metadata(root: &Path) -> EnvironmentMetadata {
    EnvironmentMetadata {
        name: ".venv".to_string(),
        root_path: root.to_path_buf(),
        runtime_executable: root.join("bin").join("python"),
        runtime_version: "3.12.1".to_string(),
        package_manager_version: "pip 24.0".to_string(),
        manifest_digest: None,
    }
}

fn summary(results: Vec<StageResult>, overall_passed: bool) -> RunSummary {
    let now = Utc::now();
    RunSummary {
        run_id: Uuid::new_v4(),
        stage_results: results,
        overall_passed,
        started_at: now,
        finished_at: now,
    }
}

fn reporter(dir: &Path) -> (Reporter, PathBuf, PathBuf) {
    let log = dir.join("logs").join("test_run.log");
    let doc = dir.join("README.md");
    (
        Reporter::new(RunLog::new(&log), ReportDocument::new(&doc)),
        log,
        doc,
    )
}

#[test]
fn test_passing_run_logs_both_stages_passed() {
    let dir = tempfile::tempdir().unwrap();
    let (reporter, log, doc) = reporter(dir.path());

    let s = summary(
        vec![
            StageResult::completed(StageKind::Ci, 0, "ci output\n".to_string(), 10),
            StageResult::completed(StageKind::Cd, 0, "cd output\n".to_string(), 20),
        ],
        true,
    );
    let errors = reporter.report(&s, &metadata(&dir.path().join(".venv")));
    assert!(errors.is_empty());

    let content = std::fs::read_to_string(&log).unwrap();
    assert!(content.contains("CI: PASSED"));
    assert!(content.contains("CD: PASSED"));
    assert!(content.contains("Overall: PASSED"));
    let ci_at = content.find("ci output").unwrap();
    let cd_at = content.find("cd output").unwrap();
    assert!(ci_at < cd_at, "stage output must keep execution order");

    let document = std::fs::read_to_string(&doc).unwrap();
    assert_eq!(document.matches("## Environment Information").count(), 1);
    assert!(document.contains("3.12.1"));
}

#[test]
fn test_failed_ci_logs_cd_not_run() {
    let s = summary(
        vec![
            StageResult::completed(StageKind::Ci, 1, String::new(), 10),
            StageResult::not_run(StageKind::Cd, SkipReason::PrerequisiteFailed),
        ],
        false,
    );
    let block = render_run_end(&s);
    assert!(block.contains("CI: FAILED"));
    assert!(block.contains("CD: NOT RUN"));
    assert!(block.contains("Overall: FAILED"));
}

#[test]
fn test_log_and_document_only_grow() {
    let dir = tempfile::tempdir().unwrap();
    let (reporter, log, doc) = reporter(dir.path());
    let meta = metadata(&dir.path().join(".venv"));

    let mut previous_log = 0;
    let mut previous_doc = 0;
    for passed in [true, false, true] {
        let exit = if passed { 0 } else { 1 };
        let s = summary(
            vec![StageResult::completed(StageKind::Ci, exit, "out\n".to_string(), 1)],
            passed,
        );
        reporter.report(&s, &meta);

        let log_len = std::fs::metadata(&log).unwrap().len();
        let doc_len = std::fs::metadata(&doc).unwrap().len();
        assert!(log_len > previous_log);
        assert!(doc_len > previous_doc);
        previous_log = log_len;
        previous_doc = doc_len;
    }

    let document = std::fs::read_to_string(&doc).unwrap();
    assert_eq!(document.matches("## Environment Information").count(), 3);
}

#[test]
fn test_existing_content_is_preserved() {
    let dir = tempfile::tempdir().unwrap();
    let (reporter, log, doc) = reporter(dir.path());
    std::fs::create_dir_all(log.parent().unwrap()).unwrap();
    std::fs::write(&log, "previous run\n").unwrap();
    std::fs::write(&doc, "# Project\n").unwrap();

    let s = summary(vec![StageResult::completed(StageKind::Ci, 0, String::new(), 1)], true);
    reporter.report(&s, &metadata(&dir.path().join(".venv")));

    assert!(std::fs::read_to_string(&log).unwrap().starts_with("previous run\n"));
    assert!(std::fs::read_to_string(&doc).unwrap().starts_with("# Project\n"));
}

#[test]
fn test_setup_failure_still_appends_report() {
    let dir = tempfile::tempdir().unwrap();
    let (reporter, log, doc) = reporter(dir.path());
    let root = dir.path().join(".venv");

    let errors = reporter.record_setup_failure(
        Uuid::new_v4(),
        "dependency installation exited with code 1",
        &metadata(&root),
    );
    assert!(errors.is_empty());

    let content = std::fs::read_to_string(&log).unwrap();
    assert!(content.contains("Environment setup failed"));
    let document = std::fs::read_to_string(&doc).unwrap();
    assert!(document.contains(&root.display().to_string()));
    assert!(document.contains("ENVIRONMENT SETUP FAILED"));
}

#[test]
fn test_unwritable_log_is_reported_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    // A directory where the log file should be makes every append fail.
    let log = dir.path().join("blocked.log");
    std::fs::create_dir(&log).unwrap();
    let doc = dir.path().join("README.md");
    let reporter = Reporter::new(RunLog::new(&log), ReportDocument::new(&doc));

    let s = summary(vec![StageResult::completed(StageKind::Ci, 0, String::new(), 1)], true);
    let errors = reporter.report(&s, &metadata(&dir.path().join(".venv")));

    assert!(!errors.is_empty());
    assert!(doc.exists(), "document append is attempted despite log errors");
}

#[test]
fn test_timed_out_stage_heading() {
    let result = StageResult::timed_out(StageKind::Ci, "partial\n".to_string(), 1500);
    let block = render_stage(&result);
    assert!(block.contains("timed out after 1500ms"));
    assert!(block.contains("partial"));
}
