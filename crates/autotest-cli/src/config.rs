//! Configuration loading: `autotest.toml` plus command-line overrides.

use autotest_ci::AutoTestConfig;
use autotest_core::StageKind;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Looked up in the project root when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "autotest.toml";

/// Configuration could not be loaded; exit code 3.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("project root is not a directory: {}", .0.display())]
    ProjectRootMissing(PathBuf),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Values given on the command line; they win over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub project_root: Option<PathBuf>,
    pub continue_on_failure: bool,
    pub allow_skipped: bool,
    pub stage_timeout_secs: Option<u64>,
}

/// Load the configuration.
///
/// An explicit `config_path` must exist. Otherwise `autotest.toml` is read
/// from the project root when present and defaults are used when not. A
/// relative `project_root` inside the file is relative to the file.
pub fn load(config_path: Option<&Path>, overrides: &Overrides) -> Result<AutoTestConfig, ConfigError> {
    let candidate = match config_path {
        Some(path) => Some(path.to_path_buf()),
        None => {
            let root = overrides
                .project_root
                .clone()
                .unwrap_or_else(|| PathBuf::from("."));
            Some(root.join(DEFAULT_CONFIG_FILE)).filter(|p| p.is_file())
        }
    };

    let mut config = match &candidate {
        Some(path) => {
            let mut config = read_file(path)?;
            if config.project_root.is_relative() {
                let base = path.parent().unwrap_or_else(|| Path::new("."));
                config.project_root = base.join(&config.project_root);
            }
            config
        }
        None => {
            debug!("No config file found, using defaults");
            AutoTestConfig::default()
        }
    };

    apply_overrides(&mut config, overrides);

    config.project_root = config
        .project_root
        .canonicalize()
        .ok()
        .filter(|p| p.is_dir())
        .ok_or_else(|| ConfigError::ProjectRootMissing(config.project_root.clone()))?;

    validate(&config)?;
    Ok(config)
}

/// Parse a config file.
pub fn read_file(path: &Path) -> Result<AutoTestConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config = toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), "Loaded config file");
    Ok(config)
}

fn apply_overrides(config: &mut AutoTestConfig, overrides: &Overrides) {
    if let Some(root) = &overrides.project_root {
        config.project_root = root.clone();
    }
    if overrides.continue_on_failure {
        config.pipeline.continue_on_failure = true;
    }
    if overrides.allow_skipped {
        config.pipeline.skip_counts_as_failure = false;
    }
    if let Some(secs) = overrides.stage_timeout_secs {
        config.pipeline.stage_timeout_secs = secs;
    }
}

fn validate(config: &AutoTestConfig) -> Result<(), ConfigError> {
    if config.pipeline.stages.is_empty() {
        return Err(ConfigError::Invalid("no stages configured".to_string()));
    }

    for pair in config.pipeline.stages.windows(2) {
        if pair[1].kind < pair[0].kind {
            return Err(ConfigError::Invalid(format!(
                "stage {} must not be listed before stage {}",
                pair[0].kind, pair[1].kind
            )));
        }
    }

    let mut seen: HashSet<StageKind> = HashSet::new();
    for stage in &config.pipeline.stages {
        if !seen.insert(stage.kind) {
            return Err(ConfigError::Invalid(format!(
                "stage {} is configured more than once",
                stage.kind
            )));
        }
        if stage.executable.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "stage {} has an empty executable",
                stage.kind
            )));
        }
    }

    if config.reporting.rotate_max_bytes.is_some() && config.reporting.rotate_keep == 0 {
        return Err(ConfigError::Invalid(
            "rotate_keep must be at least 1 when rotation is enabled".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use autotest_core::PathMode;

    fn overrides_for(dir: &Path) -> Overrides {
        Overrides {
            project_root: Some(dir.to_path_buf()),
            ..Overrides::default()
        }
    }

    #[test]
    fn test_defaults_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = load(None, &overrides_for(dir.path())).unwrap();

        assert_eq!(config.project_root, dir.path().canonicalize().unwrap());
        assert_eq!(config.environment.root, PathBuf::from(".venv"));
        assert!(!config.pipeline.continue_on_failure);
        assert_eq!(config.pipeline.stages.len(), 2);
    }

    #[test]
    fn test_reads_project_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(DEFAULT_CONFIG_FILE),
            r#"
[environment]
root = "env"
containment = "redirect_to_sibling"

[pipeline]
stage_timeout_secs = 600
path_mode = "replace"

[[pipeline.stages]]
kind = "ci"
executable = "scripts/test.sh"

[reporting]
log = "out/run.log"
rotate_max_bytes = 1048576
"#,
        )
        .unwrap();

        let config = load(None, &overrides_for(dir.path())).unwrap();
        assert_eq!(config.environment.root, PathBuf::from("env"));
        assert_eq!(config.pipeline.stage_timeout_secs, 600);
        assert_eq!(config.pipeline.path_mode, PathMode::Replace);
        assert_eq!(config.pipeline.stages.len(), 1);
        assert_eq!(config.pipeline.stages[0].kind, StageKind::Ci);
        assert!(config.pipeline.stages[0].enabled);
        assert_eq!(config.reporting.log, PathBuf::from("out/run.log"));
        assert_eq!(config.reporting.rotate_keep, 3);
        assert_eq!(config.environment.manifest, PathBuf::from("requirements.txt"));
    }

    #[test]
    fn test_project_root_relative_to_config_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("app")).unwrap();
        let path = dir.path().join("ci.toml");
        std::fs::write(&path, "project_root = \"app\"\n").unwrap();

        let config = load(Some(&path), &Overrides::default()).unwrap();
        assert_eq!(
            config.project_root,
            dir.path().join("app").canonicalize().unwrap()
        );
    }

    #[test]
    fn test_overrides_win() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(DEFAULT_CONFIG_FILE),
            "[pipeline]\nstage_timeout_secs = 10\n",
        )
        .unwrap();

        let overrides = Overrides {
            continue_on_failure: true,
            allow_skipped: true,
            stage_timeout_secs: Some(30),
            ..overrides_for(dir.path())
        };
        let config = load(None, &overrides).unwrap();
        assert!(config.pipeline.continue_on_failure);
        assert!(!config.pipeline.skip_counts_as_failure);
        assert_eq!(config.pipeline.stage_timeout_secs, 30);
    }

    #[test]
    fn test_missing_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(Some(&dir.path().join("nope.toml")), &Overrides::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(DEFAULT_CONFIG_FILE), "[pipeline\n").unwrap();
        let err = load(None, &overrides_for(dir.path())).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_unknown_enum_value_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(DEFAULT_CONFIG_FILE),
            "[environment]\ncontainment = \"ignore\"\n",
        )
        .unwrap();
        let err = load(None, &overrides_for(dir.path())).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_missing_project_root() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(None, &overrides_for(&dir.path().join("absent"))).unwrap_err();
        assert!(matches!(err, ConfigError::ProjectRootMissing(_)));
    }

    #[test]
    fn test_duplicate_stage_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(DEFAULT_CONFIG_FILE),
            r#"
[[pipeline.stages]]
kind = "ci"
executable = "a.sh"

[[pipeline.stages]]
kind = "ci"
executable = "b.sh"
"#,
        )
        .unwrap();
        let err = load(None, &overrides_for(dir.path())).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_cd_before_ci_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(DEFAULT_CONFIG_FILE),
            r#"
[[pipeline.stages]]
kind = "cd"
executable = "cd/cd_pipeline.sh"

[[pipeline.stages]]
kind = "ci"
executable = "ci/ci_pipeline.sh"
"#,
        )
        .unwrap();
        let err = load(None, &overrides_for(dir.path())).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => {
                assert!(msg.contains("CD must not be listed before stage CI"))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
