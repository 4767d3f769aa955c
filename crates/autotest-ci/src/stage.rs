//! Pipeline stage definitions and configuration.

use autotest_core::StageKind;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Script suffix for the default stage executables on this platform.
pub const SCRIPT_SUFFIX: &str = if cfg!(windows) { "bat" } else { "sh" };

/// Configuration for a pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageConfig {
    /// Which stage this is.
    pub kind: StageKind,

    /// Executable, relative to the project root unless absolute.
    pub executable: PathBuf,

    /// Extra arguments passed after the executable.
    #[serde(default)]
    pub args: Vec<String>,

    /// Optional argv prefix, e.g. `["sh"]`, used to launch the executable.
    #[serde(default)]
    pub interpreter: Vec<String>,

    /// Working directory, relative to the project root. Defaults to the
    /// executable's directory.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Per-stage timeout in seconds; overrides the pipeline default.
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Whether this stage is enabled.
    #[serde(default = "enabled_default")]
    pub enabled: bool,
}

fn enabled_default() -> bool {
    true
}

impl StageConfig {
    /// Create a stage running `executable`.
    pub fn new(kind: StageKind, executable: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            executable: executable.into(),
            args: Vec::new(),
            interpreter: Vec::new(),
            working_dir: None,
            timeout_secs: None,
            enabled: true,
        }
    }

    /// The conventional stage: `ci/ci_pipeline.<suffix>` run from `ci/`
    /// (likewise for CD).
    pub fn default_for(kind: StageKind) -> Self {
        let dir = match kind {
            StageKind::Ci => "ci",
            StageKind::Cd => "cd",
        };
        let script = Path::new(dir).join(format!("{dir}_pipeline.{SCRIPT_SUFFIX}"));
        Self::new(kind, script).with_working_dir(dir)
    }

    /// Append arguments.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Launch the executable through `interpreter`.
    pub fn with_interpreter<I, S>(mut self, interpreter: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.interpreter = interpreter.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Disable this stage.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Stage name used in results and logs.
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    /// Full argv for a resolved executable path.
    pub fn command(&self, executable: &Path) -> Vec<String> {
        let mut argv = self.interpreter.clone();
        argv.push(executable.display().to_string());
        argv.extend(self.args.iter().cloned());
        argv
    }
}

/// The default CI then CD stage list.
pub fn default_stages() -> Vec<StageConfig> {
    vec![
        StageConfig::default_for(StageKind::Ci),
        StageConfig::default_for(StageKind::Cd),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_stage_layout() {
        let ci = StageConfig::default_for(StageKind::Ci);
        assert_eq!(ci.name(), "CI");
        assert_eq!(
            ci.executable,
            Path::new("ci").join(format!("ci_pipeline.{SCRIPT_SUFFIX}"))
        );
        assert_eq!(ci.working_dir, Some(PathBuf::from("ci")));
        assert!(ci.enabled);

        let cd = StageConfig::default_for(StageKind::Cd);
        assert_eq!(cd.working_dir, Some(PathBuf::from("cd")));
    }

    #[test]
    fn test_default_stages_order() {
        let stages = default_stages();
        let kinds: Vec<_> = stages.iter().map(|s| s.kind).collect();
        assert_eq!(kinds, vec![StageKind::Ci, StageKind::Cd]);
    }

    #[test]
    fn test_command_with_interpreter_and_args() {
        let config = StageConfig::new(StageKind::Ci, "ci/run.sh")
            .with_interpreter(["sh"])
            .with_args(["--fast"]);
        let argv = config.command(Path::new("/p/ci/run.sh"));
        assert_eq!(argv, vec!["sh", "/p/ci/run.sh", "--fast"]);
    }

    #[test]
    fn test_stage_config_disabled() {
        let config = StageConfig::default_for(StageKind::Cd).disabled();
        assert!(!config.enabled);
    }

    #[test]
    fn test_deserialize_minimal_stage() {
        let config: StageConfig =
            serde_json::from_str(r#"{"kind":"cd","executable":"cd/deploy.sh"}"#).unwrap();
        assert_eq!(config.kind, StageKind::Cd);
        assert!(config.enabled);
        assert!(config.args.is_empty());
        assert_eq!(config.timeout_secs, None);
    }
}
