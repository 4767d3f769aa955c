//! External process execution with a scoped environment.
//!
//! Commands are always an explicit argument vector; nothing is passed
//! through a shell. The child's environment is cleared and rebuilt from a
//! [`ScopedEnv`], so a run behaves the same regardless of what the parent
//! process happens to have exported.
//!
//! Output capture: stdout and stderr are drained concurrently, line by
//! line, into a single buffer in the order the lines are read. The two
//! pipes are independent, so interleaving across streams is line-granular
//! and best-effort.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::debug;

/// Variables copied from the parent environment by default.
pub const DEFAULT_INHERITED_VARS: &[&str] = &[
    "HOME",
    "USER",
    "LOGNAME",
    "LANG",
    "LC_ALL",
    "TERM",
    "TMPDIR",
    "TEMP",
    "TMP",
    "SYSTEMROOT",
    "COMSPEC",
    "PATHEXT",
];

/// Set to `1` to stop pytest from auto-loading installed plugins.
pub const PLUGIN_AUTOLOAD_VAR: &str = "PYTEST_DISABLE_PLUGIN_AUTOLOAD";

/// Marks the active virtual environment for tools that look for it.
pub const VIRTUAL_ENV_VAR: &str = "VIRTUAL_ENV";

/// Transport-level failures. A nonzero exit code is never one of these.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("command is empty")]
    EmptyCommand,

    #[error("working directory does not exist: {}", .path.display())]
    WorkingDirMissing { path: PathBuf },

    #[error("command not found: {program}")]
    NotFound { program: String },

    #[error("permission denied launching {program}")]
    PermissionDenied { program: String },

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("i/o error while running {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} timed out after {after_secs}s")]
    TimedOut {
        program: String,
        after_secs: u64,
        partial_output: String,
    },
}

impl ProcessError {
    fn from_spawn(program: &str, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => ProcessError::NotFound {
                program: program.to_string(),
            },
            std::io::ErrorKind::PermissionDenied => ProcessError::PermissionDenied {
                program: program.to_string(),
            },
            _ => ProcessError::Spawn {
                program: program.to_string(),
                source: err,
            },
        }
    }
}

/// Result of a process that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code; `-1` when the process was terminated by a signal.
    pub exit_code: i32,

    /// Combined stdout and stderr.
    pub combined_output: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,
}

impl ProcessOutput {
    /// Whether the process exited 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// How the environment's binaries directory is combined with the inherited `PATH`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PathMode {
    /// Binaries directory first, then the inherited `PATH`.
    #[default]
    Prepend,

    /// Binaries directory only.
    Replace,
}

/// Rules for building a child environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EnvPolicy {
    /// Parent variables copied into the child when present.
    pub inherit: Vec<String>,

    /// How `PATH` is composed.
    pub path_mode: PathMode,

    /// Export `PYTEST_DISABLE_PLUGIN_AUTOLOAD=1`.
    pub disable_plugin_autoload: bool,
}

impl Default for EnvPolicy {
    fn default() -> Self {
        Self {
            inherit: DEFAULT_INHERITED_VARS
                .iter()
                .map(|v| v.to_string())
                .collect(),
            path_mode: PathMode::Prepend,
            disable_plugin_autoload: true,
        }
    }
}

/// The complete, explicit environment handed to a child process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopedEnv {
    vars: BTreeMap<String, String>,
}

impl ScopedEnv {
    /// An empty environment.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from the current process environment.
    pub fn scoped(policy: &EnvPolicy, env_root: Option<&Path>, binaries: Option<&Path>) -> Self {
        Self::from_parent(policy, env_root, binaries, std::env::vars())
    }

    /// Build from an explicit parent environment.
    pub fn from_parent<I>(
        policy: &EnvPolicy,
        env_root: Option<&Path>,
        binaries: Option<&Path>,
        parent: I,
    ) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let parent: BTreeMap<String, String> = parent.into_iter().collect();
        let mut vars = BTreeMap::new();

        for name in &policy.inherit {
            if let Some(value) = parent.get(name) {
                vars.insert(name.clone(), value.clone());
            }
        }

        let mut path_entries: Vec<PathBuf> = Vec::new();
        if let Some(bin) = binaries {
            path_entries.push(bin.to_path_buf());
        }
        if policy.path_mode == PathMode::Prepend {
            if let Some(inherited) = parent.get("PATH") {
                path_entries.extend(std::env::split_paths(&OsString::from(inherited)));
            }
        }
        if !path_entries.is_empty() {
            match std::env::join_paths(&path_entries) {
                Ok(joined) => {
                    vars.insert("PATH".to_string(), joined.to_string_lossy().into_owned());
                }
                Err(e) => debug!(error = %e, "could not join PATH entries"),
            }
        }

        if let Some(root) = env_root {
            vars.insert(VIRTUAL_ENV_VAR.to_string(), root.display().to_string());
        }
        if policy.disable_plugin_autoload {
            vars.insert(PLUGIN_AUTOLOAD_VAR.to_string(), "1".to_string());
        }

        Self { vars }
    }

    /// Set or override a variable.
    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    /// Look up a variable.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Iterate over all variables in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

/// Runs external commands and captures their combined output.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    timeout: Option<Duration>,
}

impl ProcessRunner {
    /// A runner without a timeout.
    pub fn new() -> Self {
        Self::default()
    }

    /// A runner that kills the child after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }

    /// Timeout from seconds; `0` disables it.
    pub fn from_timeout_secs(secs: u64) -> Self {
        if secs == 0 {
            Self::new()
        } else {
            Self::with_timeout(Duration::from_secs(secs))
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Run `command` in `cwd` with exactly the variables in `env`.
    ///
    /// Returns `Ok` for any exit code. Only transport failures and
    /// timeouts are errors.
    pub async fn run(
        &self,
        command: &[String],
        cwd: &Path,
        env: &ScopedEnv,
    ) -> Result<ProcessOutput, ProcessError> {
        let (program, args) = command.split_first().ok_or(ProcessError::EmptyCommand)?;

        if !cwd.is_dir() {
            return Err(ProcessError::WorkingDirMissing {
                path: cwd.to_path_buf(),
            });
        }

        debug!(program = %program, cwd = %cwd.display(), "spawning process");
        let start = Instant::now();

        let mut child = Command::new(program)
            .args(args)
            .current_dir(cwd)
            .env_clear()
            .envs(env.iter())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ProcessError::from_spawn(program, e))?;

        let mut combined = String::new();
        let status = match self.timeout {
            Some(limit) => {
                match tokio::time::timeout(limit, drain(&mut child, &mut combined)).await {
                    Ok(status) => status,
                    Err(_) => {
                        let _ = child.kill().await;
                        return Err(ProcessError::TimedOut {
                            program: program.clone(),
                            after_secs: limit.as_secs(),
                            partial_output: combined,
                        });
                    }
                }
            }
            None => drain(&mut child, &mut combined).await,
        }
        .map_err(|source| ProcessError::Io {
            program: program.clone(),
            source,
        })?;

        Ok(ProcessOutput {
            exit_code: status.code().unwrap_or(-1),
            combined_output: combined,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

/// Line reader that keeps partial lines across cancelled reads.
struct LineReader<R> {
    reader: BufReader<R>,
    pending: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
            pending: Vec::new(),
        }
    }

    async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        let read = self.reader.read_until(b'\n', &mut self.pending).await?;
        if read == 0 && self.pending.is_empty() {
            return Ok(None);
        }
        let line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Ok(Some(line))
    }
}

async fn next_line<R: AsyncRead + Unpin>(
    reader: &mut Option<LineReader<R>>,
) -> std::io::Result<Option<String>> {
    match reader {
        Some(r) => r.next_line().await,
        None => Ok(None),
    }
}

/// Drain both pipes into `combined`, then reap the child.
async fn drain(child: &mut Child, combined: &mut String) -> std::io::Result<ExitStatus> {
    let mut stdout = child.stdout.take().map(LineReader::new);
    let mut stderr = child.stderr.take().map(LineReader::new);

    while stdout.is_some() || stderr.is_some() {
        tokio::select! {
            line = next_line(&mut stdout), if stdout.is_some() => match line? {
                Some(l) => combined.push_str(&l),
                None => stdout = None,
            },
            line = next_line(&mut stderr), if stderr.is_some() => match line? {
                Some(l) => combined.push_str(&l),
                None => stderr = None,
            },
        }
    }

    child.wait().await
}
