//! Environment backends
//!
//! A backend knows how to create an isolated environment, install a
//! manifest into it and report its runtime versions. `VenvBackend` drives
//! Python's `venv` module and `pip`.

use crate::error::ProvisionError;
use crate::manifest::DependencyManifest;
use crate::Result;
use async_trait::async_trait;
use autotest_core::domain::environment::environment_name;
use autotest_core::{
    EnvPolicy, EnvironmentDescriptor, EnvironmentMetadata, ProcessRunner, ScopedEnv,
    UNKNOWN_VERSION,
};
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Default base runtime used to create environments.
pub const DEFAULT_RUNTIME: &str = if cfg!(windows) { "python" } else { "python3" };

/// Name of the executables directory inside an environment.
pub fn binaries_dir(root: &Path) -> PathBuf {
    if cfg!(windows) {
        root.join("Scripts")
    } else {
        root.join("bin")
    }
}

/// Interpreter inside an environment.
pub fn environment_python(root: &Path) -> PathBuf {
    let name = if cfg!(windows) { "python.exe" } else { "python" };
    binaries_dir(root).join(name)
}

/// Extract `X.Y[.Z]` from a `--version` line such as `Python 3.11.4`.
pub fn parse_runtime_version(text: &str) -> Option<String> {
    let re = Regex::new(r"(\d+\.\d+(?:\.\d+)?)").ok()?;
    re.captures(text).map(|c| c[1].to_string())
}

/// Creates, populates and inspects isolated environments
#[async_trait]
pub trait EnvironmentBackend: Send + Sync {
    /// Base runtime used to create environments
    fn runtime(&self) -> &Path;

    /// Executables directory for an environment rooted at `root`
    fn binaries_dir(&self, root: &Path) -> PathBuf {
        binaries_dir(root)
    }

    /// Create a fresh environment at `root` (which does not exist)
    async fn create(&self, root: &Path) -> Result<()>;

    /// Install every requirement of `manifest` into `env`
    async fn install(&self, env: &EnvironmentDescriptor, manifest: &DependencyManifest)
        -> Result<()>;

    /// Report versions for the environment at `root`, falling back to the
    /// base runtime when the environment has no interpreter
    async fn probe(&self, root: &Path) -> EnvironmentMetadata;
}

/// Python `venv` + `pip` backend
#[derive(Debug, Clone)]
pub struct VenvBackend {
    runtime: PathBuf,
    runner: ProcessRunner,
    env_policy: EnvPolicy,
}

impl Default for VenvBackend {
    fn default() -> Self {
        Self::new(PathBuf::from(DEFAULT_RUNTIME))
    }
}

impl VenvBackend {
    pub fn new(runtime: PathBuf) -> Self {
        VenvBackend {
            runtime,
            runner: ProcessRunner::new(),
            env_policy: EnvPolicy::default(),
        }
    }

    /// Use a specific runner (e.g. one with a timeout)
    pub fn with_runner(mut self, runner: ProcessRunner) -> Self {
        self.runner = runner;
        self
    }

    /// Use a specific environment policy for backend commands
    pub fn with_env_policy(mut self, policy: EnvPolicy) -> Self {
        self.env_policy = policy;
        self
    }

    fn work_dir(root: &Path) -> &Path {
        root.parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
    }

    async fn capture(&self, argv: Vec<String>, cwd: &Path, env: &ScopedEnv) -> Option<String> {
        match self.runner.run(&argv, cwd, env).await {
            Ok(out) if out.success() => Some(out.combined_output.trim().to_string()),
            Ok(out) => {
                debug!(command = ?argv, exit_code = out.exit_code, "version probe failed");
                None
            }
            Err(e) => {
                debug!(command = ?argv, error = %e, "version probe failed");
                None
            }
        }
    }
}

#[async_trait]
impl EnvironmentBackend for VenvBackend {
    fn runtime(&self) -> &Path {
        &self.runtime
    }

    async fn create(&self, root: &Path) -> Result<()> {
        info!(root = %root.display(), runtime = %self.runtime.display(), "Creating environment");
        let argv = vec![
            self.runtime.display().to_string(),
            "-m".to_string(),
            "venv".to_string(),
            root.display().to_string(),
        ];
        let env = ScopedEnv::scoped(&self.env_policy, None, None);
        let output = self.runner.run(&argv, Self::work_dir(root), &env).await?;

        if !output.success() {
            return Err(ProvisionError::CreateFailed {
                exit_code: output.exit_code,
                output: output.combined_output,
            });
        }
        Ok(())
    }

    async fn install(
        &self,
        env: &EnvironmentDescriptor,
        manifest: &DependencyManifest,
    ) -> Result<()> {
        info!(
            manifest = %manifest.path.display(),
            requirements = manifest.requirements.len(),
            "Installing dependencies"
        );
        let argv = vec![
            environment_python(&env.root_path).display().to_string(),
            "-m".to_string(),
            "pip".to_string(),
            "install".to_string(),
            "--no-input".to_string(),
            "--requirement".to_string(),
            manifest.path.display().to_string(),
        ];
        let scoped = ScopedEnv::scoped(
            &self.env_policy,
            Some(env.root_path.as_path()),
            Some(env.binaries_path.as_path()),
        );
        let output = self
            .runner
            .run(&argv, Self::work_dir(&env.root_path), &scoped)
            .await?;

        if !output.success() {
            return Err(ProvisionError::InstallFailed {
                exit_code: output.exit_code,
                output: output.combined_output,
            });
        }
        Ok(())
    }

    async fn probe(&self, root: &Path) -> EnvironmentMetadata {
        let env_python = environment_python(root);
        let python = if env_python.exists() {
            env_python
        } else {
            self.runtime.clone()
        };

        let bin = binaries_dir(root);
        let scoped = if bin.is_dir() {
            ScopedEnv::scoped(&self.env_policy, Some(root), Some(bin.as_path()))
        } else {
            ScopedEnv::scoped(&self.env_policy, None, None)
        };
        let cwd = Self::work_dir(root);
        let exe = python.display().to_string();

        let runtime_version = self
            .capture(vec![exe.clone(), "--version".to_string()], cwd, &scoped)
            .await
            .and_then(|line| parse_runtime_version(&line))
            .unwrap_or_else(|| UNKNOWN_VERSION.to_string());
        let package_manager_version = self
            .capture(
                vec![exe, "-m".to_string(), "pip".to_string(), "--version".to_string()],
                cwd,
                &scoped,
            )
            .await
            .and_then(|text| text.lines().next().map(str::to_string))
            .unwrap_or_else(|| UNKNOWN_VERSION.to_string());

        EnvironmentMetadata {
            name: environment_name(root),
            root_path: root.to_path_buf(),
            runtime_executable: python,
            runtime_version,
            package_manager_version,
            manifest_digest: None,
        }
    }
}
