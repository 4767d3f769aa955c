//! In-process fake backend (testing only)
//!
//! `FakeBackend` creates a plausible directory layout without running any
//! external tool and can be scripted to fail creation or installation.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use autotest_core::domain::environment::environment_name;
use autotest_core::{EnvironmentDescriptor, EnvironmentMetadata};

use crate::backend::{binaries_dir, EnvironmentBackend};
use crate::error::ProvisionError;
use crate::manifest::DependencyManifest;
use crate::Result;

/// Runtime version reported by `FakeBackend::probe`.
pub const FAKE_RUNTIME_VERSION: &str = "3.11.4";

/// Scripted environment backend.
#[derive(Debug)]
pub struct FakeBackend {
    runtime: PathBuf,
    create_exit_code: i32,
    install_exit_code: i32,
    calls: Mutex<Vec<String>>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBackend {
    pub fn new() -> Self {
        FakeBackend {
            runtime: PathBuf::from("/opt/fake/bin/python3"),
            create_exit_code: 0,
            install_exit_code: 0,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Make `create` exit with `code`.
    pub fn failing_create(mut self, code: i32) -> Self {
        self.create_exit_code = code;
        self
    }

    /// Make `install` exit with `code`.
    pub fn failing_install(mut self, code: i32) -> Self {
        self.install_exit_code = code;
        self
    }

    /// Every call made so far, e.g. `create:/tmp/x/.venv`.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn install_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.starts_with("install:"))
            .count()
    }

    fn record(&self, call: String) {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(call);
    }
}

#[async_trait]
impl EnvironmentBackend for FakeBackend {
    fn runtime(&self) -> &Path {
        &self.runtime
    }

    async fn create(&self, root: &Path) -> Result<()> {
        self.record(format!("create:{}", root.display()));
        if self.create_exit_code != 0 {
            return Err(ProvisionError::CreateFailed {
                exit_code: self.create_exit_code,
                output: "fake create failure".to_string(),
            });
        }
        let bin = binaries_dir(root);
        std::fs::create_dir_all(&bin)?;
        std::fs::write(root.join("pyvenv.cfg"), b"home = /opt/fake/bin\n")?;
        Ok(())
    }

    async fn install(
        &self,
        env: &EnvironmentDescriptor,
        manifest: &DependencyManifest,
    ) -> Result<()> {
        self.record(format!(
            "install:{}:{}",
            env.root_path.display(),
            manifest.requirements.len()
        ));
        if self.install_exit_code != 0 {
            return Err(ProvisionError::InstallFailed {
                exit_code: self.install_exit_code,
                output: "fake install failure".to_string(),
            });
        }
        let site = env.root_path.join("site-packages");
        std::fs::create_dir_all(&site)?;
        for req in &manifest.requirements {
            std::fs::write(site.join(&req.name), req.constraint.as_bytes())?;
        }
        Ok(())
    }

    async fn probe(&self, root: &Path) -> EnvironmentMetadata {
        EnvironmentMetadata {
            name: environment_name(root),
            root_path: root.to_path_buf(),
            runtime_executable: binaries_dir(root).join("python"),
            runtime_version: FAKE_RUNTIME_VERSION.to_string(),
            package_manager_version: "pip 24.0 (fake)".to_string(),
            manifest_digest: None,
        }
    }
}
