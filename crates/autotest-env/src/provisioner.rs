//! Environment provisioning
//!
//! `Provisioner::provision` turns a target directory into a clean,
//! isolated environment: guard against self-deletion, remove whatever is
//! there, create a fresh environment and install the manifest from scratch.

use crate::backend::EnvironmentBackend;
use crate::guard::{resolve_target, running_binaries, stale_siblings, ContainmentPolicy};
use crate::manifest::DependencyManifest;
use crate::removal::remove_environment;
use crate::Result;
use autotest_core::{obs, EnvironmentDescriptor, EnvironmentMetadata};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Provisioning configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProvisionConfig {
    /// Environment root, relative to the project root
    pub root: PathBuf,
    /// Dependency manifest, relative to the project root
    pub manifest: PathBuf,
    /// Base runtime used to create the environment
    pub runtime: PathBuf,
    /// Behaviour when the environment contains a running binary
    pub containment: ContainmentPolicy,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        ProvisionConfig {
            root: PathBuf::from(".venv"),
            manifest: PathBuf::from("requirements.txt"),
            runtime: PathBuf::from(crate::backend::DEFAULT_RUNTIME),
            containment: ContainmentPolicy::Abort,
        }
    }
}

/// Creates clean environments through an `EnvironmentBackend`
pub struct Provisioner {
    backend: Arc<dyn EnvironmentBackend>,
    manifest_path: PathBuf,
    containment: ContainmentPolicy,
    running: Vec<PathBuf>,
}

impl Provisioner {
    /// Create a provisioner that installs `manifest_path`
    pub fn new(backend: Arc<dyn EnvironmentBackend>, manifest_path: PathBuf) -> Self {
        let running = running_binaries(backend.runtime());
        Provisioner {
            backend,
            manifest_path,
            containment: ContainmentPolicy::Abort,
            running,
        }
    }

    /// Set the containment policy
    pub fn with_containment(mut self, policy: ContainmentPolicy) -> Self {
        self.containment = policy;
        self
    }

    /// Replace the set of binaries that must not be deleted
    pub fn with_running_binaries(mut self, running: Vec<PathBuf>) -> Self {
        self.running = running;
        self
    }

    pub fn backend(&self) -> &dyn EnvironmentBackend {
        self.backend.as_ref()
    }

    pub fn manifest_path(&self) -> &Path {
        &self.manifest_path
    }

    /// Provision a clean environment at `target_root`
    ///
    /// The manifest is read before anything is deleted, so a missing or
    /// malformed manifest leaves the previous environment untouched.
    pub async fn provision(&self, target_root: &Path) -> Result<EnvironmentDescriptor> {
        let start = Instant::now();
        obs::emit_provision_started(&target_root.display().to_string());

        let result = self.provision_inner(target_root).await;

        let root = match &result {
            Ok(desc) => desc.root_path.display().to_string(),
            Err(_) => target_root.display().to_string(),
        };
        obs::emit_provision_finished(&root, start.elapsed().as_millis() as u64, result.is_ok());
        result
    }

    async fn provision_inner(&self, target_root: &Path) -> Result<EnvironmentDescriptor> {
        let manifest = DependencyManifest::load(&self.manifest_path)?;
        let root = resolve_target(target_root, &self.running, self.containment)?;
        if root != target_root {
            self.remove_stale_siblings(target_root).await;
        }

        if root.exists() {
            info!(root = %root.display(), "Removing previous environment");
        }
        remove_environment(&root).await?;

        self.backend.create(&root).await?;
        let root = root.canonicalize().unwrap_or(root);

        let desc = EnvironmentDescriptor {
            binaries_path: self.backend.binaries_dir(&root),
            root_path: root,
            dependency_manifest_path: manifest.path.clone(),
        };

        if manifest.is_empty() {
            info!(manifest = %manifest.path.display(), "Manifest is empty, nothing to install");
        } else {
            self.backend.install(&desc, &manifest).await?;
        }

        info!(
            root = %desc.root_path.display(),
            manifest = manifest.short_digest(),
            "Environment ready"
        );
        Ok(desc)
    }

    /// Best-effort removal of environments left by earlier redirected runs
    async fn remove_stale_siblings(&self, target_root: &Path) {
        for stale in stale_siblings(target_root, &self.running) {
            match remove_environment(&stale).await {
                Ok(()) => {
                    info!(path = %stale.display(), "Removed stale redirected environment")
                }
                Err(e) => {
                    warn!(path = %stale.display(), error = %e, "Could not remove stale environment")
                }
            }
        }
    }

    /// Metadata for the environment at `root`, including the manifest digest
    pub async fn describe(&self, root: &Path) -> EnvironmentMetadata {
        let mut metadata = self.backend.probe(root).await;
        metadata.manifest_digest = DependencyManifest::load(&self.manifest_path)
            .ok()
            .map(|m| m.digest);
        metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::FakeBackend;
    use crate::ProvisionError;

    fn setup(manifest: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let manifest_path = dir.path().join("requirements.txt");
        std::fs::write(&manifest_path, manifest).unwrap();
        (dir, manifest_path)
    }

    #[tokio::test]
    async fn test_provision_creates_and_installs() {
        let (dir, manifest) = setup("pytest\n");
        let backend = Arc::new(FakeBackend::new());
        let provisioner = Provisioner::new(backend.clone(), manifest).with_running_binaries(vec![]);

        let desc = provisioner.provision(&dir.path().join(".venv")).await.unwrap();
        assert!(desc.root_path.is_absolute());
        assert!(desc.binaries_path.starts_with(&desc.root_path));
        assert_eq!(backend.install_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_manifest_skips_install() {
        let (dir, manifest) = setup("# nothing\n");
        let backend = Arc::new(FakeBackend::new());
        let provisioner = Provisioner::new(backend.clone(), manifest).with_running_binaries(vec![]);

        provisioner.provision(&dir.path().join(".venv")).await.unwrap();
        assert_eq!(backend.install_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_manifest_keeps_old_environment() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join(".venv");
        std::fs::create_dir_all(&root).unwrap();

        let provisioner = Provisioner::new(
            Arc::new(FakeBackend::new()),
            dir.path().join("requirements.txt"),
        )
        .with_running_binaries(vec![]);

        let err = provisioner.provision(&root).await.unwrap_err();
        assert!(matches!(err, ProvisionError::ManifestMissing(_)));
        assert!(root.exists());
    }

    #[tokio::test]
    async fn test_describe_includes_manifest_digest() {
        let (dir, manifest) = setup("pytest\n");
        let provisioner =
            Provisioner::new(Arc::new(FakeBackend::new()), manifest).with_running_binaries(vec![]);
        let meta = provisioner.describe(&dir.path().join(".venv")).await;
        assert_eq!(meta.manifest_digest.map(|d| d.len()), Some(64));
    }
}
