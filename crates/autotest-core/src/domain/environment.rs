//! Isolated execution environments.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Placeholder recorded when a version could not be determined.
pub const UNKNOWN_VERSION: &str = "unknown";

/// A provisioned environment. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvironmentDescriptor {
    /// Absolute root of the environment.
    pub root_path: PathBuf,

    /// Directory holding the environment's executables.
    pub binaries_path: PathBuf,

    /// Manifest that was installed into the environment.
    pub dependency_manifest_path: PathBuf,
}

impl EnvironmentDescriptor {
    /// Environment name (the root directory's file name).
    pub fn name(&self) -> String {
        environment_name(&self.root_path)
    }
}

/// Name of an environment rooted at `root`.
pub fn environment_name(root: &Path) -> String {
    root.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| root.display().to_string())
}

/// Metadata appended to the report document after every run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvironmentMetadata {
    /// Environment name, e.g. `.venv`.
    pub name: String,

    /// Absolute environment root.
    pub root_path: PathBuf,

    /// Runtime executable the versions were probed from.
    pub runtime_executable: PathBuf,

    /// Runtime version, `X.Y[.Z]` or `unknown`.
    pub runtime_version: String,

    /// Package-manager version line, or `unknown`.
    pub package_manager_version: String,

    /// SHA-256 of the dependency manifest, when it could be read.
    pub manifest_digest: Option<String>,
}

impl EnvironmentMetadata {
    /// Metadata with every probed field unknown.
    pub fn unknown(root_path: PathBuf, runtime_executable: PathBuf) -> Self {
        Self {
            name: environment_name(&root_path),
            root_path,
            runtime_executable,
            runtime_version: UNKNOWN_VERSION.to_string(),
            package_manager_version: UNKNOWN_VERSION.to_string(),
            manifest_digest: None,
        }
    }
}
