//! Error types for autotest-env

use autotest_core::ProcessError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort provisioning. No pipeline stage runs after one of these.
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// The running process lives inside the directory it would delete
    #[error(
        "refusing to replace {}: it contains the running binary {}",
        .target.display(),
        .binary.display()
    )]
    SelfDeletion { target: PathBuf, binary: PathBuf },

    /// The old environment could not be removed, even after retries
    #[error("failed to remove existing environment {}: {reason}", .path.display())]
    RemovalFailed { path: PathBuf, reason: String },

    /// Environment creation exited nonzero
    #[error("environment creation exited with code {exit_code}: {output}")]
    CreateFailed { exit_code: i32, output: String },

    /// Dependency manifest not found
    #[error("dependency manifest not found: {}", .0.display())]
    ManifestMissing(PathBuf),

    /// Dependency manifest has an unparsable line
    #[error("invalid dependency manifest {}, line {line}: {message}", .path.display())]
    InvalidManifest {
        path: PathBuf,
        line: usize,
        message: String,
    },

    /// Dependency installation exited nonzero
    #[error("dependency installation exited with code {exit_code}")]
    InstallFailed { exit_code: i32, output: String },

    /// A provisioning command could not be launched
    #[error("provisioning command failed: {0}")]
    Process(#[from] ProcessError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProvisionError {
    /// Captured output of the failing command, if any.
    pub fn command_output(&self) -> Option<&str> {
        match self {
            ProvisionError::CreateFailed { output, .. }
            | ProvisionError::InstallFailed { output, .. } => Some(output),
            _ => None,
        }
    }
}
