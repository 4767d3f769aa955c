//! autotest-env: isolated environment provisioning
//!
//! Recreates a Python-style virtual environment from scratch on every run
//! and installs a fixed dependency manifest into it.
//!
//! ## Modules
//!
//! - `guard`: refuses (or redirects) when the target contains a running binary
//! - `removal`: recursive delete with chmod retry and native fallback
//! - `manifest`: requirement parsing and digest
//! - `backend`: the `EnvironmentBackend` seam and the `venv`/`pip` implementation
//! - `provisioner`: the provisioning sequence
//! - `fakes`: scripted backend for tests

pub mod backend;
pub mod error;
pub mod fakes;
pub mod guard;
pub mod manifest;
pub mod provisioner;
pub mod removal;

pub use backend::{
    binaries_dir, environment_python, parse_runtime_version, EnvironmentBackend, VenvBackend,
    DEFAULT_RUNTIME,
};
pub use error::ProvisionError;
pub use guard::{
    is_inside, resolve_target, running_binaries, stale_siblings, ContainmentPolicy,
};
pub use manifest::{DependencyManifest, Requirement};
pub use provisioner::{ProvisionConfig, Provisioner};
pub use removal::remove_environment;

/// Result type for provisioning operations
pub type Result<T> = std::result::Result<T, ProvisionError>;
