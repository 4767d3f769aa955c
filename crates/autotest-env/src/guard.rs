//! Self-deletion guard
//!
//! Before an environment directory is replaced, every binary the current
//! run depends on (this executable and the base runtime) is checked for
//! containment in that directory. Deleting a directory out from under a
//! running binary is never attempted.

use crate::error::ProvisionError;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;
use uuid::Uuid;

/// What to do when the target environment contains a running binary
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContainmentPolicy {
    /// Fail with `ProvisionError::SelfDeletion`
    #[default]
    Abort,
    /// Provision into a freshly named sibling directory instead. Siblings
    /// left by earlier redirected runs are removed unless they hold a
    /// running binary.
    RedirectToSibling,
}

/// Binaries that must survive provisioning: this executable and the base runtime.
pub fn running_binaries(runtime: &Path) -> Vec<PathBuf> {
    let mut binaries = Vec::new();
    if let Ok(exe) = std::env::current_exe() {
        binaries.push(exe);
    }
    if runtime.components().count() > 1 {
        binaries.push(runtime.to_path_buf());
    } else if let Ok(resolved) = which::which(runtime) {
        binaries.push(resolved);
    }
    binaries
}

/// Whether `candidate` lives inside `root`.
///
/// Both paths are canonicalised so that symlinks and `..` segments cannot
/// hide containment. A root that does not exist contains nothing.
pub fn is_inside(candidate: &Path, root: &Path) -> bool {
    let Ok(root) = root.canonicalize() else {
        return false;
    };
    let candidate = candidate
        .canonicalize()
        .unwrap_or_else(|_| candidate.to_path_buf());
    candidate.starts_with(&root)
}

/// Resolve the directory to provision into, applying `policy` when
/// `target` contains one of `running`.
pub fn resolve_target(
    target: &Path,
    running: &[PathBuf],
    policy: ContainmentPolicy,
) -> Result<PathBuf> {
    let Some(binary) = running.iter().find(|b| is_inside(b, target)) else {
        return Ok(target.to_path_buf());
    };

    match policy {
        ContainmentPolicy::Abort => Err(ProvisionError::SelfDeletion {
            target: target.to_path_buf(),
            binary: binary.clone(),
        }),
        ContainmentPolicy::RedirectToSibling => {
            let sibling = fresh_sibling(target);
            warn!(
                target = %target.display(),
                binary = %binary.display(),
                redirect = %sibling.display(),
                "environment contains a running binary, provisioning into sibling"
            );
            Ok(sibling)
        }
    }
}

fn sibling_base(target: &Path) -> (String, &Path) {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "env".to_string());
    let parent = target
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    (name, parent)
}

/// Directories `<name>-<8 hex chars>` next to `target` left by earlier
/// redirected runs, excluding any that contain one of `running`.
pub fn stale_siblings(target: &Path, running: &[PathBuf]) -> Vec<PathBuf> {
    let (name, parent) = sibling_base(target);
    let prefix = format!("{name}-");
    let Ok(entries) = std::fs::read_dir(parent) else {
        return Vec::new();
    };

    let mut stale: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            file_name.strip_prefix(&prefix).is_some_and(|suffix| {
                suffix.len() == 8 && suffix.chars().all(|c| c.is_ascii_hexdigit())
            })
        })
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .filter(|path| !running.iter().any(|b| is_inside(b, path)))
        .collect();
    stale.sort();
    stale
}

/// A sibling path `<name>-<8 hex chars>` that does not exist yet.
fn fresh_sibling(target: &Path) -> PathBuf {
    let (name, parent) = sibling_base(target);
    loop {
        let suffix = Uuid::new_v4().simple().to_string();
        let candidate = parent.join(format!("{name}-{}", &suffix[..8]));
        if !candidate.exists() {
            return candidate;
        }
    }
}
