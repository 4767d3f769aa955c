//! Robust recursive removal of an old environment
//!
//! Tries, in order:
//! 1. `std::fs::remove_dir_all`
//! 2. make every entry writable, then `remove_dir_all` again
//! 3. the platform's native recursive delete (`rm -rf` / `rmdir /S /Q`)
//!
//! Only if the directory still exists after all three is removal fatal.

use crate::error::ProvisionError;
use crate::Result;
use autotest_core::{EnvPolicy, ProcessRunner, ScopedEnv};
use std::path::Path;
use tracing::{debug, warn};

/// Remove `path` and everything below it. A missing path is not an error.
pub async fn remove_environment(path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }

    let first = match std::fs::remove_dir_all(path) {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };
    warn!(path = %path.display(), error = %first, "removal failed, retrying with relaxed permissions");

    if let Err(e) = make_writable(path) {
        debug!(error = %e, "could not relax permissions everywhere");
    }
    let second = match std::fs::remove_dir_all(path) {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };
    warn!(path = %path.display(), error = %second, "retry failed, falling back to native delete");

    let native = native_remove(path).await;
    if !path.exists() {
        return Ok(());
    }

    let reason = match native {
        Ok(output) => format!("{second}; native delete: {output}"),
        Err(e) => format!("{second}; native delete: {e}"),
    };
    Err(ProvisionError::RemovalFailed {
        path: path.to_path_buf(),
        reason,
    })
}

/// Recursively grant the owner write access, without following symlinks.
fn make_writable(path: &Path) -> std::io::Result<()> {
    let meta = std::fs::symlink_metadata(path)?;
    if meta.file_type().is_symlink() {
        return Ok(());
    }

    let mut perms = meta.permissions();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let extra = if meta.is_dir() { 0o700 } else { 0o600 };
        perms.set_mode(perms.mode() | extra);
    }
    #[cfg(not(unix))]
    #[allow(clippy::permissions_set_readonly_false)]
    perms.set_readonly(false);
    std::fs::set_permissions(path, perms)?;

    if meta.is_dir() {
        for entry in std::fs::read_dir(path)? {
            make_writable(&entry?.path())?;
        }
    }
    Ok(())
}

/// Native recursive delete; returns a short description of the outcome.
async fn native_remove(path: &Path) -> Result<String> {
    let target = path.display().to_string();
    let command: Vec<String> = if cfg!(windows) {
        ["cmd", "/C", "rmdir", "/S", "/Q", target.as_str()]
            .iter()
            .map(|s| s.to_string())
            .collect()
    } else {
        ["rm", "-rf", "--", target.as_str()]
            .iter()
            .map(|s| s.to_string())
            .collect()
    };

    let cwd = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let env = ScopedEnv::scoped(&EnvPolicy::default(), None, None);
    let output = ProcessRunner::new().run(&command, cwd, &env).await?;

    Ok(format!(
        "exit code {}: {}",
        output.exit_code,
        output.combined_output.trim()
    ))
}
