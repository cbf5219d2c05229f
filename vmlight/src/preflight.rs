//! Host checks run before any state change.

use std::path::PathBuf;

use anyhow::{bail, Result};

/// Tools the deployment pipeline shells out to.
pub const DEPLOY_BINARIES: [&str; 3] = ["guestmount", "qemu-img", "umount"];

/// Fail unless running with effective UID 0.
pub fn require_root() -> Result<()> {
    // SAFETY: geteuid has no preconditions and cannot fail.
    let euid = unsafe { libc::geteuid() };
    if euid != 0 {
        bail!("Not running as root, aborting");
    }
    Ok(())
}

/// Locate an executable on `PATH`.
pub fn find_in_path(binary: &str) -> Option<PathBuf> {
    use std::os::unix::fs::PermissionsExt;

    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(binary))
        .find(|candidate| {
            candidate
                .metadata()
                .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
                .unwrap_or(false)
        })
}

/// Fail on the first binary that is not installed.
pub fn require_binaries(binaries: &[&str]) -> Result<()> {
    for binary in binaries {
        if find_in_path(binary).is_none() {
            bail!("Required binary '{}' is not installed, aborting", binary);
        }
    }
    Ok(())
}
