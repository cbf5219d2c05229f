//! Advisory lock serialising ID allocation on an instances directory.
//!
//! Uses `flock` on `<instances_dir>/.lock`. Allocation scans the directory,
//! picks the lowest free ID and creates the instance directory while the lock
//! is held, so two concurrent deployments can never claim the same ID.

use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{HypervisorError, Result};

/// Lock file name inside the instances directory.
pub const LOCK_FILE_NAME: &str = ".lock";

/// Exclusive lock guard, released on drop.
#[derive(Debug)]
pub struct RegistryLock {
    file: File,
    path: PathBuf,
}

impl RegistryLock {
    /// Block until the exclusive lock on `instances_dir` is acquired.
    pub fn acquire(instances_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(instances_dir).map_err(|e| {
            HypervisorError::io(
                format!("Failed to create instances directory {}", instances_dir.display()),
                e,
            )
        })?;

        let path = instances_dir.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| HypervisorError::io(format!("Failed to open lock file {}", path.display()), e))?;

        let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
        if result != 0 {
            return Err(HypervisorError::io(
                format!("Failed to lock {}", path.display()),
                std::io::Error::last_os_error(),
            ));
        }

        debug!(lock_path = %path.display(), "Acquired registry lock");
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RegistryLock {
    fn drop(&mut self) {
        // Closing the file releases the lock as well; unlock explicitly so
        // the release is not tied to when the descriptor is closed.
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
        debug!(lock_path = %self.path.display(), "Released registry lock");
    }
}
