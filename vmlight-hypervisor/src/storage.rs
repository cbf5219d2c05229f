//! Disk container handling.
//!
//! Copies or converts images into an instance directory, grows them with
//! qemu-img and mounts the first guest partition with guestmount.

use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info, instrument};

use crate::command::{CommandRunner, ToolCommand};
use crate::error::{HypervisorError, Result};
use crate::types::{DiskFormat, DiskSize};

/// Guest partition mounted during provisioning. Partition one by convention;
/// the partition table is not probed.
pub const GUEST_ROOT_PARTITION: &str = "/dev/sda1";

/// Subset of `qemu-img info --output=json`.
#[derive(Debug, Clone, Deserialize)]
pub struct DiskInfo {
    pub format: String,
    #[serde(rename = "virtual-size")]
    pub virtual_size: u64,
    #[serde(rename = "actual-size", default)]
    pub actual_size: u64,
}

/// Disk manager for instance disk containers.
pub struct DiskManager {
    runner: Arc<dyn CommandRunner>,
    /// qemu-img binary path
    qemu_img_path: String,
    /// guestmount binary path
    guestmount_path: String,
    /// umount binary path
    umount_path: String,
}

impl DiskManager {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            qemu_img_path: "qemu-img".to_string(),
            guestmount_path: "guestmount".to_string(),
            umount_path: "umount".to_string(),
        }
    }

    /// Set the qemu-img binary path.
    pub fn with_qemu_img(mut self, path: impl Into<String>) -> Self {
        self.qemu_img_path = path.into();
        self
    }

    /// Set the guestmount binary path.
    pub fn with_guestmount(mut self, path: impl Into<String>) -> Self {
        self.guestmount_path = path.into();
        self
    }

    /// Bring an image into `dst` in `dst_format`.
    ///
    /// Same-format sources are copied byte for byte; anything else is
    /// converted, so a raw image never lands verbatim in a qcow2 slot.
    #[instrument(skip(self), fields(src = %src.display(), dst = %dst.display()))]
    pub async fn import_image(
        &self,
        src: &Path,
        src_format: DiskFormat,
        dst: &Path,
        dst_format: DiskFormat,
    ) -> Result<()> {
        if !src.exists() {
            return Err(HypervisorError::InvalidConfig(format!(
                "Source disk image does not exist: {}",
                src.display()
            )));
        }

        if src_format == dst_format {
            info!(format = %dst_format, "Copying disk image");
            tokio::fs::copy(src, dst).await.map_err(|e| {
                HypervisorError::io(
                    format!("Failed to copy {} to {}", src.display(), dst.display()),
                    e,
                )
            })?;
        } else {
            info!(from = %src_format, to = %dst_format, "Converting disk image");
            let cmd = ToolCommand::new(&self.qemu_img_path)
                .args(["convert", "-O", dst_format.as_str()])
                .arg(src.to_string_lossy())
                .arg(dst.to_string_lossy());
            self.runner.run(&cmd).await?;
        }

        Ok(())
    }

    /// Get information about a disk image.
    #[instrument(skip(self), fields(path = %path.display()))]
    pub async fn disk_info(&self, path: &Path) -> Result<DiskInfo> {
        let cmd = ToolCommand::new(&self.qemu_img_path)
            .args(["info", "--output=json"])
            .arg(path.to_string_lossy());
        let stdout = self.runner.run(&cmd).await?;

        let info: DiskInfo =
            serde_json::from_str(&stdout).map_err(|e| HypervisorError::ParseFailed {
                command: cmd.to_string(),
                reason: e.to_string(),
            })?;
        debug!(format = %info.format, virtual_size = info.virtual_size, "Disk info");
        Ok(info)
    }

    /// Grow a disk image to `size`. Never shrinks: a size below the current
    /// virtual size is an error.
    #[instrument(skip(self), fields(path = %path.display(), size = size.bytes()))]
    pub async fn grow(&self, path: &Path, size: DiskSize) -> Result<()> {
        let info = self.disk_info(path).await?;
        if size.bytes() < info.virtual_size {
            return Err(HypervisorError::DiskTooSmall {
                requested: size.bytes(),
                minimum: info.virtual_size,
            });
        }

        let cmd = ToolCommand::new(&self.qemu_img_path)
            .arg("resize")
            .arg(path.to_string_lossy())
            .arg(size.to_string());
        self.runner.run(&cmd).await?;

        info!(size = size.bytes(), "Disk image resized");
        Ok(())
    }

    /// Mount the first partition of `disk` read-write at `mount_point`,
    /// creating the directory if needed.
    #[instrument(skip(self), fields(disk = %disk.display(), mount_point = %mount_point.display()))]
    pub async fn mount(&self, disk: &Path, mount_point: &Path) -> Result<()> {
        std::fs::create_dir_all(mount_point).map_err(|e| {
            HypervisorError::io(
                format!("Failed to create mount point {}", mount_point.display()),
                e,
            )
        })?;

        let cmd = ToolCommand::new(&self.guestmount_path)
            .arg("-a")
            .arg(disk.to_string_lossy())
            .args(["-m", GUEST_ROOT_PARTITION])
            .arg(mount_point.to_string_lossy());
        self.runner.run(&cmd).await?;

        debug!("Guest disk mounted");
        Ok(())
    }

    /// Unmount `mount_point` and remove the directory.
    #[instrument(skip(self), fields(mount_point = %mount_point.display()))]
    pub async fn unmount(&self, mount_point: &Path) -> Result<()> {
        let cmd = ToolCommand::new(&self.umount_path).arg(mount_point.to_string_lossy());
        self.runner.run(&cmd).await?;

        std::fs::remove_dir(mount_point).map_err(|e| {
            HypervisorError::io(
                format!("Failed to remove mount point {}", mount_point.display()),
                e,
            )
        })?;

        debug!("Guest disk unmounted");
        Ok(())
    }

    /// Detach `mount_point` with `umount -l` and remove the directory.
    #[instrument(skip(self), fields(mount_point = %mount_point.display()))]
    pub async fn unmount_lazy(&self, mount_point: &Path) -> Result<()> {
        let cmd = ToolCommand::new(&self.umount_path)
            .arg("-l")
            .arg(mount_point.to_string_lossy());
        self.runner.run(&cmd).await?;

        std::fs::remove_dir(mount_point).map_err(|e| {
            HypervisorError::io(
                format!("Failed to remove mount point {}", mount_point.display()),
                e,
            )
        })?;

        debug!("Guest disk detached");
        Ok(())
    }
}
