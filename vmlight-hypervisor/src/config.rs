//! Configuration consumed by the registry, pipeline and backends.
//!
//! The structure mirrors the INI sections of `vmlight.conf`. Loading and
//! merging files is done by the binary; the library only sees the result.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::types::BackendType;

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct VmlightConfig {
    pub general: GeneralConfig,
    pub deploy: DeployConfig,
    pub xen: XenConfig,
}

/// Paths shared by every command.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct GeneralConfig {
    /// Image store directory
    pub image_dir: PathBuf,
    /// Root of the instance registry
    pub instances_dir: PathBuf,
    /// Upper bound for any single external tool call
    pub command_timeout_secs: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            image_dir: PathBuf::from("/var/lib/vmlight/images"),
            instances_dir: PathBuf::from("/var/lib/vmlight/instances"),
            command_timeout_secs: 600,
        }
    }
}

impl GeneralConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

/// Deployment defaults.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeployConfig {
    /// Memory in MiB
    pub memory: u32,
    pub disk_size: String,
    pub vcpus: u32,
    /// Backend used when `--type` is not given
    #[serde(rename = "type")]
    pub backend: BackendType,
    /// SSH key store file
    pub ssh_key_list_file: PathBuf,
    /// Gateway injected into every guest
    pub default_gateway: String,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            memory: 512,
            disk_size: "10G".to_string(),
            vcpus: 1,
            backend: BackendType::Xen,
            ssh_key_list_file: PathBuf::from("/etc/vmlight/ssh_key_store"),
            default_gateway: "10.10.10.2".to_string(),
        }
    }
}

/// Xen toolstack settings.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct XenConfig {
    /// Xen configuration directory; autostart links go to `<conf_dir>/auto`
    pub conf_dir: PathBuf,
    /// Guest kernel (PV-GRUB) path written into guest configs
    pub pvgrub_path: PathBuf,
    /// Toolstack binary
    pub xl_path: PathBuf,
}

impl Default for XenConfig {
    fn default() -> Self {
        Self {
            conf_dir: PathBuf::from("/etc/xen"),
            pvgrub_path: PathBuf::from("/usr/lib/xen/bin/pvgrub"),
            xl_path: PathBuf::from("/usr/sbin/xl"),
        }
    }
}
