//! Core types for instances and deployment requests.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{HypervisorError, Result};

/// File name of the disk container inside an instance directory.
pub const DISK_FILE_NAME: &str = "root.qcow2";

/// Scratch mount point inside an instance directory.
pub const MOUNT_DIR_NAME: &str = "mnt";

// =============================================================================
// Backend type
// =============================================================================

/// Hypervisor backend an instance belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum BackendType {
    #[default]
    Xen,
    Kvm,
    SystemdNspawn,
    Unknown,
}

impl BackendType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Xen => "xen",
            Self::Kvm => "kvm",
            Self::SystemdNspawn => "systemd-nspawn",
            Self::Unknown => "unknown",
        }
    }

    /// Classify an instance directory by the backend marker file it holds.
    pub fn detect(instance_dir: &Path) -> Self {
        if instance_dir.join(crate::xen::GUEST_CONFIG_FILE).exists() {
            Self::Xen
        } else {
            Self::Unknown
        }
    }
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendType {
    type Err = HypervisorError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "xen" => Ok(Self::Xen),
            "kvm" => Ok(Self::Kvm),
            "systemd-nspawn" => Ok(Self::SystemdNspawn),
            other => Err(HypervisorError::InvalidConfig(format!(
                "unknown instance type '{}' (expected xen, kvm or systemd-nspawn)",
                other
            ))),
        }
    }
}

// =============================================================================
// Instance
// =============================================================================

/// A managed virtual machine and its on-disk directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Instance {
    /// Lowest-free positive integer, valid for the lifetime of the directory
    pub id: u32,
    /// User-chosen name, also the guest hostname
    pub name: String,
    /// Backend the instance was provisioned for
    pub backend: BackendType,
    /// `<instances_dir>/<id>-<name>`
    pub dir: PathBuf,
}

impl Instance {
    pub fn new(id: u32, name: impl Into<String>, backend: BackendType, root: &Path) -> Self {
        let name = name.into();
        let dir = root.join(dir_name(id, &name));
        Self {
            id,
            name,
            backend,
            dir,
        }
    }

    /// `"{id}-{name}"`, used for the directory, domain and autostart names.
    pub fn full_name(&self) -> String {
        dir_name(self.id, &self.name)
    }

    pub fn disk_path(&self) -> PathBuf {
        self.dir.join(DISK_FILE_NAME)
    }

    pub fn mount_point(&self) -> PathBuf {
        self.dir.join(MOUNT_DIR_NAME)
    }
}

/// Format an instance directory name.
pub fn dir_name(id: u32, name: &str) -> String {
    format!("{}-{}", id, name)
}

/// Parse an instance directory name into `(id, name)`.
///
/// The ID is everything before the first hyphen and must be a positive
/// decimal integer; the name is everything after it and may itself contain
/// hyphens.
pub fn parse_dir_name(dir_name: &str) -> Option<(u32, &str)> {
    let (id, name) = dir_name.split_once('-')?;
    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) || name.is_empty() {
        return None;
    }
    match id.parse::<u32>() {
        Ok(0) | Err(_) => None,
        Ok(id) => Some((id, name)),
    }
}

/// Check that a name can be used as directory component and guest hostname.
pub fn validate_name(name: &str) -> Result<()> {
    let invalid = |reason: &str| {
        Err(HypervisorError::InvalidRequest(format!(
            "instance name '{}' {}",
            name, reason
        )))
    };
    if name.is_empty() {
        return invalid("is empty");
    }
    if name.len() > 63 {
        return invalid("is longer than 63 characters");
    }
    if !name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-') {
        return invalid("may only contain ASCII letters, digits and '-'");
    }
    if name.starts_with('-') || name.ends_with('-') {
        return invalid("must not start or end with '-'");
    }
    Ok(())
}

// =============================================================================
// Running state
// =============================================================================

/// User-facing instance state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    Running,
    Stopped,
    /// No backend adapter can answer for this instance
    Unknown,
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Running => "Running",
            Self::Stopped => "Stopped",
            Self::Unknown => "Unknown",
        })
    }
}

/// Registry row joined with the live backend state.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceStatus {
    pub instance: Instance,
    pub state: InstanceState,
}

// =============================================================================
// Disks
// =============================================================================

/// Disk container format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskFormat {
    Qcow2,
    Raw,
}

impl DiskFormat {
    /// Backend format token.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Qcow2 => "qcow2",
            Self::Raw => "raw",
        }
    }

    /// Map a file extension to a format. The mapping is total: anything
    /// outside it is rejected.
    pub fn from_extension(ext: &str) -> Result<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "qcow2" | "qcow" => Ok(Self::Qcow2),
            "raw" | "img" => Ok(Self::Raw),
            other => Err(HypervisorError::UnsupportedDiskFormat(other.to_string())),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        Self::from_extension(ext)
    }
}

impl fmt::Display for DiskFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A disk size as accepted on the command line, e.g. `10G`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskSize(u64);

impl DiskSize {
    pub fn from_bytes(bytes: u64) -> Self {
        Self(bytes)
    }

    pub fn bytes(&self) -> u64 {
        self.0
    }
}

impl FromStr for DiskSize {
    type Err = HypervisorError;

    /// Parse `<n>[K|M|G|T]` with binary multiples; a bare number is bytes.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let invalid = || HypervisorError::InvalidRequest(format!("invalid disk size '{}'", s));

        let (digits, shift) = match s.char_indices().last() {
            Some((idx, c)) if c.is_ascii_alphabetic() => {
                let shift = match c.to_ascii_uppercase() {
                    'K' => 10,
                    'M' => 20,
                    'G' => 30,
                    'T' => 40,
                    _ => return Err(invalid()),
                };
                (&s[..idx], shift)
            }
            Some(_) => (s, 0),
            None => return Err(invalid()),
        };

        let value: u64 = digits.parse().map_err(|_| invalid())?;
        let bytes = value.checked_shl(shift).filter(|b| b >> shift == value).ok_or_else(invalid)?;
        if bytes == 0 {
            return Err(invalid());
        }
        Ok(Self(bytes))
    }
}

impl fmt::Display for DiskSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Deployment request
// =============================================================================

/// Everything needed to provision one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployRequest {
    pub name: String,
    /// Image store name (file stem)
    pub image: String,
    /// Guest address, injected as a /32
    pub ip: String,
    /// Disk size string, e.g. `10G`
    pub disk_size: String,
    pub memory_mib: u32,
    pub vcpus: u32,
    /// SSH key store names to inject
    pub ssh_keys: Vec<String>,
}

impl DeployRequest {
    /// Check the request without touching the filesystem.
    pub fn validate(&self) -> Result<DiskSize> {
        validate_name(&self.name)?;
        if self.image.trim().is_empty() {
            return Err(HypervisorError::InvalidRequest("image name is empty".to_string()));
        }
        if self.ip.trim().is_empty() {
            return Err(HypervisorError::InvalidRequest("IP address is empty".to_string()));
        }
        if self.memory_mib == 0 {
            return Err(HypervisorError::InvalidRequest("memory must be positive".to_string()));
        }
        if self.vcpus == 0 {
            return Err(HypervisorError::InvalidRequest("vcpus must be positive".to_string()));
        }
        self.disk_size.parse()
    }
}
