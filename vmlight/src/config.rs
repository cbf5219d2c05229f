//! Configuration loading.
//!
//! Sources, later ones winning:
//! 1. built-in defaults
//! 2. `~/.config/vmlight.conf`
//! 3. `/etc/vmlight/vmlight.conf`
//! 4. the file given with `--config` (must exist)
//! 5. `VMLIGHT__<SECTION>__<KEY>` environment variables
//!
//! Files are INI with `[general]`, `[deploy]` and `[xen]` sections.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ::config::{Config, Environment, File, FileFormat};
use tracing::debug;
use vmlight_hypervisor::VmlightConfig;

/// System-wide configuration file.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/vmlight/vmlight.conf";

/// Per-user configuration file, if a home directory is known.
pub fn user_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".config").join("vmlight.conf"))
}

/// Load the configuration from the standard locations plus `explicit`.
pub fn load(explicit: Option<&Path>) -> Result<VmlightConfig> {
    let mut optional = Vec::new();
    if let Some(user) = user_config_path() {
        optional.push(user);
    }
    optional.push(PathBuf::from(SYSTEM_CONFIG_PATH));
    load_from(&optional, explicit)
}

/// Merge `optional` files (missing ones skipped) and a required `explicit`
/// file, then the environment.
pub fn load_from(optional: &[PathBuf], explicit: Option<&Path>) -> Result<VmlightConfig> {
    let mut builder = Config::builder();

    for path in optional {
        debug!(path = %path.display(), exists = path.exists(), "Config source");
        builder = builder.add_source(File::new(&path.to_string_lossy(), FileFormat::Ini).required(false));
    }

    if let Some(path) = explicit {
        if !path.exists() {
            anyhow::bail!("Config file not found: {}", path.display());
        }
        builder = builder.add_source(File::new(&path.to_string_lossy(), FileFormat::Ini).required(true));
    }

    let settings = builder
        .add_source(
            Environment::with_prefix("VMLIGHT")
                .prefix_separator("__")
                .separator("__"),
        )
        .build()
        .context("Failed to read configuration")?;

    settings
        .try_deserialize::<VmlightConfig>()
        .context("Invalid configuration")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use vmlight_hypervisor::BackendType;

    #[test]
    fn test_no_files_gives_defaults() {
        let temp = TempDir::new().unwrap();
        let config = load_from(&[temp.path().join("missing.conf")], None).unwrap();
        assert_eq!(config, VmlightConfig::default());
    }

    #[test]
    fn test_later_files_override_earlier() {
        let temp = TempDir::new().unwrap();
        let user = temp.path().join("user.conf");
        let system = temp.path().join("system.conf");
        std::fs::write(
            &user,
            "[general]\ninstances_dir = /srv/user/instances\n\n[deploy]\nmemory = 1024\nvcpus = 4\n",
        )
        .unwrap();
        std::fs::write(&system, "[deploy]\nmemory = 2048\ntype = xen\n").unwrap();

        let config = load_from(&[user, system], None).unwrap();
        assert_eq!(config.general.instances_dir, PathBuf::from("/srv/user/instances"));
        assert_eq!(config.deploy.memory, 2048);
        assert_eq!(config.deploy.vcpus, 4);
        assert_eq!(config.deploy.backend, BackendType::Xen);
        assert_eq!(config.deploy.disk_size, "10G");
    }

    #[test]
    fn test_explicit_file_must_exist() {
        let temp = TempDir::new().unwrap();
        assert!(load_from(&[], Some(&temp.path().join("nope.conf"))).is_err());

        let explicit = temp.path().join("vmlight.conf");
        std::fs::write(&explicit, "[xen]\nconf_dir = /tmp/xen\n").unwrap();
        let config = load_from(&[], Some(&explicit)).unwrap();
        assert_eq!(config.xen.conf_dir, PathBuf::from("/tmp/xen"));
    }
}
