//! Core backend abstraction trait.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::command::CommandRunner;
use crate::config::VmlightConfig;
use crate::error::{HypervisorError, Result};
use crate::types::{BackendType, Instance};
use crate::xen::XenBackend;

/// Backend-neutral description of a guest, rendered into the backend's
/// guest configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestSpec {
    /// Memory in MiB
    pub memory_mib: u32,
    pub vcpus: u32,
    pub ip: String,
    /// Absolute path of the disk container
    pub disk_path: PathBuf,
}

/// Hypervisor backend.
///
/// The deployment pipeline and the lifecycle manager only talk to this
/// trait. One implementation exists per hypervisor toolstack.
#[async_trait]
pub trait Backend: Send + Sync {
    fn backend_type(&self) -> BackendType;

    /// Path of the guest configuration file inside the instance directory.
    fn guest_config_path(&self, instance: &Instance) -> PathBuf;

    // =========================================================================
    // Provisioning hooks
    // =========================================================================

    /// Checks run after the instance directory exists and before any disk
    /// work, e.g. that the autostart slot is free.
    async fn preflight(&self, instance: &Instance) -> Result<()>;

    /// Write the guest configuration file.
    async fn write_guest_config(&self, instance: &Instance, guest: &GuestSpec) -> Result<()>;

    /// Register the instance to start at host boot.
    async fn enable_autostart(&self, instance: &Instance) -> Result<()>;

    /// Write the guest network configuration below `guest_root`.
    async fn write_network_config(&self, instance: &Instance, guest_root: &Path, ip: &str)
        -> Result<()>;

    /// Undo the provisioning hooks. Missing files are not errors, and entries
    /// that do not belong to this instance are left alone.
    async fn cleanup(&self, instance: &Instance) -> Result<()>;

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Whether the instance is running (blocked guests count as running).
    async fn is_running(&self, instance: &Instance) -> Result<bool>;

    async fn start(&self, instance: &Instance) -> Result<()>;

    async fn stop(&self, instance: &Instance) -> Result<()>;

    async fn restart(&self, instance: &Instance) -> Result<()>;

    /// Remove backend state living outside the instance directory.
    async fn delete(&self, instance: &Instance) -> Result<()>;
}

/// Build the adapter for a backend type.
///
/// Only Xen has an adapter; every other type is [`HypervisorError::UnsupportedBackend`].
pub fn create_backend(
    backend_type: BackendType,
    config: &VmlightConfig,
    runner: Arc<dyn CommandRunner>,
) -> Result<Arc<dyn Backend>> {
    match backend_type {
        BackendType::Xen => Ok(Arc::new(XenBackend::new(
            config.xen.clone(),
            config.deploy.default_gateway.clone(),
            runner,
        ))),
        other => Err(HypervisorError::UnsupportedBackend(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockRunner;

    #[test]
    fn test_only_xen_has_an_adapter() {
        let config = VmlightConfig::default();
        let runner: Arc<dyn CommandRunner> = Arc::new(MockRunner::new());

        let xen = create_backend(BackendType::Xen, &config, runner.clone()).unwrap();
        assert_eq!(xen.backend_type(), BackendType::Xen);

        for kind in [BackendType::Kvm, BackendType::SystemdNspawn, BackendType::Unknown] {
            assert!(matches!(
                create_backend(kind, &config, runner.clone()),
                Err(HypervisorError::UnsupportedBackend(k)) if k == kind
            ));
        }
    }
}
