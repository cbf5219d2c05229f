//! Command handlers.

pub mod deploy;
pub mod image;
pub mod ssh_keys;
pub mod vm;

use std::sync::Arc;

use anyhow::Result;
use vmlight_hypervisor::{
    create_backend, Backend, BackendType, CommandRunner, Deployer, DiskManager, ImageStore,
    InstanceRegistry, SshKeyStore, SystemRunner, VmManager, VmlightConfig,
};

/// State shared by every command: the merged configuration and the
/// host command runner.
pub struct Context {
    pub config: VmlightConfig,
    backend_override: Option<BackendType>,
    runner: Arc<dyn CommandRunner>,
}

impl Context {
    pub fn new(config: VmlightConfig, backend_override: Option<BackendType>) -> Self {
        let runner = Arc::new(SystemRunner::new().with_timeout(config.general.command_timeout()));
        Self {
            config,
            backend_override,
            runner,
        }
    }

    /// `--type`, falling back to `[deploy] type`.
    pub fn backend_type(&self) -> BackendType {
        self.backend_override.unwrap_or(self.config.deploy.backend)
    }

    pub fn backend(&self, backend_type: BackendType) -> Result<Arc<dyn Backend>> {
        Ok(create_backend(backend_type, &self.config, self.runner.clone())?)
    }

    pub fn registry(&self) -> InstanceRegistry {
        InstanceRegistry::new(&self.config.general.instances_dir)
    }

    pub fn images(&self) -> ImageStore {
        ImageStore::new(&self.config.general.image_dir)
    }

    pub fn keys(&self) -> SshKeyStore {
        SshKeyStore::new(&self.config.deploy.ssh_key_list_file)
    }

    pub fn deployer(&self) -> Result<Deployer> {
        Ok(Deployer::new(
            self.registry(),
            self.images(),
            self.keys(),
            self.backend(self.backend_type())?,
            DiskManager::new(self.runner.clone()),
        ))
    }

    /// Lifecycle manager with every available adapter registered.
    pub fn manager(&self) -> Result<VmManager> {
        Ok(VmManager::new(self.registry()).with_backend(self.backend(BackendType::Xen)?))
    }
}
