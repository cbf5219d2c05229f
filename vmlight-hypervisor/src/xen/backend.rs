//! Xen backend implementation driving the `xl` toolstack.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use super::list::{parse_xl_list, DomainRow};
use super::template::{render_network_config, XenGuestConfig};
use super::{GUEST_CONFIG_FILE, NETWORK_CONFIG_PATH};
use crate::command::{CommandRunner, ToolCommand};
use crate::config::XenConfig;
use crate::error::{HypervisorError, Result};
use crate::traits::{Backend, GuestSpec};
use crate::types::{BackendType, DiskFormat, Instance};

/// Xen backend.
///
/// Guest configs live in the instance directory; the autostart entry is a
/// symlink `<conf_dir>/auto/{id}-{name}` pointing at that config.
pub struct XenBackend {
    config: XenConfig,
    gateway: String,
    runner: Arc<dyn CommandRunner>,
}

impl XenBackend {
    pub fn new(config: XenConfig, gateway: impl Into<String>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            config,
            gateway: gateway.into(),
            runner,
        }
    }

    /// Autostart symlink for an instance.
    pub fn autostart_path(&self, instance: &Instance) -> PathBuf {
        self.config.conf_dir.join("auto").join(instance.full_name())
    }

    fn xl(&self, subcommand: &str) -> ToolCommand {
        ToolCommand::new(self.config.xl_path.to_string_lossy()).arg(subcommand)
    }

    /// Find the instance's domain in `xl list`.
    async fn find_domain(&self, instance: &Instance) -> Result<Option<DomainRow>> {
        let output = self.runner.run(&self.xl("list")).await?;
        let name = instance.full_name();
        Ok(parse_xl_list(&output).into_iter().find(|row| row.name == name))
    }

    /// Domain ID of a live instance.
    async fn domain_id(&self, instance: &Instance) -> Result<u32> {
        self.find_domain(instance)
            .await?
            .map(|row| row.domid)
            .ok_or_else(|| HypervisorError::DomainNotFound(instance.full_name()))
    }

    /// Whether the autostart entry is a link to this instance's config.
    fn owns_autostart_link(&self, instance: &Instance) -> bool {
        match std::fs::read_link(self.autostart_path(instance)) {
            Ok(target) => target == self.guest_config_path(instance),
            Err(_) => false,
        }
    }

    fn remove_autostart_link(&self, instance: &Instance) -> Result<()> {
        let link = self.autostart_path(instance);
        if !self.owns_autostart_link(instance) {
            if link.symlink_metadata().is_ok() {
                warn!(link = %link.display(), "Autostart entry belongs to something else, leaving it");
            }
            return Ok(());
        }
        match std::fs::remove_file(&link) {
            Ok(()) => {
                debug!(link = %link.display(), "Removed autostart link");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(HypervisorError::io(
                format!("Failed to remove autostart link {}", link.display()),
                e,
            )),
        }
    }
}

#[async_trait]
impl Backend for XenBackend {
    fn backend_type(&self) -> BackendType {
        BackendType::Xen
    }

    fn guest_config_path(&self, instance: &Instance) -> PathBuf {
        instance.dir.join(GUEST_CONFIG_FILE)
    }

    #[instrument(skip(self, instance), fields(vm_id = instance.id))]
    async fn preflight(&self, instance: &Instance) -> Result<()> {
        if !self.config.conf_dir.is_dir() {
            return Err(HypervisorError::InvalidConfig(format!(
                "Xen configuration directory {} does not exist",
                self.config.conf_dir.display()
            )));
        }

        let link = self.autostart_path(instance);
        if link.symlink_metadata().is_ok() {
            return Err(HypervisorError::AutostartConflict(link));
        }
        Ok(())
    }

    #[instrument(skip(self, instance, guest), fields(vm_id = instance.id))]
    async fn write_guest_config(&self, instance: &Instance, guest: &GuestSpec) -> Result<()> {
        require_absolute(&guest.disk_path)?;
        let config = XenGuestConfig {
            id: instance.id,
            name: &instance.name,
            kernel: &self.config.pvgrub_path,
            memory_mib: guest.memory_mib,
            vcpus: guest.vcpus,
            ip: &guest.ip,
            disk_path: &guest.disk_path,
            disk_format: DiskFormat::from_path(&guest.disk_path)?,
        };

        let path = self.guest_config_path(instance);
        tokio::fs::write(&path, config.render())
            .await
            .map_err(|e| HypervisorError::io(format!("Failed to write {}", path.display()), e))?;

        info!(path = %path.display(), "Guest config written");
        Ok(())
    }

    #[instrument(skip(self, instance), fields(vm_id = instance.id))]
    async fn enable_autostart(&self, instance: &Instance) -> Result<()> {
        let auto_dir = self.config.conf_dir.join("auto");
        std::fs::create_dir_all(&auto_dir)
            .map_err(|e| HypervisorError::io(format!("Failed to create {}", auto_dir.display()), e))?;

        let target = self.guest_config_path(instance);
        require_absolute(&target)?;

        let link = self.autostart_path(instance);
        match std::os::unix::fs::symlink(&target, &link) {
            Ok(()) => {
                info!(link = %link.display(), "Autostart enabled");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                Err(HypervisorError::AutostartConflict(link))
            }
            Err(e) => Err(HypervisorError::io(
                format!("Failed to create autostart link {}", link.display()),
                e,
            )),
        }
    }

    #[instrument(skip(self, instance, guest_root), fields(vm_id = instance.id))]
    async fn write_network_config(
        &self,
        instance: &Instance,
        guest_root: &Path,
        ip: &str,
    ) -> Result<()> {
        let path = guest_root.join(NETWORK_CONFIG_PATH);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                HypervisorError::io(format!("Failed to create {}", parent.display()), e)
            })?;
        }

        tokio::fs::write(&path, render_network_config(ip, &self.gateway))
            .await
            .map_err(|e| HypervisorError::io(format!("Failed to write {}", path.display()), e))?;

        debug!(ip, gateway = %self.gateway, "Guest network config written");
        Ok(())
    }

    async fn cleanup(&self, instance: &Instance) -> Result<()> {
        self.remove_autostart_link(instance)
    }

    async fn is_running(&self, instance: &Instance) -> Result<bool> {
        Ok(self
            .find_domain(instance)
            .await?
            .map(|row| row.is_running())
            .unwrap_or(false))
    }

    #[instrument(skip(self, instance), fields(vm_id = instance.id))]
    async fn start(&self, instance: &Instance) -> Result<()> {
        let cmd = self
            .xl("create")
            .arg(self.guest_config_path(instance).to_string_lossy());
        self.runner.run(&cmd).await?;
        info!("Domain created");
        Ok(())
    }

    #[instrument(skip(self, instance), fields(vm_id = instance.id))]
    async fn stop(&self, instance: &Instance) -> Result<()> {
        let domid = self.domain_id(instance).await?;
        self.runner
            .run(&self.xl("shutdown").arg(domid.to_string()))
            .await?;
        info!(domid, "Domain shutdown requested");
        Ok(())
    }

    #[instrument(skip(self, instance), fields(vm_id = instance.id))]
    async fn restart(&self, instance: &Instance) -> Result<()> {
        let domid = self.domain_id(instance).await?;
        self.runner
            .run(&self.xl("reboot").arg(domid.to_string()))
            .await?;
        info!(domid, "Domain reboot requested");
        Ok(())
    }

    async fn delete(&self, instance: &Instance) -> Result<()> {
        self.remove_autostart_link(instance)
    }
}

/// `xl` and the autostart links resolve paths from their own directory.
fn require_absolute(path: &Path) -> Result<()> {
    if path.is_absolute() {
        return Ok(());
    }
    Err(HypervisorError::InvalidConfig(format!(
        "Path {} must be absolute",
        path.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockRunner;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        runner: Arc<MockRunner>,
        backend: XenBackend,
        instance: Instance,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let conf_dir = temp.path().join("xen");
        let instances = temp.path().join("instances");
        std::fs::create_dir_all(&conf_dir).unwrap();

        let instance = Instance::new(1, "web1", BackendType::Xen, &instances);
        std::fs::create_dir_all(&instance.dir).unwrap();

        let runner = Arc::new(MockRunner::new());
        let config = XenConfig {
            conf_dir,
            pvgrub_path: PathBuf::from("/usr/lib/xen/bin/pvgrub"),
            xl_path: PathBuf::from("xl"),
        };
        let backend = XenBackend::new(config, "10.10.10.2", runner.clone());
        Fixture {
            _temp: temp,
            runner,
            backend,
            instance,
        }
    }

    #[tokio::test]
    async fn test_guest_config_uses_disk_format() {
        let f = fixture();
        let guest = GuestSpec {
            memory_mib: 1024,
            vcpus: 2,
            ip: "10.10.10.5".to_string(),
            disk_path: f.instance.disk_path(),
        };
        f.backend.write_guest_config(&f.instance, &guest).await.unwrap();

        let written = std::fs::read_to_string(f.instance.dir.join(GUEST_CONFIG_FILE)).unwrap();
        assert!(written.contains("name = \"1-web1\""));
        assert!(written.contains("memory = 1024"));
        assert!(written.contains(&format!(
            "disk = [ '{},qcow2,xvda,rw' ]",
            f.instance.disk_path().display()
        )));
    }

    #[tokio::test]
    async fn test_autostart_conflict_is_detected() {
        let f = fixture();
        f.backend.preflight(&f.instance).await.unwrap();
        f.backend.enable_autostart(&f.instance).await.unwrap();

        let link = f.backend.autostart_path(&f.instance);
        assert_eq!(
            std::fs::read_link(&link).unwrap(),
            f.instance.dir.join(GUEST_CONFIG_FILE)
        );
        assert!(matches!(
            f.backend.preflight(&f.instance).await,
            Err(HypervisorError::AutostartConflict(_))
        ));
        assert!(matches!(
            f.backend.enable_autostart(&f.instance).await,
            Err(HypervisorError::AutostartConflict(_))
        ));
    }

    #[tokio::test]
    async fn test_relative_paths_are_rejected() {
        let f = fixture();
        let relative = Instance::new(2, "web2", BackendType::Xen, Path::new("instances"));
        let guest = GuestSpec {
            memory_mib: 512,
            vcpus: 1,
            ip: "10.10.10.6".to_string(),
            disk_path: relative.disk_path(),
        };

        assert!(matches!(
            f.backend.write_guest_config(&f.instance, &guest).await,
            Err(HypervisorError::InvalidConfig(_))
        ));
        assert!(matches!(
            f.backend.enable_autostart(&relative).await,
            Err(HypervisorError::InvalidConfig(_))
        ));
        assert!(f.backend.autostart_path(&relative).symlink_metadata().is_err());
    }

    #[tokio::test]
    async fn test_cleanup_leaves_foreign_links() {
        let f = fixture();
        let auto_dir = f.backend.config.conf_dir.join("auto");
        std::fs::create_dir_all(&auto_dir).unwrap();
        std::os::unix::fs::symlink("/etc/xen/other.cfg", auto_dir.join("1-web1")).unwrap();

        f.backend.cleanup(&f.instance).await.unwrap();
        assert!(auto_dir.join("1-web1").symlink_metadata().is_ok());

        std::fs::remove_file(auto_dir.join("1-web1")).unwrap();
        f.backend.enable_autostart(&f.instance).await.unwrap();
        f.backend.cleanup(&f.instance).await.unwrap();
        f.backend.cleanup(&f.instance).await.unwrap();
        assert!(auto_dir.join("1-web1").symlink_metadata().is_err());
    }

    #[tokio::test]
    async fn test_network_config_below_guest_root() {
        let f = fixture();
        let root = f.instance.mount_point();
        f.backend
            .write_network_config(&f.instance, &root, "10.10.10.5")
            .await
            .unwrap();

        let written = std::fs::read_to_string(root.join(NETWORK_CONFIG_PATH)).unwrap();
        assert!(written.contains("Address=10.10.10.5/32\nGateway=10.10.10.2\n"));
    }

    #[tokio::test]
    async fn test_lifecycle_commands_address_domain_id() {
        let f = fixture();
        assert!(!f.backend.is_running(&f.instance).await.unwrap());
        assert!(matches!(
            f.backend.stop(&f.instance).await,
            Err(HypervisorError::DomainNotFound(_))
        ));

        f.runner
            .set_domains(&["1-web1                                       7   512     1     -b----      31.0"]);
        assert!(f.backend.is_running(&f.instance).await.unwrap());

        f.backend.start(&f.instance).await.unwrap();
        f.backend.stop(&f.instance).await.unwrap();
        f.backend.restart(&f.instance).await.unwrap();

        let calls = f.runner.calls();
        assert!(calls.contains(&format!(
            "xl create {}",
            f.instance.dir.join(GUEST_CONFIG_FILE).display()
        )));
        assert!(calls.contains(&"xl shutdown 7".to_string()));
        assert!(calls.contains(&"xl reboot 7".to_string()));
    }

    #[tokio::test]
    async fn test_similar_names_do_not_match() {
        let f = fixture();
        f.runner
            .set_domains(&["11-web1                                      9   512     1     r-----       1.0"]);
        assert!(!f.backend.is_running(&f.instance).await.unwrap());
    }
}
