//! Instance deployment.
//!
//! ## Steps
//!
//! ```text
//! preflight          validate request, resolve image + SSH keys (no side effects)
//!  1. reserve        allocate ID, create <id>-<name>/, backend preflight
//!  2. import         copy or convert image to root.qcow2
//!  3. resize         grow root.qcow2 to the requested size
//!  4. guest config   backend config file
//!  5. autostart      backend autostart entry
//!  6. mount          guestmount first partition at mnt/
//!  7. network        guest network config
//!  8. ssh keys       append to /root/.ssh/authorized_keys
//!  9. hostname       /etc/hostname
//! 10. unmount        umount mnt/ and remove it
//! ```
//!
//! Any failure after step 1 rolls back: unmount, backend cleanup, removal
//! of the instance directory. Rollback errors are logged, never returned.

mod interactive;

pub use interactive::{gather_request, PartialRequest, Prompt, RequestDefaults, StdinPrompt};

use std::fmt;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, instrument, warn};

use crate::error::{HypervisorError, Result};
use crate::images::{ImageEntry, ImageStore};
use crate::registry::InstanceRegistry;
use crate::ssh_keys::SshKeyStore;
use crate::storage::DiskManager;
use crate::traits::{Backend, GuestSpec};
use crate::types::{DeployRequest, DiskFormat, DiskSize, Instance};

/// Guest path of the root user's authorized keys.
pub const AUTHORIZED_KEYS_PATH: &str = "root/.ssh/authorized_keys";

/// Guest path of the hostname file.
pub const HOSTNAME_PATH: &str = "etc/hostname";

/// One side-effecting step of a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeployStep {
    ReserveDirectory,
    ImportImage,
    ResizeDisk,
    WriteGuestConfig,
    EnableAutostart,
    MountDisk,
    ConfigureNetwork,
    DeploySshKeys,
    SetHostname,
    UnmountDisk,
}

impl DeployStep {
    pub const ALL: [DeployStep; 10] = [
        Self::ReserveDirectory,
        Self::ImportImage,
        Self::ResizeDisk,
        Self::WriteGuestConfig,
        Self::EnableAutostart,
        Self::MountDisk,
        Self::ConfigureNetwork,
        Self::DeploySshKeys,
        Self::SetHostname,
        Self::UnmountDisk,
    ];

    /// Progress line shown to the operator.
    pub fn description(&self) -> &'static str {
        match self {
            Self::ReserveDirectory => "Creating instance directory...",
            Self::ImportImage => "Copying image...",
            Self::ResizeDisk => "Resizing disk...",
            Self::WriteGuestConfig => "Creating instance configuration...",
            Self::EnableAutostart => "Enabling instance autostart...",
            Self::MountDisk => "Mounting disk...",
            Self::ConfigureNetwork => "Deploying network configuration...",
            Self::DeploySshKeys => "Deploying SSH keys...",
            Self::SetHostname => "Setting instance hostname...",
            Self::UnmountDisk => "Unmounting disk...",
        }
    }

    /// State reached once this step has succeeded.
    pub fn completes(&self) -> DeployState {
        match self {
            Self::ReserveDirectory => DeployState::DirCreated,
            Self::ImportImage => DeployState::ImageCopied,
            Self::ResizeDisk => DeployState::DiskResized,
            Self::WriteGuestConfig => DeployState::ConfigWritten,
            Self::EnableAutostart => DeployState::AutostartEnabled,
            Self::MountDisk => DeployState::Mounted,
            Self::ConfigureNetwork => DeployState::NetworkConfigured,
            Self::DeploySshKeys => DeployState::SshKeysDeployed,
            Self::SetHostname => DeployState::HostnameSet,
            Self::UnmountDisk => DeployState::Unmounted,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::ReserveDirectory => "reserve_directory",
            Self::ImportImage => "import_image",
            Self::ResizeDisk => "resize_disk",
            Self::WriteGuestConfig => "write_guest_config",
            Self::EnableAutostart => "enable_autostart",
            Self::MountDisk => "mount_disk",
            Self::ConfigureNetwork => "configure_network",
            Self::DeploySshKeys => "deploy_ssh_keys",
            Self::SetHostname => "set_hostname",
            Self::UnmountDisk => "unmount_disk",
        }
    }
}

impl fmt::Display for DeployStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Deployment progress. Linear; there are no branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DeployState {
    Init,
    DirCreated,
    ImageCopied,
    DiskResized,
    ConfigWritten,
    AutostartEnabled,
    Mounted,
    NetworkConfigured,
    SshKeysDeployed,
    HostnameSet,
    Unmounted,
    Complete,
}

/// Called before each step. Returning an error aborts the deployment and
/// triggers rollback.
pub trait DeployObserver: Send + Sync {
    fn on_step(&self, step: DeployStep) -> Result<()>;
}

/// Observer that does nothing.
impl DeployObserver for () {
    fn on_step(&self, _step: DeployStep) -> Result<()> {
        Ok(())
    }
}

/// Everything resolved during preflight.
struct DeployPlan {
    image: ImageEntry,
    disk_size: DiskSize,
    key_lines: Vec<String>,
}

/// What rollback has to undo.
struct Progress {
    state: DeployState,
    backend_prepared: bool,
}

/// Runs deployments against one backend.
pub struct Deployer {
    registry: InstanceRegistry,
    images: ImageStore,
    keys: SshKeyStore,
    backend: Arc<dyn Backend>,
    disks: DiskManager,
}

impl Deployer {
    pub fn new(
        registry: InstanceRegistry,
        images: ImageStore,
        keys: SshKeyStore,
        backend: Arc<dyn Backend>,
        disks: DiskManager,
    ) -> Self {
        Self {
            registry,
            images,
            keys,
            backend,
            disks,
        }
    }

    /// Deploy one instance.
    ///
    /// On error nothing of the instance is left behind: no directory, no
    /// autostart entry, no mount.
    #[instrument(skip(self, request, observer), fields(name = %request.name, image = %request.image))]
    pub async fn deploy(
        &self,
        request: &DeployRequest,
        observer: &dyn DeployObserver,
    ) -> Result<Instance> {
        let plan = self.preflight(request)?;

        observer.on_step(DeployStep::ReserveDirectory)?;
        let instance = self
            .registry
            .reserve(&request.name, self.backend.backend_type())?;
        info!(vm_id = instance.id, dir = %instance.dir.display(), "Deploying instance");

        let mut progress = Progress {
            state: DeployState::DirCreated,
            backend_prepared: false,
        };

        match self
            .provision(&instance, request, &plan, observer, &mut progress)
            .await
        {
            Ok(()) => {
                info!(vm_id = instance.id, state = ?DeployState::Complete, "Deployment complete");
                Ok(instance)
            }
            Err(e) => {
                error!(vm_id = instance.id, state = ?progress.state, error = %e, "Deployment failed, rolling back");
                self.rollback(&instance, &progress).await;
                Err(e)
            }
        }
    }

    /// Validate the request and resolve every name it references.
    fn preflight(&self, request: &DeployRequest) -> Result<DeployPlan> {
        let disk_size = request.validate()?;
        let image = self.images.resolve(&request.image)?;
        let key_lines = request
            .ssh_keys
            .iter()
            .map(|name| self.keys.resolve(name))
            .collect::<Result<Vec<_>>>()?;

        debug!(
            image = %image.path.display(),
            format = %image.format,
            keys = key_lines.len(),
            "Preflight passed"
        );
        Ok(DeployPlan {
            image,
            disk_size,
            key_lines,
        })
    }

    async fn provision(
        &self,
        instance: &Instance,
        request: &DeployRequest,
        plan: &DeployPlan,
        observer: &dyn DeployObserver,
        progress: &mut Progress,
    ) -> Result<()> {
        self.backend.preflight(instance).await?;
        progress.backend_prepared = true;

        let disk = instance.disk_path();
        let mount_point = instance.mount_point();

        for step in &DeployStep::ALL[1..] {
            observer.on_step(*step)?;
            let started = Instant::now();

            match step {
                DeployStep::ReserveDirectory => {}
                DeployStep::ImportImage => {
                    self.disks
                        .import_image(&plan.image.path, plan.image.format, &disk, DiskFormat::Qcow2)
                        .await?
                }
                DeployStep::ResizeDisk => self.disks.grow(&disk, plan.disk_size).await?,
                DeployStep::WriteGuestConfig => {
                    let guest = GuestSpec {
                        memory_mib: request.memory_mib,
                        vcpus: request.vcpus,
                        ip: request.ip.clone(),
                        disk_path: disk.clone(),
                    };
                    self.backend.write_guest_config(instance, &guest).await?
                }
                DeployStep::EnableAutostart => self.backend.enable_autostart(instance).await?,
                DeployStep::MountDisk => self.disks.mount(&disk, &mount_point).await?,
                DeployStep::ConfigureNetwork => {
                    self.backend
                        .write_network_config(instance, &mount_point, &request.ip)
                        .await?
                }
                DeployStep::DeploySshKeys => append_authorized_keys(&mount_point, &plan.key_lines)?,
                DeployStep::SetHostname => write_hostname(&mount_point, &instance.name)?,
                DeployStep::UnmountDisk => self.disks.unmount(&mount_point).await?,
            }

            progress.state = step.completes();
            debug!(step = %step, elapsed_ms = started.elapsed().as_millis() as u64, "Step done");
        }

        Ok(())
    }

    /// Undo a partial deployment. Every action is attempted; failures are
    /// logged.
    ///
    /// The instance directory is kept while the guest disk is still mounted
    /// below it.
    async fn rollback(&self, instance: &Instance, progress: &Progress) {
        let mount_point = instance.mount_point();
        let mut still_mounted = false;
        if mount_point.exists() {
            if let Err(e) = self.disks.unmount(&mount_point).await {
                warn!(error = %e, "Rollback: unmount failed, detaching lazily");
                if let Err(e) = self.disks.unmount_lazy(&mount_point).await {
                    warn!(error = %e, "Rollback: lazy unmount failed");
                    still_mounted = true;
                }
            }
        }

        if progress.backend_prepared {
            if let Err(e) = self.backend.cleanup(instance).await {
                warn!(error = %e, "Rollback: backend cleanup failed");
            }
        }

        if still_mounted {
            warn!(
                dir = %instance.dir.display(),
                "Rollback: guest disk still mounted, instance directory left in place"
            );
            return;
        }

        match tokio::fs::remove_dir_all(&instance.dir).await {
            Ok(()) => info!(dir = %instance.dir.display(), "Rollback: instance directory removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(dir = %instance.dir.display(), error = %e, "Rollback: failed to remove instance directory"),
        }
    }
}

/// Append key lines to the guest's root `authorized_keys`.
fn append_authorized_keys(guest_root: &Path, key_lines: &[String]) -> Result<()> {
    use std::io::Write;

    let path = guest_root.join(AUTHORIZED_KEYS_PATH);
    let ssh_dir = path
        .parent()
        .ok_or_else(|| HypervisorError::InvalidConfig("authorized_keys has no parent".to_string()))?;

    std::fs::create_dir_all(ssh_dir)
        .map_err(|e| HypervisorError::io(format!("Failed to create {}", ssh_dir.display()), e))?;
    std::fs::set_permissions(ssh_dir, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| HypervisorError::io(format!("Failed to chmod {}", ssh_dir.display()), e))?;

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .mode(0o600)
        .open(&path)
        .map_err(|e| HypervisorError::io(format!("Failed to open {}", path.display()), e))?;
    for line in key_lines {
        writeln!(file, "{}", line)
            .map_err(|e| HypervisorError::io(format!("Failed to write {}", path.display()), e))?;
    }

    debug!(count = key_lines.len(), "SSH keys deployed");
    Ok(())
}

fn write_hostname(guest_root: &Path, name: &str) -> Result<()> {
    let path = guest_root.join(HOSTNAME_PATH);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| HypervisorError::io(format!("Failed to create {}", parent.display()), e))?;
    }
    std::fs::write(&path, name)
        .map_err(|e| HypervisorError::io(format!("Failed to write {}", path.display()), e))
}
