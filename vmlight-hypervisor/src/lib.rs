//! # vmlight hypervisor core
//!
//! Provisioning and lifecycle management of lightweight VM instances on a
//! single host.
//!
//! ## Architecture
//!
//! ```text
//!   Deployer ──────────────┐          VmManager
//!   (deploy + rollback)    │      (list/start/stop/delete)
//!       │   │   │          │               │
//!       │   │   └── DiskManager ──┐        │
//!       │   │        (qemu-img,   │        │
//!       │   │        guestmount)  │        │
//!       │   └── ImageStore        │        │
//!       │       SshKeyStore       ▼        │
//!       │                   CommandRunner  │
//!       ▼                         ▲        ▼
//!   InstanceRegistry ◄────────────┼──── Backend trait
//!   (<id>-<name>/ dirs,           │         │
//!    flock on .lock)              └──── XenBackend (xl)
//! ```
//!
//! The instances directory is the only persistent state. Every external
//! tool runs through a [`CommandRunner`]; tests substitute
//! [`mock::MockRunner`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vmlight_hypervisor::*;
//!
//! let config = VmlightConfig::default();
//! let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner::new());
//! let backend = create_backend(BackendType::Xen, &config, runner.clone())?;
//!
//! let deployer = Deployer::new(
//!     InstanceRegistry::new(&config.general.instances_dir),
//!     ImageStore::new(&config.general.image_dir),
//!     SshKeyStore::new(&config.deploy.ssh_key_list_file),
//!     backend,
//!     DiskManager::new(runner),
//! );
//! let instance = deployer.deploy(&request, &()).await?;
//! ```

pub mod command;
pub mod config;
pub mod deploy;
pub mod error;
pub mod images;
pub mod lifecycle;
pub mod lock;
pub mod mock;
pub mod registry;
pub mod ssh_keys;
pub mod storage;
pub mod traits;
pub mod types;
pub mod xen;

pub use command::{CommandRunner, SystemRunner, ToolCommand};
pub use config::{DeployConfig, GeneralConfig, VmlightConfig, XenConfig};
pub use deploy::{
    gather_request, DeployObserver, DeployState, DeployStep, Deployer, PartialRequest, Prompt,
    RequestDefaults, StdinPrompt,
};
pub use error::{HypervisorError, Result};
pub use images::{ImageEntry, ImageStore};
pub use lifecycle::{VmManager, DELETE_CONFIRMATION};
pub use mock::{MockRunner, ScriptedPrompt};
pub use registry::{allocate_id, InstanceRegistry};
pub use ssh_keys::{SshKey, SshKeyStore};
pub use storage::{DiskInfo, DiskManager};
pub use traits::{create_backend, Backend, GuestSpec};
pub use types::*;
pub use xen::XenBackend;
