//! Xen hypervisor backend.
//!
//! Drives the `xl` toolstack: guest configs are `xl` config scripts stored
//! in the instance directory, autostart is a symlink in `<conf_dir>/auto`,
//! and running state comes from parsing `xl list`.

mod backend;
mod list;
mod template;

pub use backend::XenBackend;
pub use list::{parse_xl_list, DomainRow};
pub use template::{render_network_config, vif_name, XenGuestConfig};

/// Guest config file name inside an instance directory; also the marker
/// that classifies a directory as a Xen instance.
pub const GUEST_CONFIG_FILE: &str = "xen_vm.cfg";

/// Guest network unit written below the mounted root filesystem.
pub const NETWORK_CONFIG_PATH: &str = "etc/systemd/network/10-enX0.network";
