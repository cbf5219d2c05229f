//! Text templates for Xen guests.
//!
//! Output must stay byte-identical for identical inputs; existing hosts
//! compare and diff these files.

use std::path::Path;

use crate::types::DiskFormat;

/// Inputs of an `xl` guest config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XenGuestConfig<'a> {
    pub id: u32,
    pub name: &'a str,
    /// PV-GRUB or kernel image
    pub kernel: &'a Path,
    pub memory_mib: u32,
    pub vcpus: u32,
    pub ip: &'a str,
    /// Absolute disk path
    pub disk_path: &'a Path,
    pub disk_format: DiskFormat,
}

impl XenGuestConfig<'_> {
    /// Render the `xl` config script.
    pub fn render(&self) -> String {
        format!(
            r#"
# This configures a PVH rather than PV guest
type = "pvh"

# Guest name
name = "{id}-{name}"

# 128-bit UUID for the domain as a hexadecimal number.
# Use "uuidgen" to generate one if required.
# The default behavior is to generate a new UUID each time the guest is started.
#uuid = "XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX"

# Kernel image to boot
kernel = "{kernel}"

# Initial memory allocation (MB)
memory = {memory}

# Number of VCPUS
vcpus = {vcpus}

# Network devices
# A list of 'vifspec' entries as described in
# docs/misc/xl-network-configuration.markdown
vif = [ 'vifname={vif},ip={ip}' ]

# Disk Devices
# A list of `diskspec' entries as described in
# docs/misc/xl-disk-configuration.txt
disk = [ '{disk},{format},xvda,rw' ]
"#,
            id = self.id,
            name = self.name,
            kernel = self.kernel.display(),
            memory = self.memory_mib,
            vcpus = self.vcpus,
            vif = vif_name(self.id),
            ip = self.ip,
            disk = self.disk_path.display(),
            format = self.disk_format,
        )
    }
}

/// Host-side virtual interface name, derived from the instance ID.
pub fn vif_name(id: u32) -> String {
    format!("vm{}", id)
}

/// systemd-networkd unit for the guest.
///
/// The address is a /32, so nothing is on-link; the gateway gets an explicit
/// host route or the default route through it could never resolve.
pub fn render_network_config(ip: &str, gateway: &str) -> String {
    format!(
        r#"
[Match]
Name=enX0

[Network]
Address={ip}/32
Gateway={gateway}

[Route]
Destination={gateway}/32
"#,
        ip = ip,
        gateway = gateway,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config<'a>() -> XenGuestConfig<'a> {
        XenGuestConfig {
            id: 1,
            name: "web1",
            kernel: Path::new("/usr/lib/xen/bin/pvgrub"),
            memory_mib: 512,
            vcpus: 2,
            ip: "10.10.10.5",
            disk_path: Path::new("/var/lib/vmlight/instances/1-web1/root.qcow2"),
            disk_format: DiskFormat::Qcow2,
        }
    }

    #[test]
    fn test_render_fields() {
        let rendered = config().render();

        assert!(rendered.starts_with("\n# This configures a PVH rather than PV guest\ntype = \"pvh\"\n"));
        assert!(rendered.contains("\nname = \"1-web1\"\n"));
        assert!(rendered.contains("\nkernel = \"/usr/lib/xen/bin/pvgrub\"\n"));
        assert!(rendered.contains("\nmemory = 512\n"));
        assert!(rendered.contains("\nvcpus = 2\n"));
        assert!(rendered.contains("\nvif = [ 'vifname=vm1,ip=10.10.10.5' ]\n"));
        assert!(rendered.ends_with(
            "\ndisk = [ '/var/lib/vmlight/instances/1-web1/root.qcow2,qcow2,xvda,rw' ]\n"
        ));
    }

    #[test]
    fn test_field_order() {
        let rendered = config().render();
        let position = |needle: &str| rendered.find(needle).unwrap();

        let order = [
            position("type = "),
            position("name = "),
            position("kernel = "),
            position("memory = "),
            position("vcpus = "),
            position("vif = "),
            position("disk = "),
        ];
        assert!(order.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_render_is_deterministic() {
        assert_eq!(config().render(), config().render());

        let mut raw = config();
        raw.disk_format = DiskFormat::Raw;
        assert!(raw.render().contains(",raw,xvda,rw"));
        assert_ne!(raw.render(), config().render());
    }

    #[test]
    fn test_network_config() {
        assert_eq!(
            render_network_config("10.10.10.5", "10.10.10.2"),
            "\n[Match]\nName=enX0\n\n[Network]\nAddress=10.10.10.5/32\nGateway=10.10.10.2\n\n[Route]\nDestination=10.10.10.2/32\n"
        );
    }
}
