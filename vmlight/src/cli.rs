//! Command-line argument parsing.

use std::path::PathBuf;

use clap::{ArgGroup, Args, Parser, Subcommand};
use vmlight_hypervisor::BackendType;

/// Unified manager of Xen, KVM and systemd-nspawn instances.
///
/// Used mainly for deployment and configuration, with basic monitoring and
/// management of deployed instances.
#[derive(Parser, Debug)]
#[command(name = "vmlight")]
#[command(version)]
pub struct Cli {
    /// Type of the instance (xen, kvm, systemd-nspawn); defaults to [deploy] type
    #[arg(short = 't', long = "type", value_parser = parse_backend, global = true)]
    pub backend: Option<BackendType>,

    /// Extra configuration file, applied after the user and system files
    #[arg(short, long, env = "VMLIGHT_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "warn", global = true)]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Deploy a new instance
    Deploy(DeployArgs),
    /// Manage OS images
    Image(ImageArgs),
    /// Manage SSH keys
    #[command(name = "ssh-keys")]
    SshKeys(SshKeysArgs),
    /// Manage deployed instances
    Vm(VmArgs),
}

#[derive(Args, Debug, Default)]
pub struct DeployArgs {
    /// Ask for missing values
    #[arg(short, long)]
    pub interactive: bool,

    /// Name of the instance, also its hostname
    #[arg(long, required_unless_present = "interactive")]
    pub name: Option<String>,

    /// Name of the image
    #[arg(long, required_unless_present = "interactive")]
    pub image: Option<String>,

    /// IP address of the instance
    #[arg(long, required_unless_present = "interactive")]
    pub ip: Option<String>,

    /// Disk size of the instance, e.g. 10G
    #[arg(long)]
    pub disk_size: Option<String>,

    /// Memory assigned to the instance in MiB
    #[arg(long)]
    pub memory: Option<u32>,

    /// Number of CPUs assigned to the instance
    #[arg(long)]
    pub vcpus: Option<u32>,

    /// SSH key (by name) for the instance; may be repeated
    #[arg(long = "ssh-key")]
    pub ssh_keys: Vec<String>,
}

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("action").required(true).args(["add", "remove", "list"])))]
pub struct ImageArgs {
    /// Copy an image file into the store
    #[arg(long, value_name = "IMAGE_FILE")]
    pub add: Option<PathBuf>,

    /// Remove an image from the store
    #[arg(long, value_name = "IMAGE_NAME")]
    pub remove: Option<String>,

    /// List available images
    #[arg(long)]
    pub list: bool,
}

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("action").required(true).args(["add", "add_file", "remove", "list"])))]
pub struct SshKeysArgs {
    /// Add a public key line (`type material name`)
    #[arg(long, value_name = "PUBKEY")]
    pub add: Option<String>,

    /// Add every key in a public key file
    #[arg(long, value_name = "FILE")]
    pub add_file: Option<PathBuf>,

    /// Remove a key by name
    #[arg(long, value_name = "KEYNAME")]
    pub remove: Option<String>,

    /// List stored keys
    #[arg(long)]
    pub list: bool,
}

#[derive(Args, Debug)]
#[command(group(
    ArgGroup::new("action")
        .required(true)
        .args(["list", "status", "start", "stop", "restart", "delete"])
))]
pub struct VmArgs {
    /// List instances with their state
    #[arg(long)]
    pub list: bool,

    /// Show one instance
    #[arg(long, value_name = "ID")]
    pub status: Option<u32>,

    /// Start an instance
    #[arg(long, value_name = "ID")]
    pub start: Option<u32>,

    /// Shut an instance down
    #[arg(long, value_name = "ID")]
    pub stop: Option<u32>,

    /// Reboot an instance
    #[arg(long, value_name = "ID")]
    pub restart: Option<u32>,

    /// Delete a stopped instance (asks for confirmation)
    #[arg(long, value_name = "ID")]
    pub delete: Option<u32>,
}

fn parse_backend(value: &str) -> Result<BackendType, String> {
    value.parse().map_err(|e: vmlight_hypervisor::HypervisorError| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_non_interactive_deploy_requires_name_image_ip() {
        assert!(Cli::try_parse_from(["vmlight", "deploy", "--name", "web1"]).is_err());

        let cli = Cli::try_parse_from([
            "vmlight", "deploy", "--name", "web1", "--image", "debian-12", "--ip", "10.10.10.5",
            "--ssh-key", "alice", "--ssh-key", "bob",
        ])
        .unwrap();
        let Command::Deploy(args) = cli.command else {
            panic!("expected deploy");
        };
        assert_eq!(args.ssh_keys, vec!["alice", "bob"]);
        assert_eq!(args.memory, None);
    }

    #[test]
    fn test_interactive_deploy_needs_nothing() {
        let cli = Cli::try_parse_from(["vmlight", "deploy", "-i"]).unwrap();
        assert!(matches!(cli.command, Command::Deploy(DeployArgs { interactive: true, .. })));
    }

    #[test]
    fn test_type_flag() {
        let cli = Cli::try_parse_from(["vmlight", "-t", "kvm", "vm", "--list"]).unwrap();
        assert_eq!(cli.backend, Some(BackendType::Kvm));
        assert!(Cli::try_parse_from(["vmlight", "-t", "vmware", "vm", "--list"]).is_err());
    }

    #[test]
    fn test_exactly_one_action() {
        assert!(Cli::try_parse_from(["vmlight", "vm"]).is_err());
        assert!(Cli::try_parse_from(["vmlight", "vm", "--start", "1", "--stop", "1"]).is_err());
        assert!(Cli::try_parse_from(["vmlight", "image"]).is_err());
        assert!(Cli::try_parse_from(["vmlight", "ssh-keys", "--list"]).is_ok());
    }
}
