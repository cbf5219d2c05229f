//! Deployment pipeline tests against a mocked host.

mod common;

use common::{request, Host, ALICE_KEY};
use vmlight_hypervisor::xen::GUEST_CONFIG_FILE;
use vmlight_hypervisor::{DeployObserver, DeployStep, HypervisorError, MockRunner, Result};

/// Fails when the given step is about to run.
struct FailAt(DeployStep);

impl DeployObserver for FailAt {
    fn on_step(&self, step: DeployStep) -> Result<()> {
        if step == self.0 {
            return Err(HypervisorError::Interrupted(step.description()));
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_deploy_end_to_end() {
    let host = Host::new();
    let instance = host.deployer().deploy(&request("web1"), &()).await.unwrap();

    assert_eq!(instance.id, 1);
    assert_eq!(instance.dir, host.instances_dir().join("1-web1"));
    assert!(instance.dir.join("root.qcow2").is_file());
    assert!(!instance.dir.join("mnt").exists());

    let cfg_path = instance.dir.join(GUEST_CONFIG_FILE);
    let cfg = std::fs::read_to_string(&cfg_path).unwrap();
    assert!(cfg.contains("\nname = \"1-web1\"\n"));
    assert!(cfg.contains("\nvif = [ 'vifname=vm1,ip=10.10.10.5' ]\n"));
    assert!(cfg.contains(&format!(
        "\ndisk = [ '{},qcow2,xvda,rw' ]\n",
        instance.dir.join("root.qcow2").display()
    )));

    assert_eq!(
        std::fs::read_link(host.auto_dir().join("1-web1")).unwrap(),
        cfg_path
    );

    let guest = host.runner.guest_files();
    assert_eq!(guest.get("etc/hostname").map(String::as_str), Some("web1"));
    assert_eq!(
        guest.get("root/.ssh/authorized_keys").cloned(),
        Some(format!("{}\n", ALICE_KEY))
    );
    let network = guest.get("etc/systemd/network/10-enX0.network").unwrap();
    assert!(network.contains("Address=10.10.10.5/32\nGateway=10.10.10.2\n"));
    assert!(network.contains("[Route]\nDestination=10.10.10.2/32\n"));

    let calls = host.runner.calls();
    let disk = instance.dir.join("root.qcow2");
    assert!(calls.contains(&format!(
        "qemu-img convert -O qcow2 {} {}",
        host.root().join("images/debian-12.img").display(),
        disk.display()
    )));
    assert!(calls.contains(&format!("qemu-img resize {} {}", disk.display(), 10u64 << 30)));
    assert!(calls.contains(&format!(
        "guestmount -a {} -m /dev/sda1 {}",
        disk.display(),
        instance.dir.join("mnt").display()
    )));
}

#[tokio::test]
async fn test_qcow2_image_is_copied_not_converted() {
    let host = Host::new();
    let mut req = request("web1");
    req.image = "alpine".to_string();

    let instance = host.deployer().deploy(&req, &()).await.unwrap();

    assert!(!host.runner.ran("qemu-img", "convert"));
    assert_eq!(
        std::fs::read(instance.disk_path()).unwrap(),
        b"qcow2 image payload"
    );
}

#[tokio::test]
async fn test_raw_image_is_converted() {
    let host = Host::new();
    std::fs::write(host.root().join("images/ubuntu.raw"), b"raw payload").unwrap();
    let mut req = request("web1");
    req.image = "ubuntu".to_string();

    let instance = host.deployer().deploy(&req, &()).await.unwrap();

    assert!(host.runner.calls().contains(&format!(
        "qemu-img convert -O qcow2 {} {}",
        host.root().join("images/ubuntu.raw").display(),
        instance.disk_path().display()
    )));
    assert_eq!(std::fs::read(instance.disk_path()).unwrap(), b"raw payload");
}

#[tokio::test]
async fn test_image_format_errors_before_any_side_effect() {
    let host = Host::new();
    std::fs::write(host.root().join("images/win.vmdk"), b"vmdk").unwrap();
    std::fs::write(host.root().join("images/alpine.img"), b"raw").unwrap();

    let mut req = request("web1");
    req.image = "win".to_string();
    let err = host.deployer().deploy(&req, &()).await.unwrap_err();
    assert!(matches!(err, HypervisorError::UnsupportedDiskFormat(ref ext) if ext == "vmdk"));

    req.image = "alpine".to_string();
    let err = host.deployer().deploy(&req, &()).await.unwrap_err();
    assert!(matches!(err, HypervisorError::AmbiguousImage(..)));

    assert!(host.runner.calls().is_empty());
    assert!(!host.instances_dir().exists() || host.instance_dirs().is_empty());
}

#[tokio::test]
async fn test_ids_fill_gaps() {
    let host = Host::new();
    let deployer = host.deployer();

    for name in ["a", "b", "c"] {
        deployer.deploy(&request(name), &()).await.unwrap();
    }
    std::fs::remove_dir_all(host.instances_dir().join("2-b")).unwrap();
    std::fs::remove_file(host.auto_dir().join("2-b")).unwrap();

    let instance = deployer.deploy(&request("d"), &()).await.unwrap();
    assert_eq!(instance.id, 2);
    assert_eq!(host.instance_dirs(), vec!["1-a", "2-d", "3-c"]);
}

#[tokio::test]
async fn test_interruption_at_every_step_rolls_back() {
    for step in DeployStep::ALL {
        let host = Host::new();
        let err = host
            .deployer()
            .deploy(&request("web1"), &FailAt(step))
            .await
            .unwrap_err();

        assert!(
            matches!(err, HypervisorError::Interrupted(_)),
            "step {}: {}",
            step,
            err
        );
        assert!(host.instance_dirs().is_empty(), "step {} left a directory", step);
        assert!(host.autostart_entries().is_empty(), "step {} left a link", step);
    }
}

#[tokio::test]
async fn test_tool_failures_roll_back() {
    // "umount /" fails the regular unmount only; rollback detaches lazily.
    for pattern in ["convert", "resize", "guestmount", "umount /"] {
        let host = Host::with_runner(MockRunner::new().fail_on(pattern));
        let err = host
            .deployer()
            .deploy(&request("web1"), &())
            .await
            .unwrap_err();

        assert!(
            matches!(err, HypervisorError::CommandFailed { ref command, .. } if command.contains(pattern)),
            "{}: {}",
            pattern,
            err
        );
        assert!(host.instance_dirs().is_empty(), "{} left a directory", pattern);
        assert!(host.autostart_entries().is_empty(), "{} left a link", pattern);
    }
}

#[tokio::test]
async fn test_stuck_mount_keeps_instance_directory() {
    let host = Host::with_runner(MockRunner::new().fail_on("umount"));
    let err = host
        .deployer()
        .deploy(&request("web1"), &())
        .await
        .unwrap_err();

    assert!(matches!(err, HypervisorError::CommandFailed { ref command, .. } if command.starts_with("umount")));
    assert!(host.runner.calls().iter().any(|c| c.starts_with("umount -l ")));
    assert_eq!(host.instance_dirs(), vec!["1-web1"]);
    assert!(host.instances_dir().join("1-web1/mnt").is_dir());
    assert!(host.autostart_entries().is_empty());
}

#[tokio::test]
async fn test_shrinking_is_refused() {
    let host = Host::with_runner(MockRunner::new().with_image_size(20 << 30));
    let err = host
        .deployer()
        .deploy(&request("web1"), &())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        HypervisorError::DiskTooSmall { requested, minimum }
            if requested == 10 << 30 && minimum == 20 << 30
    ));
    assert!(!host.runner.ran("qemu-img", "resize"));
    assert!(host.instance_dirs().is_empty());
}

#[tokio::test]
async fn test_unknown_names_fail_before_any_side_effect() {
    let host = Host::new();

    let mut req = request("web1");
    req.ssh_keys.push("nobody".to_string());
    let err = host.deployer().deploy(&req, &()).await.unwrap_err();
    assert!(matches!(err, HypervisorError::SshKeyNotFound(ref name) if name == "nobody"));

    let mut req = request("web1");
    req.image = "centos".to_string();
    let err = host.deployer().deploy(&req, &()).await.unwrap_err();
    assert!(matches!(err, HypervisorError::ImageNotFound(_)));

    let mut req = request("web 1");
    req.image = "alpine".to_string();
    let err = host.deployer().deploy(&req, &()).await.unwrap_err();
    assert!(matches!(err, HypervisorError::InvalidRequest(_)));

    assert!(host.runner.calls().is_empty());
    assert!(!host.instances_dir().exists() || host.instance_dirs().is_empty());
}

#[tokio::test]
async fn test_autostart_conflict_keeps_foreign_entry() {
    let host = Host::new();
    std::fs::create_dir_all(host.auto_dir()).unwrap();
    std::os::unix::fs::symlink("/etc/xen/hand-made.cfg", host.auto_dir().join("1-web1")).unwrap();

    let err = host
        .deployer()
        .deploy(&request("web1"), &())
        .await
        .unwrap_err();

    assert!(matches!(err, HypervisorError::AutostartConflict(_)));
    assert!(host.runner.calls().is_empty());
    assert!(host.instance_dirs().is_empty());
    assert_eq!(
        std::fs::read_link(host.auto_dir().join("1-web1")).unwrap(),
        std::path::PathBuf::from("/etc/xen/hand-made.cfg")
    );
}
