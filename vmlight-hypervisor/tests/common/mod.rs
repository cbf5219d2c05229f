//! Shared fixture: a throwaway host layout driven by `MockRunner`.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use vmlight_hypervisor::{
    Backend, DeployRequest, Deployer, DiskManager, ImageStore, InstanceRegistry, MockRunner,
    SshKeyStore, VmManager, XenBackend, XenConfig,
};

pub const ALICE_KEY: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIAlice alice@laptop";

pub struct Host {
    pub temp: TempDir,
    pub runner: Arc<MockRunner>,
    pub backend: Arc<XenBackend>,
}

impl Host {
    pub fn new() -> Self {
        Self::with_runner(MockRunner::new())
    }

    pub fn with_runner(runner: MockRunner) -> Self {
        let temp = TempDir::new().unwrap();
        let root = temp.path();

        std::fs::create_dir_all(root.join("images")).unwrap();
        std::fs::write(root.join("images/debian-12.img"), b"raw image payload").unwrap();
        std::fs::write(root.join("images/alpine.qcow2"), b"qcow2 image payload").unwrap();
        std::fs::create_dir_all(root.join("xen")).unwrap();

        let keys = SshKeyStore::new(root.join("ssh_key_store"));
        keys.add(ALICE_KEY).unwrap();

        let runner = Arc::new(runner);
        let config = XenConfig {
            conf_dir: root.join("xen"),
            pvgrub_path: PathBuf::from("/usr/lib/xen/bin/pvgrub"),
            xl_path: PathBuf::from("xl"),
        };
        let backend = Arc::new(XenBackend::new(config, "10.10.10.2", runner.clone()));

        Self {
            temp,
            runner,
            backend,
        }
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn instances_dir(&self) -> PathBuf {
        self.root().join("instances")
    }

    pub fn auto_dir(&self) -> PathBuf {
        self.root().join("xen/auto")
    }

    pub fn registry(&self) -> InstanceRegistry {
        InstanceRegistry::new(self.instances_dir())
    }

    pub fn deployer(&self) -> Deployer {
        Deployer::new(
            self.registry(),
            ImageStore::new(self.root().join("images")),
            SshKeyStore::new(self.root().join("ssh_key_store")),
            self.backend.clone() as Arc<dyn Backend>,
            DiskManager::new(self.runner.clone()),
        )
    }

    pub fn manager(&self) -> VmManager {
        VmManager::new(self.registry()).with_backend(self.backend.clone())
    }

    /// Subdirectories of the instances directory, sorted.
    pub fn instance_dirs(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(self.instances_dir()) else {
            return Vec::new();
        };
        let mut dirs: Vec<String> = entries
            .map(|e| e.unwrap().path())
            .filter(|p| p.is_dir())
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        dirs.sort();
        dirs
    }

    /// Entries of `<conf_dir>/auto`, sorted.
    pub fn autostart_entries(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(self.auto_dir()) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}

pub fn request(name: &str) -> DeployRequest {
    DeployRequest {
        name: name.to_string(),
        image: "debian-12".to_string(),
        ip: "10.10.10.5".to_string(),
        disk_size: "10G".to_string(),
        memory_mib: 512,
        vcpus: 1,
        ssh_keys: vec!["alice@laptop".to_string()],
    }
}
