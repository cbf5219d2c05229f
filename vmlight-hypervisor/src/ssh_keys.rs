//! SSH public key store backed by a flat file.
//!
//! Each non-comment line is `type material name`; the name is everything
//! after the second space and identifies the key.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, instrument};

use crate::error::{HypervisorError, Result};

const STORE_HEADER: &str = "# Put your SSH keys here";

/// One stored public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SshKey {
    pub key_type: String,
    pub material: String,
    pub name: String,
}

impl SshKey {
    /// Parse a `type material name` line.
    pub fn parse(line: &str) -> Result<Self> {
        let mut parts = line.trim().splitn(3, ' ');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(key_type), Some(material), Some(name))
                if !key_type.is_empty() && !material.is_empty() && !name.trim().is_empty() =>
            {
                Ok(Self {
                    key_type: key_type.to_string(),
                    material: material.to_string(),
                    name: name.trim().to_string(),
                })
            }
            _ => Err(HypervisorError::InvalidKeyLine(line.trim().to_string())),
        }
    }

    /// The full `authorized_keys` line.
    pub fn line(&self) -> String {
        format!("{} {} {}", self.key_type, self.material, self.name)
    }

    /// Shortened key material for listings.
    pub fn snippet(&self) -> String {
        let chars: Vec<char> = self.material.chars().collect();
        if chars.len() <= 20 {
            return self.material.clone();
        }
        let head: String = chars[..10].iter().collect();
        let tail: String = chars[chars.len() - 10..].iter().collect();
        format!("{}...{}", head, tail)
    }
}

/// Key store file.
#[derive(Debug, Clone)]
pub struct SshKeyStore {
    path: PathBuf,
}

impl SshKeyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All keys in file order. A missing file is an empty store.
    pub fn list(&self) -> Result<Vec<SshKey>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| HypervisorError::io(format!("Failed to read {}", self.path.display()), e))?;

        content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(SshKey::parse)
            .collect()
    }

    /// Resolve a key name to its full line.
    pub fn resolve(&self, name: &str) -> Result<String> {
        self.list()?
            .into_iter()
            .find(|key| key.name == name)
            .map(|key| key.line())
            .ok_or_else(|| HypervisorError::SshKeyNotFound(name.to_string()))
    }

    /// Add one key line. Names must be unique.
    #[instrument(skip(self, line))]
    pub fn add(&self, line: &str) -> Result<SshKey> {
        let key = SshKey::parse(line)?;
        let mut keys = self.list()?;
        if keys.iter().any(|k| k.name == key.name) {
            return Err(HypervisorError::AlreadyExists(format!(
                "A key with the name {}",
                key.name
            )));
        }
        keys.push(key.clone());
        self.write(&keys)?;
        info!(name = %key.name, "SSH key added");
        Ok(key)
    }

    /// Add every non-comment line of a public key file.
    ///
    /// All lines are validated before the store is written.
    #[instrument(skip(self), fields(file = %file.display()))]
    pub fn add_file(&self, file: &Path) -> Result<Vec<SshKey>> {
        let content = std::fs::read_to_string(file)
            .map_err(|e| HypervisorError::io(format!("Failed to read {}", file.display()), e))?;

        let mut keys = self.list()?;
        let mut added = Vec::new();
        for line in content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
        {
            let key = SshKey::parse(line)?;
            if keys.iter().any(|k| k.name == key.name) {
                return Err(HypervisorError::AlreadyExists(format!(
                    "A key with the name {}",
                    key.name
                )));
            }
            keys.push(key.clone());
            added.push(key);
        }

        self.write(&keys)?;
        info!(count = added.len(), "SSH keys added from file");
        Ok(added)
    }

    /// Remove a key by name.
    #[instrument(skip(self))]
    pub fn remove(&self, name: &str) -> Result<()> {
        let mut keys = self.list()?;
        let before = keys.len();
        keys.retain(|k| k.name != name);
        if keys.len() == before {
            return Err(HypervisorError::SshKeyNotFound(name.to_string()));
        }
        self.write(&keys)?;
        info!(name, "SSH key removed");
        Ok(())
    }

    fn write(&self, keys: &[SshKey]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| HypervisorError::io(format!("Failed to create {}", parent.display()), e))?;
        }
        let mut content = format!("{}\n", STORE_HEADER);
        for key in keys {
            content.push_str(&key.line());
            content.push('\n');
        }
        std::fs::write(&self.path, content)
            .map_err(|e| HypervisorError::io(format!("Failed to write {}", self.path.display()), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const ALICE: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIGq1yvEXAMPLEKEYMATERIAL alice@laptop";
    const BOB: &str = "ssh-rsa AAAAB3NzaC1yc2EAAAADAQABAAABAQEXAMPLE bob key";

    fn store() -> (TempDir, SshKeyStore) {
        let temp = TempDir::new().unwrap();
        let store = SshKeyStore::new(temp.path().join("ssh_key_store"));
        (temp, store)
    }

    #[test]
    fn test_parse_keeps_spaces_in_name() {
        let key = SshKey::parse(BOB).unwrap();
        assert_eq!(key.key_type, "ssh-rsa");
        assert_eq!(key.name, "bob key");
        assert_eq!(key.line(), BOB);
        assert!(SshKey::parse("ssh-rsa AAAA").is_err());
    }

    #[test]
    fn test_add_resolve_remove() {
        let (_temp, store) = store();
        assert!(store.list().unwrap().is_empty());

        store.add(ALICE).unwrap();
        store.add(BOB).unwrap();
        assert_eq!(store.resolve("alice@laptop").unwrap(), ALICE);
        assert!(matches!(store.add(ALICE), Err(HypervisorError::AlreadyExists(_))));

        store.remove("alice@laptop").unwrap();
        assert!(matches!(
            store.resolve("alice@laptop"),
            Err(HypervisorError::SshKeyNotFound(_))
        ));
        assert!(store.remove("alice@laptop").is_err());

        let content = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(content, format!("{}\n{}\n", STORE_HEADER, BOB));
    }

    #[test]
    fn test_add_file_is_all_or_nothing() {
        let (temp, store) = store();
        store.add(ALICE).unwrap();

        let file = temp.path().join("keys.pub");
        std::fs::write(&file, format!("# team keys\n{}\n{}\n", BOB, ALICE)).unwrap();
        assert!(store.add_file(&file).is_err());
        assert_eq!(store.list().unwrap().len(), 1);

        std::fs::write(&file, format!("# team keys\n{}\n", BOB)).unwrap();
        assert_eq!(store.add_file(&file).unwrap().len(), 1);
        assert_eq!(store.list().unwrap().len(), 2);
    }

    #[test]
    fn test_snippet() {
        let key = SshKey::parse(ALICE).unwrap();
        assert_eq!(key.snippet(), "AAAAC3NzaC...EYMATERIAL");

        let short = SshKey::parse("ssh-ed25519 AAAA short").unwrap();
        assert_eq!(short.snippet(), "AAAA");
    }
}
