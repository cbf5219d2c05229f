//! Instance registry and ID allocation.
//!
//! The instances directory is the source of truth: every subdirectory named
//! `{id}-{name}` is an instance. Nothing is cached; each call re-scans.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument, warn};

use crate::error::{HypervisorError, Result};
use crate::lock::RegistryLock;
use crate::types::{parse_dir_name, validate_name, BackendType, Instance};

/// Return the smallest positive integer not in `existing`.
///
/// IDs freed by deleted instances are reused, so the allocation must be
/// recomputed from a fresh scan every time.
pub fn allocate_id(existing: &BTreeSet<u32>) -> u32 {
    let mut candidate = 1;
    for &id in existing.range(1..) {
        if id != candidate {
            break;
        }
        candidate += 1;
    }
    candidate
}

/// Scans and indexes instance directories under a root path.
#[derive(Debug, Clone)]
pub struct InstanceRegistry {
    root: PathBuf,
}

impl InstanceRegistry {
    /// A relative root is resolved against the current directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let root = std::path::absolute(&root).unwrap_or(root);
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// List all instances ordered by ID.
    ///
    /// Entries that are not directories or whose names do not parse as
    /// `{id}-{name}` are skipped.
    pub fn list(&self) -> Result<Vec<Instance>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let entries = std::fs::read_dir(&self.root).map_err(|e| {
            HypervisorError::io(format!("Failed to read {}", self.root.display()), e)
        })?;

        let mut instances = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                HypervisorError::io(format!("Failed to read {}", self.root.display()), e)
            })?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }

            let file_name = entry.file_name();
            let Some(dir_name) = file_name.to_str() else {
                warn!(path = %path.display(), "Skipping non UTF-8 instance directory");
                continue;
            };
            let Some((id, name)) = parse_dir_name(dir_name) else {
                warn!(path = %path.display(), "Skipping directory that is not an instance");
                continue;
            };

            instances.push(Instance {
                id,
                name: name.to_string(),
                backend: BackendType::detect(&path),
                dir: path.clone(),
            });
        }

        instances.sort_by(|a, b| a.id.cmp(&b.id).then_with(|| a.name.cmp(&b.name)));
        debug!(count = instances.len(), "Scanned instance registry");
        Ok(instances)
    }

    /// Get an instance by ID.
    pub fn get(&self, id: u32) -> Result<Instance> {
        self.list()?
            .into_iter()
            .find(|instance| instance.id == id)
            .ok_or(HypervisorError::InstanceNotFound(id))
    }

    /// Allocate the lowest free ID for `name` and create its directory.
    ///
    /// Scan, allocation and directory creation happen under the registry
    /// lock; once the directory exists the ID is taken for other callers.
    #[instrument(skip(self), fields(root = %self.root.display()))]
    pub fn reserve(&self, name: &str, backend: BackendType) -> Result<Instance> {
        validate_name(name)?;

        let _lock = RegistryLock::acquire(&self.root)?;
        let existing: BTreeSet<u32> = self.list()?.iter().map(|i| i.id).collect();
        let id = allocate_id(&existing);
        let instance = Instance::new(id, name, backend, &self.root);

        std::fs::create_dir_all(&instance.dir).map_err(|e| {
            HypervisorError::io(
                format!("Failed to create instance directory {}", instance.dir.display()),
                e,
            )
        })?;

        info!(id, name, dir = %instance.dir.display(), "Reserved instance directory");
        Ok(instance)
    }
}
