//! VM lifecycle management.
//!
//! Every operation looks the instance up in the registry, picks the backend
//! adapter for the instance's type and delegates. Backend failures come back
//! wrapped in [`HypervisorError::Operation`] naming the operation and ID.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::deploy::Prompt;
use crate::error::{HypervisorError, Result};
use crate::registry::InstanceRegistry;
use crate::traits::Backend;
use crate::types::{BackendType, Instance, InstanceState, InstanceStatus};

/// Phrase the operator must type to confirm a deletion.
pub const DELETE_CONFIRMATION: &str = "YES, I am sure!";

/// Lifecycle manager over the instance registry.
pub struct VmManager {
    registry: InstanceRegistry,
    backends: HashMap<BackendType, Arc<dyn Backend>>,
}

impl VmManager {
    pub fn new(registry: InstanceRegistry) -> Self {
        Self {
            registry,
            backends: HashMap::new(),
        }
    }

    /// Register the adapter for its backend type.
    pub fn with_backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backends.insert(backend.backend_type(), backend);
        self
    }

    pub fn registry(&self) -> &InstanceRegistry {
        &self.registry
    }

    fn backend_for(&self, instance: &Instance) -> Result<&Arc<dyn Backend>> {
        self.backends
            .get(&instance.backend)
            .ok_or(HypervisorError::UnsupportedBackend(instance.backend))
    }

    async fn state_of(&self, instance: &Instance) -> Result<InstanceState> {
        let Ok(backend) = self.backend_for(instance) else {
            return Ok(InstanceState::Unknown);
        };
        Ok(if backend.is_running(instance).await? {
            InstanceState::Running
        } else {
            InstanceState::Stopped
        })
    }

    /// All instances with their live state, ordered by ID.
    ///
    /// Instances without an adapter are listed with [`InstanceState::Unknown`].
    pub async fn list(&self) -> Result<Vec<InstanceStatus>> {
        let mut statuses = Vec::new();
        for instance in self.registry.list()? {
            let state = self
                .state_of(&instance)
                .await
                .map_err(|e| e.during("query", instance.id))?;
            statuses.push(InstanceStatus { instance, state });
        }
        Ok(statuses)
    }

    pub async fn status(&self, id: u32) -> Result<InstanceStatus> {
        let instance = self.registry.get(id)?;
        let state = self
            .state_of(&instance)
            .await
            .map_err(|e| e.during("query", id))?;
        Ok(InstanceStatus { instance, state })
    }

    #[instrument(skip(self))]
    pub async fn start(&self, id: u32) -> Result<()> {
        let instance = self.registry.get(id)?;
        self.backend_for(&instance)?
            .start(&instance)
            .await
            .map_err(|e| e.during("start", id))?;
        info!(vm_id = id, "VM started");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn stop(&self, id: u32) -> Result<()> {
        let instance = self.registry.get(id)?;
        self.backend_for(&instance)?
            .stop(&instance)
            .await
            .map_err(|e| e.during("stop", id))?;
        info!(vm_id = id, "VM stop requested");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn restart(&self, id: u32) -> Result<()> {
        let instance = self.registry.get(id)?;
        self.backend_for(&instance)?
            .restart(&instance)
            .await
            .map_err(|e| e.during("restart", id))?;
        info!(vm_id = id, "VM restart requested");
        Ok(())
    }

    /// Delete a stopped instance after the operator confirms.
    ///
    /// Nothing is touched unless the instance is stopped and the answer is
    /// exactly [`DELETE_CONFIRMATION`].
    #[instrument(skip(self, prompt))]
    pub async fn delete(&self, id: u32, prompt: &dyn Prompt) -> Result<()> {
        let instance = self.registry.get(id)?;
        let backend = self.backend_for(&instance)?;

        if backend
            .is_running(&instance)
            .await
            .map_err(|e| e.during("delete", id))?
        {
            return Err(HypervisorError::InstanceRunning(id));
        }

        prompt.say(&format!(
            "You are about to delete the instance '{}'.",
            instance.full_name()
        ));
        prompt.say("This action cannot be undone.");
        let answer = prompt.ask(&format!(
            "Are you sure you want to delete this instance? Type '{}' to confirm: ",
            DELETE_CONFIRMATION
        ))?;
        if answer != DELETE_CONFIRMATION {
            warn!(vm_id = id, "Deletion not confirmed");
            return Err(HypervisorError::DeletionAborted);
        }

        backend
            .delete(&instance)
            .await
            .map_err(|e| e.during("delete", id))?;
        tokio::fs::remove_dir_all(&instance.dir).await.map_err(|e| {
            HypervisorError::io(format!("Failed to remove {}", instance.dir.display()), e)
                .during("delete", id)
        })?;

        info!(vm_id = id, dir = %instance.dir.display(), "VM deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_instances_without_adapter() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("4-legacy")).unwrap();
        let manager = VmManager::new(InstanceRegistry::new(temp.path()));

        let statuses = manager.list().await.unwrap();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].instance.backend, BackendType::Unknown);
        assert_eq!(statuses[0].state, InstanceState::Unknown);

        assert!(matches!(
            manager.start(4).await,
            Err(HypervisorError::UnsupportedBackend(BackendType::Unknown))
        ));
        assert!(matches!(
            manager.stop(9).await,
            Err(HypervisorError::InstanceNotFound(9))
        ));
    }
}
