/// Hot-reload workflow registry using ArcSwap
///
/// Keeps validated definitions in memory so trigger matching and step lookup
/// never hit the database. Each update swaps the whole map pointer, so readers
/// in running executions are never blocked.

use crate::{
    error::EngineError,
    workflow::{
        storage::WorkflowStorage,
        types::{TriggerEvent, WorkflowDefinition},
    },
};
use arc_swap::ArcSwap;
use std::{collections::HashMap, sync::Arc};
use uuid::Uuid;

/// Lock-free registry of workflow definitions
#[derive(Debug)]
pub struct WorkflowRegistry {
    /// Key: workflow id. Inactive definitions are kept so in-flight executions
    /// can still resolve their steps.
    workflows: ArcSwap<HashMap<Uuid, Arc<WorkflowDefinition>>>,

    /// Reference to persistent storage for reload operations
    storage: WorkflowStorage,
}

impl WorkflowRegistry {
    pub fn new(storage: WorkflowStorage) -> Self {
        Self {
            workflows: ArcSwap::new(Arc::new(HashMap::new())),
            storage,
        }
    }

    /// Populate the registry from storage (startup)
    pub async fn init_from_storage(&self) -> Result<(), EngineError> {
        let stored = self.storage.load_all_workflows().await?;
        let map: HashMap<Uuid, Arc<WorkflowDefinition>> = stored
            .into_iter()
            .map(|workflow| (workflow.id, Arc::new(workflow)))
            .collect();

        self.workflows.store(Arc::new(map));

        tracing::info!(
            "Initialized workflow registry with {} workflows",
            self.workflows.load().len()
        );
        Ok(())
    }

    /// Persist a definition and hot-load it
    pub async fn publish(&self, workflow: WorkflowDefinition) -> Result<Arc<WorkflowDefinition>, EngineError> {
        self.storage.save_workflow(&workflow).await?;
        let workflow = Arc::new(workflow);
        self.swap_in(Arc::clone(&workflow));
        tracing::info!("🔥 Published workflow: {} ({})", workflow.name, workflow.id);
        Ok(workflow)
    }

    /// Re-read a single workflow from storage
    pub async fn reload_workflow(&self, workflow_id: Uuid) -> Result<(), EngineError> {
        let workflow = self
            .storage
            .get_workflow(workflow_id)
            .await?
            .ok_or(EngineError::WorkflowNotFound(workflow_id))?;

        self.swap_in(Arc::new(workflow));
        tracing::info!("Hot-reloaded workflow: {}", workflow_id);
        Ok(())
    }

    /// Get a workflow by ID (lock-free read)
    pub fn get_workflow(&self, workflow_id: Uuid) -> Option<Arc<WorkflowDefinition>> {
        self.workflows.load().get(&workflow_id).cloned()
    }

    /// Registry first, storage as fallback (e.g. definition saved by another process)
    pub async fn resolve(&self, workflow_id: Uuid) -> Result<Arc<WorkflowDefinition>, EngineError> {
        if let Some(workflow) = self.get_workflow(workflow_id) {
            return Ok(workflow);
        }

        tracing::debug!("Workflow {} not cached, loading from storage", workflow_id);
        self.reload_workflow(workflow_id).await?;
        self.get_workflow(workflow_id)
            .ok_or(EngineError::WorkflowNotFound(workflow_id))
    }

    /// Active workflows whose trigger matches the event
    pub fn matching(&self, event: &TriggerEvent) -> Vec<Arc<WorkflowDefinition>> {
        let mut matched: Vec<Arc<WorkflowDefinition>> = self
            .workflows
            .load()
            .values()
            .filter(|w| w.active && w.trigger.matches(event))
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.name.cmp(&b.name));
        matched
    }

    pub fn list_workflow_ids(&self) -> Vec<Uuid> {
        self.workflows.load().keys().copied().collect()
    }

    /// Remove a workflow from the registry (storage is untouched)
    pub fn remove_workflow(&self, workflow_id: Uuid) {
        let current = self.workflows.load();
        let mut next = (**current).clone();

        if next.remove(&workflow_id).is_some() {
            self.workflows.store(Arc::new(next));
            tracing::info!("Removed workflow from registry: {}", workflow_id);
        }
    }

    fn swap_in(&self, workflow: Arc<WorkflowDefinition>) {
        self.workflows.rcu(|current| {
            let mut next = (**current).clone();
            next.insert(workflow.id, Arc::clone(&workflow));
            next
        });
    }
}
