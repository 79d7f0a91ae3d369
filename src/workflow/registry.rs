//! Hot-reload workflow registry using ArcSwap.
//!
//! Lock-free, atomic updates to the in-memory map of stored workflow
//! definitions. Each change swaps the whole map pointer, so concurrent runs
//! keep reading their snapshot while an update lands. The registry is the
//! single in-memory source of truth consulted by the run initiators.

use crate::workflow::storage::WorkflowStore;
use crate::workflow::types::WorkflowDefinition;
use anyhow::Result;
use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::Arc;

pub struct WorkflowRegistry {
    workflows: ArcSwap<HashMap<String, Arc<WorkflowDefinition>>>,
    store: WorkflowStore,
}

impl WorkflowRegistry {
    pub fn new(store: WorkflowStore) -> Self {
        Self {
            workflows: ArcSwap::new(Arc::new(HashMap::new())),
            store,
        }
    }

    /// Populate the registry from storage. Called once at startup.
    pub async fn init_from_store(&self) -> Result<()> {
        let stored = self.store.load_all_workflows().await?;
        let map: HashMap<String, Arc<WorkflowDefinition>> = stored
            .into_iter()
            .map(|(id, def)| (id, Arc::new(def)))
            .collect();

        let count = map.len();
        self.workflows.store(Arc::new(map));
        tracing::info!("📥 workflow registry initialized with {} workflows", count);
        Ok(())
    }

    /// Reload one workflow from storage into the registry.
    pub async fn reload(&self, workflow_id: &str) -> Result<Arc<WorkflowDefinition>> {
        let def = self
            .store
            .get_workflow(workflow_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("workflow not found: {workflow_id}"))?;
        let def = Arc::new(def);

        let current = self.workflows.load();
        let mut next = (**current).clone();
        next.insert(workflow_id.to_string(), Arc::clone(&def));
        self.workflows.store(Arc::new(next));

        tracing::info!("🔥 hot-reloaded workflow '{}'", workflow_id);
        Ok(def)
    }

    /// Lock-free lookup; the clone only bumps a reference count.
    pub fn get(&self, workflow_id: &str) -> Option<Arc<WorkflowDefinition>> {
        self.workflows.load().get(workflow_id).cloned()
    }

    pub fn all(&self) -> Vec<Arc<WorkflowDefinition>> {
        self.workflows.load().values().cloned().collect()
    }

    pub fn ids(&self) -> Vec<String> {
        self.workflows.load().keys().cloned().collect()
    }

    pub fn remove(&self, workflow_id: &str) {
        let current = self.workflows.load();
        if !current.contains_key(workflow_id) {
            return;
        }
        let mut next = (**current).clone();
        next.remove(workflow_id);
        self.workflows.store(Arc::new(next));
        tracing::info!("🗑️ removed workflow '{}' from registry", workflow_id);
    }
}
