use std::sync::Arc;

use dashmap::DashMap;
use forgeloop_eventbus::EventBus;
use forgeloop_schemas::store::WorkflowStore;
use forgeloop_workflow::{WorkflowHandle, WorkflowId, WorkflowRunner};

use crate::config::EngineConfig;

/// Shared application state, cloned into every route handler.
#[derive(Clone)]
pub struct AppState {
    pub runner: Arc<WorkflowRunner>,
    pub store: Arc<dyn WorkflowStore>,
    pub bus: EventBus,
    pub config: Arc<EngineConfig>,
    /// Repository name -> the active workflow handling it. A repository has
    /// at most one active (non-terminal) workflow at a time.
    by_repository: Arc<DashMap<String, WorkflowHandle>>,
    by_id: Arc<DashMap<WorkflowId, WorkflowHandle>>,
}

impl AppState {
    pub fn new(runner: Arc<WorkflowRunner>, store: Arc<dyn WorkflowStore>, bus: EventBus, config: EngineConfig) -> Self {
        Self {
            runner,
            store,
            bus,
            config: Arc::new(config),
            by_repository: Arc::new(DashMap::new()),
            by_id: Arc::new(DashMap::new()),
        }
    }

    pub fn workflow_for_repository(&self, repository: &str) -> Option<WorkflowHandle> {
        self.by_repository.get(repository).map(|h| h.clone())
    }

    pub fn workflow_by_id(&self, id: WorkflowId) -> Option<WorkflowHandle> {
        self.by_id.get(&id).map(|h| h.clone())
    }

    pub fn register(&self, repository: String, handle: WorkflowHandle) {
        self.by_id.insert(handle.workflow_id(), handle.clone());
        self.by_repository.insert(repository, handle);
    }

    /// Drops a repository's workflow entry once it has run to a terminal
    /// state, freeing the repository up for a new `start_workflow` call.
    pub fn forget_repository(&self, repository: &str) {
        self.by_repository.remove(repository);
    }
}
