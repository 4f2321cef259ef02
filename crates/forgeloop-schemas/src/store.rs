//! `WorkflowStore` — the repository interface the core speaks to instead of
//! assuming a concrete database (Design Note, spec.md §9: "the core must
//! speak only to a repository interface (get, put, list_by_workflow) and
//! must not assume synchronous success").
//!
//! Modeled on the teacher's `WorkflowEventStore` trait shape: async-trait,
//! `Result<_, StoreError>`, `Send + Sync + 'static`. Unlike the teacher's
//! event-sourced store, this one persists the materialized `Workflow`
//! directly — the spec's state machine is a concrete reducer, not a
//! replay-from-event-log engine.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::workflow::{Workflow, WorkflowId};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("workflow not found: {0}")]
    NotFound(WorkflowId),

    #[error("backend error: {0}")]
    Backend(String),
}

/// Persistence collaborator for workflows.
///
/// Implementations must be thread-safe; the core never assumes a `put`
/// succeeds synchronously and always propagates [`StoreError`].
#[async_trait]
pub trait WorkflowStore: Send + Sync + 'static {
    async fn get(&self, id: WorkflowId) -> Result<Workflow, StoreError>;
    async fn put(&self, workflow: Workflow) -> Result<(), StoreError>;
    async fn list_by_project(&self, project_id: Uuid) -> Result<Vec<Workflow>, StoreError>;
    async fn delete(&self, id: WorkflowId) -> Result<(), StoreError>;
}

/// In-memory `WorkflowStore`, the default backend for tests and the demo
/// binary (mirrors the teacher's `InMemoryWorkflowEventStore`).
#[derive(Debug, Default, Clone)]
pub struct InMemoryWorkflowStore {
    workflows: Arc<RwLock<HashMap<WorkflowId, Workflow>>>,
}

impl InMemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn get(&self, id: WorkflowId) -> Result<Workflow, StoreError> {
        self.workflows
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn put(&self, workflow: Workflow) -> Result<(), StoreError> {
        self.workflows.write().await.insert(workflow.id, workflow);
        Ok(())
    }

    async fn list_by_project(&self, project_id: Uuid) -> Result<Vec<Workflow>, StoreError> {
        Ok(self
            .workflows
            .read()
            .await
            .values()
            .filter(|w| w.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn delete(&self, id: WorkflowId) -> Result<(), StoreError> {
        self.workflows.write().await.remove(&id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::WorkflowMetadata;
    use chrono::Utc;

    #[tokio::test]
    async fn put_then_get_roundtrips() {
        let store = InMemoryWorkflowStore::new();
        let project_id = Uuid::now_v7();
        let workflow = Workflow::new(project_id, WorkflowMetadata::new("goal", 3), Utc::now());
        let id = workflow.id;

        store.put(workflow.clone()).await.unwrap();
        let fetched = store.get(id).await.unwrap();
        assert_eq!(fetched.id, id);
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let store = InMemoryWorkflowStore::new();
        let err = store.get(Uuid::now_v7()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn list_by_project_filters() {
        let store = InMemoryWorkflowStore::new();
        let project_a = Uuid::now_v7();
        let project_b = Uuid::now_v7();
        store
            .put(Workflow::new(project_a, WorkflowMetadata::new("g", 1), Utc::now()))
            .await
            .unwrap();
        store
            .put(Workflow::new(project_b, WorkflowMetadata::new("g", 1), Utc::now()))
            .await
            .unwrap();

        let listed = store.list_by_project(project_a).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].project_id, project_a);
    }

    #[tokio::test]
    async fn delete_removes_workflow() {
        let store = InMemoryWorkflowStore::new();
        let workflow = Workflow::new(Uuid::now_v7(), WorkflowMetadata::new("g", 1), Utc::now());
        let id = workflow.id;
        store.put(workflow).await.unwrap();
        store.delete(id).await.unwrap();
        assert!(matches!(store.get(id).await, Err(StoreError::NotFound(_))));
    }
}
