use std::sync::Arc;

use chrono::Utc;
use forgeloop_eventbus::EventBus;
use forgeloop_schemas::store::{StoreError, WorkflowStore};
use forgeloop_schemas::workflow::{Workflow, WorkflowId};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{instrument, warn};

use crate::action::WorkflowAction;
use crate::error::InvalidTransition;
use crate::reducer;
use crate::requirements::RequirementsCheck;
use crate::trigger::Trigger;

/// Inbox depth for one workflow's single writer task. Bounded so a burst of
/// webhooks backpressures the sender rather than growing unbounded memory.
const INBOX_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("workflow runner has shut down")]
    Closed,
}

type Reply = oneshot::Sender<Result<Vec<WorkflowAction>, RunnerError>>;

/// A cheap, cloneable handle to a running workflow's single writer task.
///
/// Every [`Trigger`] sent through a handle is applied to the workflow's
/// in-memory state by exactly one task, in the order it was sent (spec.md
/// §9: "exactly one writer is ever active for a given workflow").
#[derive(Clone)]
pub struct WorkflowHandle {
    workflow_id: WorkflowId,
    inbox: mpsc::Sender<(Trigger, Reply)>,
}

impl WorkflowHandle {
    pub fn workflow_id(&self) -> WorkflowId {
        self.workflow_id
    }

    /// Applies `trigger` to the workflow and returns the actions the caller
    /// should perform (running an agent, scheduling a validation, etc).
    pub async fn send(&self, trigger: Trigger) -> Result<Vec<WorkflowAction>, RunnerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.inbox
            .send((trigger, reply_tx))
            .await
            .map_err(|_| RunnerError::Closed)?;
        reply_rx.await.map_err(|_| RunnerError::Closed)?
    }
}

/// Owns the single-writer task for every workflow it has started, persisting
/// to a [`WorkflowStore`] and publishing `workflow.state_changed` events to
/// an [`EventBus`] after each transition (spec.md §4.5, §9).
pub struct WorkflowRunner {
    store: Arc<dyn WorkflowStore>,
    bus: EventBus,
    requirements: Option<Arc<RequirementsCheck>>,
}

impl WorkflowRunner {
    pub fn new(store: Arc<dyn WorkflowStore>, bus: EventBus) -> Self {
        Self {
            store,
            bus,
            requirements: None,
        }
    }

    pub fn with_requirements_check(mut self, check: RequirementsCheck) -> Self {
        self.requirements = Some(Arc::new(check));
        self
    }

    /// Spawns the writer task for an already-persisted `workflow` and
    /// returns a handle to it.
    #[instrument(skip(self, workflow), fields(workflow_id = %workflow.id))]
    pub fn spawn(&self, workflow: Workflow) -> WorkflowHandle {
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        let handle = WorkflowHandle {
            workflow_id: workflow.id,
            inbox: tx,
        };

        let store = self.store.clone();
        let bus = self.bus.clone();
        let requirements = self.requirements.clone();
        tokio::spawn(async move {
            run_writer_loop(workflow, rx, store, bus, requirements).await;
        });

        handle
    }

    /// Loads a previously-persisted workflow from the store and spawns its
    /// writer task.
    pub async fn resume(&self, id: WorkflowId) -> Result<WorkflowHandle, RunnerError> {
        let workflow = self.store.get(id).await?;
        Ok(self.spawn(workflow))
    }
}

async fn run_writer_loop(
    mut workflow: Workflow,
    mut rx: mpsc::Receiver<(Trigger, Reply)>,
    store: Arc<dyn WorkflowStore>,
    bus: EventBus,
    requirements: Option<Arc<RequirementsCheck>>,
) {
    while let Some((trigger, reply)) = rx.recv().await {
        let now = Utc::now();
        let check = requirements.as_deref();
        let outcome = reducer::reduce(&mut workflow, trigger, now, check);

        let reply_result = match &outcome {
            Ok(actions) => {
                if let Err(err) = store.put(workflow.clone()).await {
                    warn!(workflow_id = %workflow.id, error = %err, "failed to persist workflow after transition");
                }
                for action in actions {
                    if let WorkflowAction::Publish(event) = action {
                        bus.publish(event.clone());
                    }
                }
                Ok(actions.clone())
            }
            Err(err) => Err(RunnerError::InvalidTransition(err.clone())),
        };

        if reply.send(reply_result).is_err() {
            warn!(workflow_id = %workflow.id, "caller dropped the reply channel for a workflow trigger");
        }

        if workflow.state.is_terminal() {
            break;
        }
    }
}

/// Schedules `trigger` to be re-sent to `handle` after `delay` (typically
/// the delay carried by a [`WorkflowAction::RetryAfterDelay`]). Spawned
/// by the caller in response to that action; the runner itself never sleeps
/// inline inside the writer loop so a single slow retry cannot stall other
/// triggers queued behind it.
pub fn schedule_retry(handle: WorkflowHandle, trigger: Trigger, delay: std::time::Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if let Err(err) = handle.send(trigger).await {
            warn!(workflow_id = %handle.workflow_id(), error = %err, "retry delivery failed");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use forgeloop_schemas::workflow::{WorkflowMetadata, WorkflowState};
    use forgeloop_schemas::store::InMemoryWorkflowStore;
    use serde_json::json;
    use uuid::Uuid;

    fn new_runner() -> (WorkflowRunner, Arc<InMemoryWorkflowStore>) {
        let store = Arc::new(InMemoryWorkflowStore::new());
        let bus = EventBus::new();
        (WorkflowRunner::new(store.clone(), bus), store)
    }

    #[tokio::test]
    async fn start_trigger_moves_workflow_to_planning_and_persists() {
        let (runner, store) = new_runner();
        let workflow = Workflow::new(Uuid::now_v7(), WorkflowMetadata::new("ship it", 3), Utc::now());
        let id = workflow.id;
        let handle = runner.spawn(workflow);

        let actions = handle
            .send(Trigger::Start { project_configured: true })
            .await
            .unwrap();
        assert!(!actions.is_empty());

        let persisted = store.get(id).await.unwrap();
        assert_eq!(persisted.state, WorkflowState::Planning);
    }

    #[tokio::test]
    async fn invalid_trigger_is_reported_without_persisting_a_transition() {
        let (runner, store) = new_runner();
        let workflow = Workflow::new(Uuid::now_v7(), WorkflowMetadata::new("ship it", 3), Utc::now());
        let id = workflow.id;
        let handle = runner.spawn(workflow);

        let err = handle
            .send(Trigger::PlanReady { confirmed: true })
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::InvalidTransition(_)));

        assert!(store.get(id).await.is_err());
    }

    #[tokio::test]
    async fn writer_loop_exits_after_reaching_a_terminal_state() {
        let (runner, _store) = new_runner();
        let workflow = Workflow::new(Uuid::now_v7(), WorkflowMetadata::new("ship it", 3), Utc::now());
        let handle = runner.spawn(workflow);

        handle.send(Trigger::Cancel).await.unwrap();

        let err = handle
            .send(Trigger::Cancel)
            .await
            .expect_err("writer task should have exited after the terminal transition");
        assert!(matches!(err, RunnerError::Closed));
    }

    #[tokio::test]
    async fn full_loop_reaches_completed_and_publishes_state_changes() {
        let (runner, store) = new_runner();
        let workflow = Workflow::new(Uuid::now_v7(), WorkflowMetadata::new("ship it", 3), Utc::now());
        let handle = runner.spawn(workflow.clone());

        handle.send(Trigger::Start { project_configured: true }).await.unwrap();
        handle.send(Trigger::PlanReady { confirmed: true }).await.unwrap();
        handle.send(Trigger::PrOpened { pr_number: 1 }).await.unwrap();
        handle
            .send(Trigger::PrWebhookReceived { pr_number: 1 })
            .await
            .unwrap();
        handle
            .send(Trigger::ValidationOutcome {
                outcome: forgeloop_schemas::step::PipelineOutcome::Success,
                requirements_context: json!({
                    "pr_merged": true, "tests_passing": true,
                    "validation_passed": true, "deployment_successful": true
                }),
            })
            .await
            .unwrap();

        let persisted = store.get(workflow.id).await.unwrap();
        assert_eq!(persisted.state, WorkflowState::Completed);
    }
}
