//! Workflow, WorkflowMetadata, and Transition — the durable shape of one
//! project's CI loop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique workflow identifier.
pub type WorkflowId = Uuid;

/// How many accumulated-context and error-context entries a workflow keeps.
///
/// Both lists are append-only during a run (spec: "Accumulated context is
/// append-only during a run"); this cap bounds memory for long-running
/// workflows that iterate many times.
pub const CONTEXT_CAP: usize = 50;

/// States of the CI loop state machine.
///
/// Initial state is [`WorkflowState::Idle`]; terminal states are
/// [`WorkflowState::Completed`], [`WorkflowState::Failed`], and
/// [`WorkflowState::Cancelled`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum WorkflowState {
    Idle,
    Planning,
    Coding,
    PrCreated,
    Validating,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowState {
    /// Terminal states never leave once entered.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkflowState::Completed | WorkflowState::Failed | WorkflowState::Cancelled
        )
    }
}

impl std::fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkflowState::Idle => "idle",
            WorkflowState::Planning => "planning",
            WorkflowState::Coding => "coding",
            WorkflowState::PrCreated => "pr_created",
            WorkflowState::Validating => "validating",
            WorkflowState::Completed => "completed",
            WorkflowState::Failed => "failed",
            WorkflowState::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// One recorded state-machine edge.
///
/// Immutable once appended to a workflow's history — the reducer never
/// rewrites or removes a `Transition`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Transition {
    pub from_state: WorkflowState,
    pub to_state: WorkflowState,
    pub timestamp: DateTime<Utc>,
    pub trigger: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl Transition {
    pub fn new(
        from_state: WorkflowState,
        to_state: WorkflowState,
        trigger: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            from_state,
            to_state,
            timestamp,
            trigger: trigger.into(),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Metadata accumulated as a workflow iterates through PLANNING/CODING/
/// VALIDATING cycles.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct WorkflowMetadata {
    pub initial_goal: String,
    pub planning_hint: Option<String>,

    pub current_iteration: u32,
    pub max_iterations: u32,

    pub current_agent_run_id: Option<String>,
    pub agent_run_history: Vec<String>,

    pub current_pr_number: Option<u64>,
    pub pr_history: Vec<u64>,

    pub accumulated_context: Vec<String>,
    pub error_context: Vec<String>,

    pub validation_attempts: u32,

    /// Whether a successful validation should merge the PR without asking a
    /// human. This is a property of the workflow's own configuration, not of
    /// the caller who triggered it (see Open Questions in DESIGN.md).
    pub auto_merge: bool,
    pub auto_confirm_plan: bool,
}

impl WorkflowMetadata {
    pub fn new(initial_goal: impl Into<String>, max_iterations: u32) -> Self {
        Self {
            initial_goal: initial_goal.into(),
            max_iterations,
            current_iteration: 1,
            ..Default::default()
        }
    }

    /// Append a summary, keeping the list within [`CONTEXT_CAP`].
    pub fn push_context(&mut self, summary: impl Into<String>) {
        self.accumulated_context.push(summary.into());
        if self.accumulated_context.len() > CONTEXT_CAP {
            let overflow = self.accumulated_context.len() - CONTEXT_CAP;
            self.accumulated_context.drain(0..overflow);
        }
    }

    /// Append an error summary, keeping the list within [`CONTEXT_CAP`].
    pub fn push_error_context(&mut self, summary: impl Into<String>) {
        self.error_context.push(summary.into());
        if self.error_context.len() > CONTEXT_CAP {
            let overflow = self.error_context.len() - CONTEXT_CAP;
            self.error_context.drain(0..overflow);
        }
    }
}

/// A workflow: the CI loop for one project.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Workflow {
    pub id: WorkflowId,
    pub project_id: Uuid,
    pub state: WorkflowState,
    pub metadata: WorkflowMetadata,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_activity_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,

    /// Retry attempts in the *current* state (resets on each transition).
    pub state_retry_count: u32,
    pub max_state_retries: u32,

    pub history: Vec<Transition>,

    pub final_result: Option<serde_json::Value>,
    pub final_error: Option<String>,
}

impl Workflow {
    pub fn new(project_id: Uuid, metadata: WorkflowMetadata, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            project_id,
            state: WorkflowState::Idle,
            metadata,
            created_at: now,
            started_at: None,
            last_activity_at: now,
            completed_at: None,
            state_retry_count: 0,
            max_state_retries: 3,
            history: Vec::new(),
            final_result: None,
            final_error: None,
        }
    }

    /// Invariant (spec.md §3): current_state is always consistent with the
    /// tail of the transition history.
    pub fn state_matches_history(&self) -> bool {
        match self.history.last() {
            Some(t) => t.to_state == self.state,
            None => self.state == WorkflowState::Idle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_workflow_starts_idle_with_consistent_history() {
        let now = Utc::now();
        let wf = Workflow::new(Uuid::now_v7(), WorkflowMetadata::new("goal", 5), now);
        assert_eq!(wf.state, WorkflowState::Idle);
        assert!(wf.state_matches_history());
        assert!(wf.history.is_empty());
    }

    #[test]
    fn context_push_caps_length() {
        let mut meta = WorkflowMetadata::new("goal", 5);
        for i in 0..(CONTEXT_CAP + 10) {
            meta.push_context(format!("summary {i}"));
        }
        assert_eq!(meta.accumulated_context.len(), CONTEXT_CAP);
        assert_eq!(meta.accumulated_context[0], format!("summary {}", 10));
    }

    #[test]
    fn terminal_states() {
        assert!(WorkflowState::Completed.is_terminal());
        assert!(WorkflowState::Failed.is_terminal());
        assert!(WorkflowState::Cancelled.is_terminal());
        assert!(!WorkflowState::Validating.is_terminal());
    }
}
