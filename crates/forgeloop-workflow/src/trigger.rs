use forgeloop_schemas::step::PipelineOutcome;
use serde_json::Value;

/// An external event bound to a workflow transition (spec.md §4.5).
#[derive(Debug, Clone)]
pub enum Trigger {
    /// IDLE -> PLANNING. `project_configured` and a non-empty
    /// `metadata.initial_goal` are both required.
    Start { project_configured: bool },

    /// PLANNING -> CODING. Allowed when `confirmed` or the workflow's own
    /// `auto_confirm_plan` flag is set.
    PlanReady { confirmed: bool },

    /// PLANNING -> FAILED once retries are exhausted; otherwise retried
    /// in place.
    PlanningFailed,

    /// CODING -> PR_CREATED.
    PrOpened { pr_number: u64 },

    /// CODING -> FAILED once retries are exhausted; otherwise retried
    /// in place.
    CodingFailed,

    /// PR_CREATED -> VALIDATING, gated on the webhook's PR number matching
    /// `metadata.current_pr_number`.
    PrWebhookReceived { pr_number: u64 },

    /// VALIDATING -> COMPLETED | PLANNING | FAILED, depending on pipeline
    /// outcome, the requirements-completion predicate, and the iteration cap.
    ValidationOutcome {
        outcome: PipelineOutcome,
        requirements_context: Value,
    },

    /// Any non-terminal state -> CANCELLED.
    Cancel,
}

impl Trigger {
    pub(crate) fn label(&self) -> &'static str {
        match self {
            Trigger::Start { .. } => "start",
            Trigger::PlanReady { .. } => "plan_ready",
            Trigger::PlanningFailed => "planning_failed",
            Trigger::PrOpened { .. } => "pr_opened",
            Trigger::CodingFailed => "coding_failed",
            Trigger::PrWebhookReceived { .. } => "pr_webhook_received",
            Trigger::ValidationOutcome { .. } => "validation_outcome",
            Trigger::Cancel => "cancel",
        }
    }
}
