use std::time::Duration;

use forgeloop_eventbus::Event;
use forgeloop_schemas::workflow::WorkflowState;

/// Side effects the reducer asks the owning runner to perform. The reducer
/// itself never calls an agent, a sandbox, or the bus directly — it only
/// describes what should happen, in the style of the teacher's
/// `WorkflowAction` (`durable/src/workflow/action.rs`).
#[derive(Debug, Clone)]
pub enum WorkflowAction {
    Publish(Event),

    /// Re-deliver the failing trigger to this same state after `delay`
    /// (spec.md §4.5: "fixed 60s delay").
    RetryAfterDelay {
        state: WorkflowState,
        delay: Duration,
    },

    RunPlanning {
        goal: String,
        hint: Option<String>,
        /// Accumulated context from prior iterations, oldest first.
        context: Vec<String>,
        /// Tail of error context from the last failed validation, if any.
        error_context: Vec<String>,
    },

    RunCoding {
        iteration: u32,
    },

    AwaitPrWebhook {
        pr_number: u64,
    },

    RunValidation {
        pr_number: u64,
    },
}
