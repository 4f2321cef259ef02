//! The cross-cutting error taxonomy from spec.md §7.
//!
//! Each component owns its own concrete `thiserror` enum (`InvalidTransition`
//! lives in `forgeloop-workflow`, `CycleError`/`StepExecutionError` in
//! `forgeloop-scheduler`, and so on). `ErrorCategory` is the coarse tag
//! carried on user-visible `workflow.failed` / `validation.failed` events so
//! subscribers can group failures without depending on every component's
//! concrete error type.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum ErrorCategory {
    InvalidTransition,
    Cycle,
    StepExecution,
    Timeout,
    SandboxSetup,
    SourceClone,
    Command,
    AdapterMissing,
    SubscriberOverflow,
    IterationCapExceeded,
    Cancelled,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorCategory::InvalidTransition => "invalid_transition",
            ErrorCategory::Cycle => "cycle",
            ErrorCategory::StepExecution => "step_execution",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::SandboxSetup => "sandbox_setup",
            ErrorCategory::SourceClone => "source_clone",
            ErrorCategory::Command => "command",
            ErrorCategory::AdapterMissing => "adapter_missing",
            ErrorCategory::SubscriberOverflow => "subscriber_overflow",
            ErrorCategory::IterationCapExceeded => "iteration_cap",
            ErrorCategory::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}
