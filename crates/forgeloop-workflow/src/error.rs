use forgeloop_schemas::workflow::WorkflowState;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid transition {from} -> {to} on trigger {trigger:?}: {reason}")]
pub struct InvalidTransition {
    pub from: WorkflowState,
    pub to: WorkflowState,
    pub trigger: &'static str,
    pub reason: &'static str,
}
