//! Shared data contracts for forgeloop
//!
//! This crate has no behavior of its own — it is the source of truth for the
//! types every other forgeloop crate passes across its boundaries: workflows,
//! steps, sandboxes, and events. Keeping it dependency-light (serde, uuid,
//! chrono) means any crate can depend on it without pulling in tokio runtimes
//! or HTTP stacks it doesn't need.

pub mod error;
pub mod event;
pub mod sandbox;
pub mod step;
pub mod store;
pub mod workflow;

pub use error::ErrorCategory;
pub use event::Event;
pub use sandbox::{SandboxId, SandboxState};
pub use step::{PipelineExecution, PipelineOutcome, StepDefinition, StepOutcome, StepResult};
pub use store::{InMemoryWorkflowStore, StoreError, WorkflowStore};
pub use workflow::{Transition, Workflow, WorkflowId, WorkflowMetadata, WorkflowState};
