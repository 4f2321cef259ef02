//! Validation Pipeline Executor (spec.md §4.3): runs an ordered validation
//! plan in a sandbox, publishing progress on the event bus.

mod executor;
mod step_type;

pub use executor::{PipelineExecutor, DEFAULT_MAX_RETRIES, DEFAULT_PIPELINE_TIMEOUT};
pub use step_type::{ValidationPlan, ValidationStepSpec, ValidationStepType};
