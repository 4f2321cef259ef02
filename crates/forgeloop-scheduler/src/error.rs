use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("dependency cycle detected among steps: {step_ids:?}")]
pub struct CycleError {
    pub step_ids: Vec<String>,
}

#[derive(Debug, Error)]
pub enum StepExecutionError {
    #[error("step {step_id} failed and exhausted its retries: {message}")]
    Exhausted { step_id: String, message: String },

    #[error("step {step_id} timed out after {elapsed_secs:.1}s")]
    Timeout { step_id: String, elapsed_secs: f64 },

    #[error(transparent)]
    Cycle(#[from] CycleError),

    #[error(transparent)]
    AdapterMissing(#[from] AdapterMissing),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("no adapter registered for service tag {0:?}")]
pub struct AdapterMissing(pub String);
