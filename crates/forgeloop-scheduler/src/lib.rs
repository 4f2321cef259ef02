//! DAG step scheduling with layered concurrency and retries, plus the
//! Service Coordinator adapter registry (spec.md §4.4, §4.4.1).

mod coordinator;
mod dag;
mod error;
mod retry;
mod scheduler;

pub use coordinator::{HealthStatus, ServiceAdapter, ServiceCoordinator, StepExecuteOutcome};
pub use dag::layer_steps;
pub use error::{AdapterMissing, CycleError, StepExecutionError};
pub use retry::RetryPolicy;
pub use scheduler::{SchedulerOutcome, SkipPredicate, StepScheduler, DEFAULT_RETRY_DELAY_SECS};
