use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use forgeloop_schemas::step::{StepDefinition, StepOutcome, StepResult};
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{debug, instrument, warn};

use crate::coordinator::{ServiceCoordinator, StepExecuteOutcome};
use crate::dag::layer_steps;
use crate::error::{CycleError, StepExecutionError};
use crate::retry::RetryPolicy;

pub type SkipPredicate<'a> = dyn Fn(&StepDefinition) -> bool + Send + Sync + 'a;

/// Default fixed retry delay (spec.md §4.4): "a short fixed delay (default 2s)".
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 2;

#[derive(Debug)]
pub struct SchedulerOutcome {
    pub results: HashMap<String, StepResult>,
    /// Set when a non-optional step exhausted retries; the workflow is
    /// considered aborted in this case even though `results` is populated
    /// for every step that did run.
    pub error: Option<StepExecutionError>,
}

impl SchedulerOutcome {
    pub fn aborted(&self) -> bool {
        self.error.is_some()
    }
}

/// Executes a DAG of [`StepDefinition`]s layer by layer, dispatching each
/// step through a [`ServiceCoordinator`].
pub struct StepScheduler {
    parallelism: usize,
}

impl StepScheduler {
    pub fn new(parallelism: usize) -> Self {
        Self {
            parallelism: parallelism.max(1),
        }
    }

    #[instrument(skip_all, fields(step_count = steps.len()))]
    pub async fn run(
        &self,
        steps: &[StepDefinition],
        initial_context: Value,
        coordinator: &ServiceCoordinator,
        skip: Option<&SkipPredicate<'_>>,
    ) -> Result<SchedulerOutcome, CycleError> {
        let layers = layer_steps(steps)?;
        let by_id: HashMap<&str, &StepDefinition> =
            steps.iter().map(|s| (s.id.as_str(), s)).collect();

        let mut results: HashMap<String, StepResult> = HashMap::new();
        let mut outcome_error: Option<StepExecutionError> = None;
        let semaphore = Arc::new(Semaphore::new(self.parallelism));

        'layers: for layer in layers {
            if outcome_error.is_some() {
                break;
            }

            let mut futures = Vec::with_capacity(layer.len());
            for step_id in &layer {
                let step = by_id[step_id.as_str()];
                let context = build_step_context(&initial_context, step, &results);
                let semaphore = semaphore.clone();
                futures.push(async move {
                    let _permit = semaphore.acquire().await.expect("semaphore not closed");
                    if let Some(skip) = skip {
                        if skip(step) {
                            debug!(step_id = %step.id, "step skipped");
                            return skipped_result(step);
                        }
                    }
                    execute_with_retry(step, &context, coordinator).await
                });
            }

            let layer_results = futures::future::join_all(futures).await;
            for result in layer_results {
                let step_id = result.step_id.clone();
                let step = by_id[step_id.as_str()];
                if result.outcome == StepOutcome::Failed && !step.optional {
                    outcome_error = Some(StepExecutionError::Exhausted {
                        step_id: step_id.clone(),
                        message: result.error.clone().unwrap_or_default(),
                    });
                    results.insert(step_id, result);
                    break 'layers;
                }
                results.insert(step_id, result);
            }
        }

        Ok(SchedulerOutcome {
            results,
            error: outcome_error,
        })
    }
}

fn build_step_context(
    base: &Value,
    step: &StepDefinition,
    results: &HashMap<String, StepResult>,
) -> Value {
    let mut context = base.clone();
    let map = context.as_object_mut().expect("context must be an object");
    for dep in &step.depends_on {
        if let Some(result) = results.get(dep) {
            if result.closes_dependency() {
                if let Some(payload) = &result.payload {
                    map.insert(format!("{dep}_result"), payload.clone());
                }
            }
        }
    }
    context
}

fn skipped_result(step: &StepDefinition) -> StepResult {
    let mut result = StepResult::pending(step.id.clone());
    result.outcome = StepOutcome::Skipped;
    result.started_at = Some(Utc::now());
    result.ended_at = result.started_at;
    result
}

async fn execute_with_retry(
    step: &StepDefinition,
    context: &Value,
    coordinator: &ServiceCoordinator,
) -> StepResult {
    let retry_policy = RetryPolicy::fixed(
        std::time::Duration::from_secs(DEFAULT_RETRY_DELAY_SECS),
        step.retries + 1,
    );

    let started_at = Utc::now();
    let mut attempt = 1;
    loop {
        match coordinator.execute_step(step, context).await {
            Ok(payload) => {
                return StepResult {
                    step_id: step.id.clone(),
                    outcome: StepOutcome::Completed,
                    payload: Some(payload),
                    error: None,
                    started_at: Some(started_at),
                    ended_at: Some(Utc::now()),
                    elapsed_seconds: (Utc::now() - started_at).num_milliseconds() as f64 / 1000.0,
                };
            }
            Err(outcome) => {
                let message = describe_failure(&outcome);
                if !retry_policy.has_attempts_remaining(attempt) {
                    warn!(step_id = %step.id, attempt, %message, "step exhausted retries");
                    return StepResult {
                        step_id: step.id.clone(),
                        outcome: StepOutcome::Failed,
                        payload: None,
                        error: Some(message),
                        started_at: Some(started_at),
                        ended_at: Some(Utc::now()),
                        elapsed_seconds: (Utc::now() - started_at).num_milliseconds() as f64
                            / 1000.0,
                    };
                }
                attempt += 1;
                tokio::time::sleep(retry_policy.delay_for_attempt(attempt)).await;
            }
        }
    }
}

fn describe_failure(outcome: &StepExecuteOutcome) -> String {
    match outcome {
        StepExecuteOutcome::Missing(err) => err.to_string(),
        StepExecuteOutcome::Failed(message) => message.clone(),
        StepExecuteOutcome::Timeout => "step timed out".to_string(),
    }
}
