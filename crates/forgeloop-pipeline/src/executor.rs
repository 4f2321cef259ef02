use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use forgeloop_eventbus::{Event, EventBus};
use forgeloop_schemas::step::{PipelineExecution, PipelineOutcome, StepOutcome, StepResult};
use forgeloop_scheduler::{ServiceCoordinator, StepScheduler};
use serde_json::{json, Value};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::step_type::{ValidationPlan, ValidationStepSpec};

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_PIPELINE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Runs a [`ValidationPlan`] against a [`ServiceCoordinator`], publishing
/// `validation.*` events on an [`EventBus`] as it goes.
///
/// Each step's own retry is delegated to `forgeloop-scheduler`: every step
/// is dispatched as a single-node DAG run so the executor can still publish
/// a `step_started`/`step_completed` pair around it (spec.md §4.3).
pub struct PipelineExecutor {
    bus: EventBus,
    scheduler: StepScheduler,
    max_retries: u32,
    timeout: Duration,
}

impl PipelineExecutor {
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            scheduler: StepScheduler::new(1),
            max_retries: DEFAULT_MAX_RETRIES,
            timeout: DEFAULT_PIPELINE_TIMEOUT,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[instrument(skip_all, fields(workflow_id = %workflow_id))]
    pub async fn run(
        &self,
        workflow_id: Uuid,
        plan: &ValidationPlan,
        coordinator: &ServiceCoordinator,
        context: Value,
    ) -> PipelineExecution {
        self.run_attempt(workflow_id, plan, coordinator, context, 0)
            .await
    }

    /// Re-runs `plan` reusing `execution.id` and bumping `retry_count`, up
    /// to `max_retries` (spec.md §4.3: "A retried pipeline reuses its id and
    /// increments `retry_count`").
    pub async fn retry(
        &self,
        mut execution: PipelineExecution,
        plan: &ValidationPlan,
        coordinator: &ServiceCoordinator,
        context: Value,
    ) -> PipelineExecution {
        if execution.retry_count >= self.max_retries {
            warn!(pipeline_id = %execution.id, "max pipeline retries exhausted");
            return execution;
        }
        execution.retry_count += 1;
        let retry_count = execution.retry_count;
        let mut retried = self
            .run_attempt(execution.workflow_id, plan, coordinator, context, retry_count)
            .await;
        retried.id = execution.id;
        retried.retry_count = retry_count;
        retried
    }

    async fn run_attempt(
        &self,
        workflow_id: Uuid,
        plan: &ValidationPlan,
        coordinator: &ServiceCoordinator,
        context: Value,
        retry_count: u32,
    ) -> PipelineExecution {
        let mut execution = PipelineExecution::new(workflow_id);
        execution.retry_count = retry_count;
        let state = Arc::new(AsyncMutex::new(execution));

        self.bus.publish(Event::new(
            "validation.started",
            "pipeline",
            workflow_id,
            json!({ "pipeline_id": state.lock().await.id }),
        ));

        let run = self.drive(workflow_id, state.clone(), plan, coordinator, context);
        match tokio::time::timeout(self.timeout, run).await {
            Ok(()) => {}
            Err(_elapsed) => {
                let mut guard = state.lock().await;
                if guard.outcome.is_none() {
                    guard.outcome = Some(PipelineOutcome::Failure);
                }
                warn!(pipeline_id = %guard.id, "pipeline timed out");
            }
        }

        let execution = Arc::try_unwrap(state)
            .unwrap_or_else(|_| panic!("pipeline drive future should have dropped its Arc clone"))
            .into_inner();

        self.bus.publish(Event::new(
            "validation.completed",
            "pipeline",
            workflow_id,
            json!({
                "pipeline_id": execution.id,
                "outcome": execution.outcome,
            }),
        ));
        info!(pipeline_id = %execution.id, outcome = ?execution.outcome, "pipeline finished");
        execution
    }

    async fn drive(
        &self,
        workflow_id: Uuid,
        state: Arc<AsyncMutex<PipelineExecution>>,
        plan: &ValidationPlan,
        coordinator: &ServiceCoordinator,
        context: Value,
    ) {
        let required_total = plan.required_step_count().max(1);
        let (main_steps, cleanup_steps): (Vec<_>, Vec<_>) = plan
            .steps
            .iter()
            .partition(|s| !s.step_type.is_cleanup());

        let mut aborted_by_required_failure = false;
        let mut any_optional_failed = false;
        let mut running_context = context;

        for step in &main_steps {
            let result = self
                .run_step(workflow_id, step, coordinator, &running_context)
                .await;
            let failed = result.outcome == StepOutcome::Failed;
            if let Some(payload) = result.payload.clone() {
                if let Some(map) = running_context.as_object_mut() {
                    map.insert(format!("{}_result", step.name), payload);
                }
            }
            {
                let mut guard = state.lock().await;
                guard.current_step = Some(step.name.clone());
                guard.steps.insert(step.name.clone(), result.clone());
                let completed = guard
                    .steps
                    .values()
                    .filter(|r| r.outcome == StepOutcome::Completed)
                    .count();
                guard.progress_percent = ((completed * 100) / required_total).min(100) as u8;
            }

            if failed {
                if step.optional {
                    any_optional_failed = true;
                } else {
                    aborted_by_required_failure = true;
                    break;
                }
            }
        }

        // Cleanup always runs, regardless of prior failures (guaranteed-release).
        for step in &cleanup_steps {
            let result = self
                .run_step(workflow_id, step, coordinator, &running_context)
                .await;
            let failed = result.outcome == StepOutcome::Failed && !step.optional;
            let mut guard = state.lock().await;
            guard.steps.insert(step.name.clone(), result);
            if failed {
                aborted_by_required_failure = true;
            }
        }

        let mut guard = state.lock().await;
        guard.current_step = None;
        guard.outcome = Some(if aborted_by_required_failure {
            PipelineOutcome::Failure
        } else if any_optional_failed {
            PipelineOutcome::Warning
        } else {
            PipelineOutcome::Success
        });
    }

    async fn run_step(
        &self,
        workflow_id: Uuid,
        step: &ValidationStepSpec,
        coordinator: &ServiceCoordinator,
        context: &Value,
    ) -> StepResult {
        self.bus.publish(Event::new(
            "validation.step_started",
            "pipeline",
            workflow_id,
            json!({ "step": step.name, "step_type": step.step_type }),
        ));

        let step_def = forgeloop_schemas::step::StepDefinition {
            id: step.name.clone(),
            name: step.name.clone(),
            service: step.step_type.service_tag().to_string(),
            action: step.name.clone(),
            params: step.config.clone(),
            depends_on: Vec::new(),
            timeout: step.timeout,
            retries: step.retries,
            optional: step.optional,
        };

        let outcome = self
            .scheduler
            .run(&[step_def], context.clone(), coordinator, None)
            .await;

        let result = match outcome {
            Ok(outcome) => outcome
                .results
                .into_values()
                .next()
                .unwrap_or_else(|| StepResult::pending(step.name.clone())),
            Err(cycle) => {
                let mut result = StepResult::pending(step.name.clone());
                result.outcome = StepOutcome::Failed;
                result.error = Some(cycle.to_string());
                result
            }
        };

        self.bus.publish(Event::new(
            "validation.step_completed",
            "pipeline",
            workflow_id,
            json!({ "step": step.name, "outcome": result.outcome }),
        ));

        result
    }
}
