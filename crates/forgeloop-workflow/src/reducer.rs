use std::time::Duration;

use chrono::{DateTime, Utc};
use forgeloop_eventbus::Event;
use forgeloop_schemas::step::PipelineOutcome;
use forgeloop_schemas::workflow::{Transition, Workflow, WorkflowState};
use serde_json::json;
use tracing::instrument;

use crate::action::WorkflowAction;
use crate::error::InvalidTransition;
use crate::requirements::{default_requirements_heuristic, RequirementsCheck};
use crate::trigger::Trigger;

/// Fixed delay before a same-state retry is redelivered (spec.md §4.5).
pub const STATE_RETRY_DELAY: Duration = Duration::from_secs(60);

fn invalid(from: WorkflowState, to: WorkflowState, trigger: &Trigger, reason: &'static str) -> InvalidTransition {
    InvalidTransition {
        from,
        to,
        trigger: trigger.label(),
        reason,
    }
}

fn state_changed_event(workflow: &Workflow, from: WorkflowState, to: WorkflowState) -> WorkflowAction {
    WorkflowAction::Publish(Event::new(
        "workflow.state_changed",
        "workflow",
        workflow.id,
        json!({ "workflow_id": workflow.id, "from": from, "to": to }),
    ))
}

fn record_transition(workflow: &mut Workflow, to: WorkflowState, trigger: &Trigger, now: DateTime<Utc>) {
    let from = workflow.state;
    workflow
        .history
        .push(Transition::new(from, to, trigger.label(), now));
    workflow.state = to;
    workflow.state_retry_count = 0;
    workflow.last_activity_at = now;
}

/// Applies `trigger` to `workflow`, mutating it in place and returning the
/// side effects the caller (the per-workflow owner task) should perform.
///
/// Uses [`default_requirements_heuristic`] unless `requirements` is given.
#[instrument(skip(workflow, requirements), fields(workflow_id = %workflow.id, state = %workflow.state))]
pub fn reduce(
    workflow: &mut Workflow,
    trigger: Trigger,
    now: DateTime<Utc>,
    requirements: Option<&RequirementsCheck>,
) -> Result<Vec<WorkflowAction>, InvalidTransition> {
    let from = workflow.state;

    match (from, &trigger) {
        (WorkflowState::Idle, Trigger::Start { project_configured }) => {
            if workflow.metadata.initial_goal.trim().is_empty() || !project_configured {
                return Err(invalid(
                    from,
                    WorkflowState::Planning,
                    &trigger,
                    "goal text missing or project not configured",
                ));
            }
            workflow.started_at = Some(now);
            record_transition(workflow, WorkflowState::Planning, &trigger, now);
            Ok(vec![
                state_changed_event(workflow, from, WorkflowState::Planning),
                WorkflowAction::RunPlanning {
                    goal: workflow.metadata.initial_goal.clone(),
                    hint: workflow.metadata.planning_hint.clone(),
                    context: workflow.metadata.accumulated_context.clone(),
                    error_context: workflow.metadata.error_context.clone(),
                },
            ])
        }

        (WorkflowState::Planning, Trigger::PlanReady { confirmed }) => {
            if !(*confirmed || workflow.metadata.auto_confirm_plan) {
                return Err(invalid(
                    from,
                    WorkflowState::Coding,
                    &trigger,
                    "plan not confirmed and auto-confirm disabled",
                ));
            }
            record_transition(workflow, WorkflowState::Coding, &trigger, now);
            Ok(vec![
                state_changed_event(workflow, from, WorkflowState::Coding),
                WorkflowAction::RunCoding {
                    iteration: workflow.metadata.current_iteration,
                },
            ])
        }

        (WorkflowState::Planning, Trigger::PlanningFailed) => {
            handle_retryable_failure(workflow, &trigger, now, WorkflowState::Planning)
        }

        (WorkflowState::Coding, Trigger::PrOpened { pr_number }) => {
            workflow.metadata.current_pr_number = Some(*pr_number);
            workflow.metadata.pr_history.push(*pr_number);
            record_transition(workflow, WorkflowState::PrCreated, &trigger, now);
            Ok(vec![
                state_changed_event(workflow, from, WorkflowState::PrCreated),
                WorkflowAction::AwaitPrWebhook {
                    pr_number: *pr_number,
                },
            ])
        }

        (WorkflowState::Coding, Trigger::CodingFailed) => {
            handle_retryable_failure(workflow, &trigger, now, WorkflowState::Coding)
        }

        (WorkflowState::PrCreated, Trigger::PrWebhookReceived { pr_number }) => {
            if workflow.metadata.current_pr_number != Some(*pr_number) {
                return Err(invalid(
                    from,
                    WorkflowState::Validating,
                    &trigger,
                    "webhook PR number does not match the workflow's current PR",
                ));
            }
            workflow.metadata.validation_attempts += 1;
            record_transition(workflow, WorkflowState::Validating, &trigger, now);
            Ok(vec![
                state_changed_event(workflow, from, WorkflowState::Validating),
                WorkflowAction::RunValidation {
                    pr_number: *pr_number,
                },
            ])
        }

        (
            WorkflowState::Validating,
            Trigger::ValidationOutcome {
                outcome: PipelineOutcome::Success,
                requirements_context,
            },
        ) => {
            let check = requirements
                .map(|c| c(requirements_context))
                .unwrap_or_else(|| default_requirements_heuristic(requirements_context));
            if !check {
                return retry_validation_as_planning(workflow, &trigger, now, from);
            }
            workflow.completed_at = Some(now);
            workflow.final_result = Some(requirements_context.clone());
            record_transition(workflow, WorkflowState::Completed, &trigger, now);
            Ok(vec![state_changed_event(
                workflow,
                from,
                WorkflowState::Completed,
            )])
        }

        (
            WorkflowState::Validating,
            Trigger::ValidationOutcome {
                outcome: PipelineOutcome::Failure | PipelineOutcome::Warning,
                ..
            },
        ) => retry_validation_as_planning(workflow, &trigger, now, from),

        (state, Trigger::Cancel) if !state.is_terminal() => {
            record_transition(workflow, WorkflowState::Cancelled, &trigger, now);
            Ok(vec![state_changed_event(
                workflow,
                from,
                WorkflowState::Cancelled,
            )])
        }

        _ => Err(invalid(from, from, &trigger, "no rule matches this (state, trigger) pair")),
    }
}

fn retry_validation_as_planning(
    workflow: &mut Workflow,
    trigger: &Trigger,
    now: DateTime<Utc>,
    from: WorkflowState,
) -> Result<Vec<WorkflowAction>, InvalidTransition> {
    if workflow.metadata.current_iteration >= workflow.metadata.max_iterations {
        workflow.completed_at = Some(now);
        workflow.final_error = Some("iteration cap reached with failing validation".to_string());
        record_transition(workflow, WorkflowState::Failed, trigger, now);
        return Ok(vec![state_changed_event(workflow, from, WorkflowState::Failed)]);
    }

    workflow.metadata.current_iteration += 1;
    workflow.metadata.validation_attempts = 0;
    workflow
        .metadata
        .push_context(format!("iteration {} validation failed", workflow.metadata.current_iteration - 1));
    let error_context_tail: Vec<String> = workflow
        .metadata
        .error_context
        .iter()
        .rev()
        .take(5)
        .rev()
        .cloned()
        .collect();

    record_transition(workflow, WorkflowState::Planning, trigger, now);
    Ok(vec![
        state_changed_event(workflow, from, WorkflowState::Planning),
        WorkflowAction::RunPlanning {
            goal: workflow.metadata.initial_goal.clone(),
            hint: workflow.metadata.planning_hint.clone(),
            context: workflow.metadata.accumulated_context.clone(),
            error_context: error_context_tail,
        },
    ])
}

fn handle_retryable_failure(
    workflow: &mut Workflow,
    trigger: &Trigger,
    now: DateTime<Utc>,
    state: WorkflowState,
) -> Result<Vec<WorkflowAction>, InvalidTransition> {
    workflow
        .metadata
        .push_error_context(format!("{state} failed (attempt {})", workflow.state_retry_count + 1));

    if workflow.state_retry_count + 1 > workflow.max_state_retries {
        workflow.completed_at = Some(now);
        workflow.final_error = Some(format!("{state} failed and exhausted retries"));
        record_transition(workflow, WorkflowState::Failed, trigger, now);
        return Ok(vec![state_changed_event(workflow, state, WorkflowState::Failed)]);
    }

    workflow.state_retry_count += 1;
    workflow.last_activity_at = now;
    Ok(vec![WorkflowAction::RetryAfterDelay {
        state,
        delay: STATE_RETRY_DELAY,
    }])
}

#[cfg(test)]
mod tests {
    use super::*;
    use forgeloop_schemas::workflow::WorkflowMetadata;
    use proptest::prop_assert;
    use serde_json::json;
    use uuid::Uuid;

    fn workflow(goal: &str, max_iterations: u32) -> Workflow {
        Workflow::new(Uuid::now_v7(), WorkflowMetadata::new(goal, max_iterations), Utc::now())
    }

    #[test]
    fn idle_to_planning_requires_goal_and_configured_project() {
        let mut wf = workflow("", 3);
        let err = reduce(&mut wf, Trigger::Start { project_configured: true }, Utc::now(), None)
            .unwrap_err();
        assert_eq!(err.from, WorkflowState::Idle);

        let mut wf = workflow("fix the bug", 3);
        reduce(&mut wf, Trigger::Start { project_configured: true }, Utc::now(), None).unwrap();
        assert_eq!(wf.state, WorkflowState::Planning);
        assert!(wf.state_matches_history());
    }

    #[test]
    fn planning_failure_retries_before_failing() {
        let mut wf = workflow("goal", 3);
        reduce(&mut wf, Trigger::Start { project_configured: true }, Utc::now(), None).unwrap();

        for expected_retry in 1..=wf.max_state_retries {
            let actions = reduce(&mut wf, Trigger::PlanningFailed, Utc::now(), None).unwrap();
            assert_eq!(wf.state, WorkflowState::Planning);
            assert_eq!(wf.state_retry_count, expected_retry);
            assert!(matches!(actions[0], WorkflowAction::RetryAfterDelay { .. }));
        }

        reduce(&mut wf, Trigger::PlanningFailed, Utc::now(), None).unwrap();
        assert_eq!(wf.state, WorkflowState::Failed);
    }

    #[test]
    fn full_happy_path_to_completed() {
        let mut wf = workflow("goal", 3);
        let now = Utc::now();
        reduce(&mut wf, Trigger::Start { project_configured: true }, now, None).unwrap();
        reduce(&mut wf, Trigger::PlanReady { confirmed: true }, now, None).unwrap();
        reduce(&mut wf, Trigger::PrOpened { pr_number: 42 }, now, None).unwrap();
        reduce(&mut wf, Trigger::PrWebhookReceived { pr_number: 42 }, now, None).unwrap();

        let ctx = json!({
            "pr_merged": true, "tests_passing": true,
            "validation_passed": true, "deployment_successful": true
        });
        reduce(
            &mut wf,
            Trigger::ValidationOutcome { outcome: PipelineOutcome::Success, requirements_context: ctx },
            now,
            None,
        )
        .unwrap();

        assert_eq!(wf.state, WorkflowState::Completed);
        assert!(wf.state_matches_history());
    }

    #[test]
    fn validation_failure_loops_back_to_planning_until_cap() {
        let mut wf = workflow("goal", 2);
        let now = Utc::now();
        reduce(&mut wf, Trigger::Start { project_configured: true }, now, None).unwrap();
        reduce(&mut wf, Trigger::PlanReady { confirmed: true }, now, None).unwrap();
        reduce(&mut wf, Trigger::PrOpened { pr_number: 1 }, now, None).unwrap();
        reduce(&mut wf, Trigger::PrWebhookReceived { pr_number: 1 }, now, None).unwrap();

        reduce(
            &mut wf,
            Trigger::ValidationOutcome { outcome: PipelineOutcome::Failure, requirements_context: json!({}) },
            now,
            None,
        )
        .unwrap();
        assert_eq!(wf.state, WorkflowState::Planning);
        assert_eq!(wf.metadata.current_iteration, 2);

        reduce(&mut wf, Trigger::PlanReady { confirmed: true }, now, None).unwrap();
        reduce(&mut wf, Trigger::PrOpened { pr_number: 2 }, now, None).unwrap();
        reduce(&mut wf, Trigger::PrWebhookReceived { pr_number: 2 }, now, None).unwrap();
        reduce(
            &mut wf,
            Trigger::ValidationOutcome { outcome: PipelineOutcome::Failure, requirements_context: json!({}) },
            now,
            None,
        )
        .unwrap();

        assert_eq!(wf.state, WorkflowState::Failed);
    }

    #[test]
    fn cancel_is_allowed_from_any_non_terminal_state() {
        let mut wf = workflow("goal", 3);
        reduce(&mut wf, Trigger::Cancel, Utc::now(), None).unwrap();
        assert_eq!(wf.state, WorkflowState::Cancelled);

        let mut wf = workflow("goal", 3);
        reduce(&mut wf, Trigger::Start { project_configured: true }, Utc::now(), None).unwrap();
        reduce(&mut wf, Trigger::Cancel, Utc::now(), None).unwrap();
        assert_eq!(wf.state, WorkflowState::Cancelled);
    }

    #[test]
    fn cancel_is_rejected_once_terminal() {
        let mut wf = workflow("goal", 3);
        reduce(&mut wf, Trigger::Cancel, Utc::now(), None).unwrap();
        let err = reduce(&mut wf, Trigger::Cancel, Utc::now(), None).unwrap_err();
        assert_eq!(err.from, WorkflowState::Cancelled);
    }

    #[test]
    fn mismatched_pr_webhook_is_rejected() {
        let mut wf = workflow("goal", 3);
        let now = Utc::now();
        reduce(&mut wf, Trigger::Start { project_configured: true }, now, None).unwrap();
        reduce(&mut wf, Trigger::PlanReady { confirmed: true }, now, None).unwrap();
        reduce(&mut wf, Trigger::PrOpened { pr_number: 7 }, now, None).unwrap();

        let err = reduce(&mut wf, Trigger::PrWebhookReceived { pr_number: 8 }, now, None).unwrap_err();
        assert_eq!(err.from, WorkflowState::PrCreated);
        assert_eq!(wf.state, WorkflowState::PrCreated);
    }

    proptest::proptest! {
        /// Whatever sequence of triggers arrives, the workflow either
        /// rejects one with `InvalidTransition` (state unchanged) or applies
        /// it and keeps `state_matches_history` true, and a terminal state
        /// never lets a later trigger move it elsewhere.
        #[test]
        fn reducer_never_breaks_history_or_leaves_a_terminal_state(
            pr_numbers in proptest::collection::vec(1u64..1000, 0..6),
            confirm_first_plan in proptest::bool::ANY,
        ) {
            let mut wf = workflow("goal", 3);
            let now = Utc::now();
            let mut triggers = vec![
                Trigger::Start { project_configured: true },
                Trigger::PlanReady { confirmed: confirm_first_plan },
            ];
            for pr in pr_numbers {
                triggers.push(Trigger::PrOpened { pr_number: pr });
                triggers.push(Trigger::PrWebhookReceived { pr_number: pr });
                triggers.push(Trigger::ValidationOutcome {
                    outcome: PipelineOutcome::Failure,
                    requirements_context: serde_json::json!({}),
                });
            }
            triggers.push(Trigger::Cancel);

            for trigger in triggers {
                let was_terminal = wf.state.is_terminal();
                match reduce(&mut wf, trigger, now, None) {
                    Ok(_) => prop_assert!(wf.state_matches_history()),
                    Err(_) => {}
                }
                if was_terminal {
                    prop_assert!(wf.state.is_terminal());
                }
            }
        }
    }
}
