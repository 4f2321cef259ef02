//! Step definitions, results, and pipeline execution state.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An immutable template describing one unit of work in a validation plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct StepDefinition {
    /// Unique within the owning workflow/plan.
    pub id: String,
    pub name: String,
    /// Service tag looked up in the Service Coordinator's adapter registry.
    pub service: String,
    pub action: String,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default, with = "option_duration_millis")]
    pub timeout: Option<Duration>,
    #[serde(default)]
    pub retries: u32,
    #[serde(default)]
    pub optional: bool,
}

impl StepDefinition {
    pub fn new(id: impl Into<String>, service: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            service: service.into(),
            action: action.into(),
            params: serde_json::Value::Null,
            depends_on: Vec::new(),
            timeout: None,
            retries: 0,
            optional: false,
        }
    }

    pub fn depends_on(mut self, deps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Outcome of one step's execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum StepOutcome {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

/// The result attached to a step once it has run (or been skipped).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct StepResult {
    pub step_id: String,
    pub outcome: StepOutcome,
    pub payload: Option<serde_json::Value>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub elapsed_seconds: f64,
}

impl StepResult {
    pub fn pending(step_id: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            outcome: StepOutcome::Pending,
            payload: None,
            error: None,
            started_at: None,
            ended_at: None,
            elapsed_seconds: 0.0,
        }
    }

    /// Whether this step counts as satisfying a dependent's prerequisite
    /// (spec.md §4.4: COMPLETED or SKIPPED close the dependency; FAILED does
    /// not, unless the step itself was optional and is being treated as
    /// absent by its caller).
    pub fn closes_dependency(&self) -> bool {
        matches!(self.outcome, StepOutcome::Completed | StepOutcome::Skipped)
    }
}

/// Overall verdict of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum PipelineOutcome {
    Success,
    Failure,
    Warning,
}

/// One validation episode: a step DAG executed in a sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct PipelineExecution {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub steps: HashMap<String, StepResult>,
    pub current_step: Option<String>,
    pub progress_percent: u8,
    pub outcome: Option<PipelineOutcome>,
    pub snapshot_id: Option<String>,
    pub retry_count: u32,
}

impl PipelineExecution {
    pub fn new(workflow_id: Uuid) -> Self {
        Self {
            id: Uuid::now_v7(),
            workflow_id,
            steps: HashMap::new(),
            current_step: None,
            progress_percent: 0,
            outcome: None,
            snapshot_id: None,
            retry_count: 0,
        }
    }
}

mod option_duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => d.as_millis().serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis: Option<u64> = Option::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_definition_builder() {
        let step = StepDefinition::new("a", "svc", "act")
            .depends_on(["b", "c"])
            .optional(true)
            .with_retries(2);
        assert_eq!(step.depends_on, vec!["b", "c"]);
        assert!(step.optional);
        assert_eq!(step.retries, 2);
    }

    #[test]
    fn closes_dependency_semantics() {
        let mut r = StepResult::pending("a");
        assert!(!r.closes_dependency());
        r.outcome = StepOutcome::Skipped;
        assert!(r.closes_dependency());
        r.outcome = StepOutcome::Failed;
        assert!(!r.closes_dependency());
        r.outcome = StepOutcome::Completed;
        assert!(r.closes_dependency());
    }

    #[test]
    fn serde_roundtrip_timeout() {
        let step = StepDefinition::new("a", "svc", "act").with_timeout(Duration::from_secs(5));
        let json = serde_json::to_string(&step).unwrap();
        let parsed: StepDefinition = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.timeout, Some(Duration::from_secs(5)));
    }
}
