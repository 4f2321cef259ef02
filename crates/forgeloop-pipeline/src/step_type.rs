//! The closed set of validation step types (spec.md §4.3), matching the
//! original Python source's step taxonomy 1:1.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStepType {
    SnapshotCreation,
    SourceClone,
    Deployment,
    HealthCheck,
    WebEvaluation,
    CodeAnalysis,
    SecurityScan,
    Cleanup,
}

impl ValidationStepType {
    /// The Service Coordinator tag an adapter must register under to handle
    /// this step type.
    pub fn service_tag(self) -> &'static str {
        match self {
            ValidationStepType::SnapshotCreation => "snapshot_creation",
            ValidationStepType::SourceClone => "source_clone",
            ValidationStepType::Deployment => "deployment",
            ValidationStepType::HealthCheck => "health_check",
            ValidationStepType::WebEvaluation => "web_evaluation",
            ValidationStepType::CodeAnalysis => "code_analysis",
            ValidationStepType::SecurityScan => "security_scan",
            ValidationStepType::Cleanup => "cleanup",
        }
    }

    pub fn is_cleanup(self) -> bool {
        matches!(self, ValidationStepType::Cleanup)
    }
}

/// One entry in a validation plan: a typed step, a name, a config map, and
/// an execution order number. Steps run in ascending `order`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationStepSpec {
    pub step_type: ValidationStepType,
    pub name: String,
    #[serde(default)]
    pub config: serde_json::Value,
    pub order: u32,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub retries: u32,
    #[serde(default, with = "option_duration_millis")]
    pub timeout: Option<Duration>,
}

impl ValidationStepSpec {
    pub fn new(step_type: ValidationStepType, name: impl Into<String>, order: u32) -> Self {
        Self {
            step_type,
            name: name.into(),
            config: serde_json::Value::Null,
            order,
            optional: false,
            retries: 0,
            timeout: None,
        }
    }

    pub fn optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }
}

/// An ordered validation plan. Sorting by `order` is the caller's
/// responsibility at construction time; [`ValidationPlan::sorted`] enforces it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationPlan {
    pub steps: Vec<ValidationStepSpec>,
}

impl ValidationPlan {
    pub fn new(mut steps: Vec<ValidationStepSpec>) -> Self {
        steps.sort_by_key(|s| s.order);
        Self { steps }
    }

    pub fn required_step_count(&self) -> usize {
        self.steps.iter().filter(|s| !s.optional).count()
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
    fn plan_sorts_by_order() {
        let plan = ValidationPlan::new(vec![
            ValidationStepSpec::new(ValidationStepType::Cleanup, "cleanup", 5),
            ValidationStepSpec::new(ValidationStepType::SnapshotCreation, "snap", 0),
        ]);
        assert_eq!(plan.steps[0].step_type, ValidationStepType::SnapshotCreation);
        assert_eq!(plan.steps[1].step_type, ValidationStepType::Cleanup);
    }

    #[test]
    fn required_step_count_excludes_optional() {
        let plan = ValidationPlan::new(vec![
            ValidationStepSpec::new(ValidationStepType::HealthCheck, "health", 0),
            ValidationStepSpec::new(ValidationStepType::WebEvaluation, "web", 1).optional(true),
        ]);
        assert_eq!(plan.required_step_count(), 1);
    }
}
