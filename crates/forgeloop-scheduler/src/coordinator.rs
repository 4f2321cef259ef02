//! Service Coordinator (spec.md §4.4.1): a registry mapping `service` tags
//! to adapter objects, generalized from the teacher's type-erased
//! `WorkflowRegistry` (`durable::engine::registry`).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use forgeloop_schemas::step::StepDefinition;
use serde_json::Value;

use crate::error::AdapterMissing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// A collaborator that knows how to carry out actions for one `service` tag
/// (e.g. `sandbox`, `github`, `llm-agent`).
#[async_trait]
pub trait ServiceAdapter: Send + Sync {
    async fn execute(&self, action: &str, context: &Value) -> Result<Value, String>;
    async fn health_check(&self) -> HealthStatus;
}

/// The step scheduler's only way to reach the outside world. Looks up the
/// adapter for `step.service`, invokes `execute(step.action, context)` under
/// the step's timeout, and returns either the payload or a dispatch error.
#[derive(Default)]
pub struct ServiceCoordinator {
    adapters: HashMap<String, Box<dyn ServiceAdapter>>,
}

impl ServiceCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, service: impl Into<String>, adapter: Box<dyn ServiceAdapter>) {
        self.adapters.insert(service.into(), adapter);
    }

    pub fn contains(&self, service: &str) -> bool {
        self.adapters.contains_key(service)
    }

    pub async fn execute_step(
        &self,
        step: &StepDefinition,
        context: &Value,
    ) -> Result<Value, StepExecuteOutcome> {
        let adapter = self
            .adapters
            .get(&step.service)
            .ok_or_else(|| StepExecuteOutcome::Missing(AdapterMissing(step.service.clone())))?;

        let timeout = step.timeout.unwrap_or(Duration::from_secs(300));
        match tokio::time::timeout(timeout, adapter.execute(&step.action, context)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(message)) => Err(StepExecuteOutcome::Failed(message)),
            Err(_elapsed) => Err(StepExecuteOutcome::Timeout),
        }
    }

    pub async fn health_check_all(&self) -> HashMap<String, HealthStatus> {
        let mut out = HashMap::with_capacity(self.adapters.len());
        for (tag, adapter) in &self.adapters {
            out.insert(tag.clone(), adapter.health_check().await);
        }
        out
    }
}

#[derive(Debug, Clone)]
pub enum StepExecuteOutcome {
    Missing(AdapterMissing),
    Failed(String),
    Timeout,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoAdapter;

    #[async_trait]
    impl ServiceAdapter for EchoAdapter {
        async fn execute(&self, action: &str, context: &Value) -> Result<Value, String> {
            Ok(json!({ "action": action, "context": context }))
        }

        async fn health_check(&self) -> HealthStatus {
            HealthStatus::Healthy
        }
    }

    struct SlowAdapter;

    #[async_trait]
    impl ServiceAdapter for SlowAdapter {
        async fn execute(&self, _action: &str, _context: &Value) -> Result<Value, String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Value::Null)
        }

        async fn health_check(&self) -> HealthStatus {
            HealthStatus::Healthy
        }
    }

    #[tokio::test]
    async fn dispatches_to_registered_adapter() {
        let mut coordinator = ServiceCoordinator::new();
        coordinator.register("echo", Box::new(EchoAdapter));

        let step = StepDefinition::new("s1", "echo", "ping");
        let result = coordinator.execute_step(&step, &json!({})).await.unwrap();
        assert_eq!(result["action"], json!("ping"));
    }

    #[tokio::test]
    async fn missing_adapter_is_reported() {
        let coordinator = ServiceCoordinator::new();
        let step = StepDefinition::new("s1", "nope", "ping");
        let err = coordinator.execute_step(&step, &json!({})).await.unwrap_err();
        assert!(matches!(err, StepExecuteOutcome::Missing(_)));
    }

    #[tokio::test]
    async fn timeout_is_reported() {
        let mut coordinator = ServiceCoordinator::new();
        coordinator.register("slow", Box::new(SlowAdapter));
        let step =
            StepDefinition::new("s1", "slow", "ping").with_timeout(Duration::from_millis(20));
        let err = coordinator.execute_step(&step, &json!({})).await.unwrap_err();
        assert!(matches!(err, StepExecuteOutcome::Timeout));
    }
}
