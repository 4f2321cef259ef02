use std::time::Duration;

/// Environment configuration recognized by the core (spec.md §6, subset).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_concurrent_workflows: usize,
    pub default_step_timeout: Duration,
    pub validation_timeout: Duration,
    pub max_iterations: u32,
    pub event_bus_queue_capacity: usize,
    pub sandbox_workspace_root: std::path::PathBuf,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self {
            max_concurrent_workflows: env_usize("MAX_CONCURRENT_WORKFLOWS", 50),
            default_step_timeout: Duration::from_secs(env_u64("DEFAULT_STEP_TIMEOUT_SECONDS", 300)),
            validation_timeout: Duration::from_secs(env_u64("VALIDATION_TIMEOUT_MINUTES", 30) * 60),
            max_iterations: env_usize("MAX_ITERATIONS", 10) as u32,
            event_bus_queue_capacity: env_usize(
                "EVENT_BUS_QUEUE_CAPACITY",
                forgeloop_eventbus::DEFAULT_QUEUE_CAPACITY,
            ),
            sandbox_workspace_root: std::env::var("SANDBOX_WORKSPACE_ROOT")
                .map(std::path::PathBuf::from)
                .unwrap_or_else(|_| std::env::temp_dir().join("forgeloop-sandboxes")),
        }
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
