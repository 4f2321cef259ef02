//! The event envelope published on the event bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Keys redacted from an event's payload before it is published, regardless
/// of which component produced the event. Every event schema is expected to
/// route credentials and tokens through one of these keys (spec.md §9:
/// "Sensitive data flowing through event payloads must be filtered at
/// publish time").
const SENSITIVE_KEYS: &[&str] = &[
    "token",
    "access_token",
    "api_key",
    "apikey",
    "password",
    "secret",
    "credentials",
    "authorization",
];

const REDACTED: &str = "[redacted]";

/// An immutable fact published on the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: String,
    pub source: String,
    pub correlation_id: Uuid,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(
        event_type: impl Into<String>,
        source: impl Into<String>,
        correlation_id: Uuid,
        payload: Value,
    ) -> Self {
        let mut event = Self {
            event_type: event_type.into(),
            source: source.into(),
            correlation_id,
            payload,
            timestamp: Utc::now(),
        };
        redact_sensitive(&mut event.payload);
        event
    }

    #[cfg(test)]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Recursively walk a JSON value, replacing any object value whose key
/// matches [`SENSITIVE_KEYS`] (case-insensitively) with [`REDACTED`].
fn redact_sensitive(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, v) in map.iter_mut() {
                let key_lower = key.to_ascii_lowercase();
                if SENSITIVE_KEYS.iter().any(|s| key_lower.contains(s)) {
                    *v = Value::String(REDACTED.to_string());
                } else {
                    redact_sensitive(v);
                }
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                redact_sensitive(item);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn redacts_top_level_secret() {
        let event = Event::new(
            "workflow.started",
            "workflow",
            Uuid::now_v7(),
            json!({ "api_key": "sk-abc123", "goal": "add feature" }),
        );
        assert_eq!(event.payload["api_key"], json!(REDACTED));
        assert_eq!(event.payload["goal"], json!("add feature"));
    }

    #[test]
    fn redacts_nested_secret() {
        let event = Event::new(
            "sandbox.created",
            "sandbox",
            Uuid::now_v7(),
            json!({ "env": { "GITHUB_TOKEN": "ghp_xxx" } }),
        );
        assert_eq!(event.payload["env"]["GITHUB_TOKEN"], json!(REDACTED));
    }

    #[test]
    fn leaves_non_sensitive_payload_untouched() {
        let event = Event::new(
            "validation.step_completed",
            "pipeline",
            Uuid::now_v7(),
            json!({ "step_id": "deploy", "outcome": "completed" }),
        );
        assert_eq!(event.payload["step_id"], json!("deploy"));
    }
}
