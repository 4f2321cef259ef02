use serde_json::Value;

/// A pluggable check run on `ValidationOutcome`'s `requirements_context` to
/// decide whether a SUCCESS pipeline outcome actually closes the loop
/// (spec.md §4.5).
pub type RequirementsCheck = Box<dyn Fn(&Value) -> bool + Send + Sync>;

/// Flags the default heuristic looks for in the requirements context.
const DEFAULT_FLAGS: &[&str] = &[
    "pr_merged",
    "tests_passing",
    "validation_passed",
    "deployment_successful",
];

/// Default heuristic (spec.md §4.5): "score >= 80% closes the loop", scored
/// as the fraction of [`DEFAULT_FLAGS`] present and `true` in `context`.
pub fn default_requirements_heuristic(context: &Value) -> bool {
    let true_count = DEFAULT_FLAGS
        .iter()
        .filter(|flag| context.get(flag).and_then(Value::as_bool).unwrap_or(false))
        .count();
    (true_count as f64 / DEFAULT_FLAGS.len() as f64) >= 0.8
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn all_flags_true_closes_the_loop() {
        let ctx = json!({
            "pr_merged": true,
            "tests_passing": true,
            "validation_passed": true,
            "deployment_successful": true,
        });
        assert!(default_requirements_heuristic(&ctx));
    }

    #[test]
    fn three_of_four_is_below_threshold() {
        let ctx = json!({
            "pr_merged": true,
            "tests_passing": true,
            "validation_passed": true,
            "deployment_successful": false,
        });
        assert!(!default_requirements_heuristic(&ctx));
    }

    #[test]
    fn missing_flags_count_as_false() {
        assert!(!default_requirements_heuristic(&json!({})));
    }
}
