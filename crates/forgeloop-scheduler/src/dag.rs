//! Topological layering of a step DAG, grounded on the original Python
//! `_build_execution_plan` (`backend/app/core/workflow/engine.py`): layer k
//! contains every step whose dependencies are all satisfied by layers < k.

use std::collections::{HashMap, HashSet};

use forgeloop_schemas::step::StepDefinition;

use crate::error::CycleError;

/// Returns layers of step ids, each sorted lexicographically (spec.md §4.4:
/// "steps within a layer launched in step-id lexicographic order").
pub fn layer_steps(steps: &[StepDefinition]) -> Result<Vec<Vec<String>>, CycleError> {
    let known: HashSet<&str> = steps.iter().map(|s| s.id.as_str()).collect();
    let mut indegree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for step in steps {
        indegree.entry(step.id.as_str()).or_insert(0);
        for dep in &step.depends_on {
            if known.contains(dep.as_str()) {
                *indegree.entry(step.id.as_str()).or_insert(0) += 1;
                dependents.entry(dep.as_str()).or_default().push(step.id.as_str());
            }
        }
    }

    let mut layers = Vec::new();
    let mut remaining = indegree.len();
    let mut indegree = indegree;

    while remaining > 0 {
        let mut layer: Vec<&str> = indegree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(id, _)| *id)
            .collect();

        if layer.is_empty() {
            let mut stuck: Vec<String> = indegree.keys().map(|s| s.to_string()).collect();
            stuck.sort();
            return Err(CycleError { step_ids: stuck });
        }

        layer.sort_unstable();
        for id in &layer {
            indegree.remove(id);
            remaining -= 1;
        }
        for id in &layer {
            if let Some(deps) = dependents.get(id) {
                for dependent in deps {
                    if let Some(deg) = indegree.get_mut(dependent) {
                        *deg -= 1;
                    }
                }
            }
        }

        layers.push(layer.into_iter().map(String::from).collect());
    }

    Ok(layers)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(id: &str, deps: &[&str]) -> StepDefinition {
        StepDefinition::new(id, "svc", "act").depends_on(deps.to_vec())
    }

    #[test]
    fn linear_chain_layers_one_per_step() {
        let steps = vec![step("a", &[]), step("b", &["a"]), step("c", &["b"])];
        let layers = layer_steps(&steps).unwrap();
        assert_eq!(layers, vec![vec!["a"], vec!["b"], vec!["c"]]);
    }

    #[test]
    fn independent_steps_share_a_layer_sorted() {
        let steps = vec![step("b", &[]), step("a", &[]), step("c", &["a", "b"])];
        let layers = layer_steps(&steps).unwrap();
        assert_eq!(layers, vec![vec!["a", "b"], vec!["c"]]);
    }

    #[test]
    fn cycle_is_rejected() {
        let steps = vec![step("a", &["b"]), step("b", &["a"])];
        let err = layer_steps(&steps).unwrap_err();
        assert_eq!(err.step_ids, vec!["a".to_string(), "b".to_string()]);
    }
}
