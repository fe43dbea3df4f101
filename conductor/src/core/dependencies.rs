//! Position-based dependency ("cycle") checks for plan phases.
//!
//! Phase execution order is the order of the phase array, so a dependency must point
//! strictly backwards. A reference to the phase itself, or to any phase at an equal or
//! later position, is rejected even when no true graph cycle exists.

use std::collections::HashMap;

use serde_json::Value;


/// Identity and dependency keys of one phase, in plan order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseDeps {
    pub key: String,
    pub depends_on: Vec<String>,
}

/// Report every offending dependency edge (not just the first).
pub fn dependency_errors(phases: &[PhaseDeps]) -> Vec<String> {
    let mut position: HashMap<&str, usize> = HashMap::new();
    for (index, phase) in phases.iter().enumerate() {
        // Duplicate keys resolve to the last occurrence.
        position.insert(phase.key.as_str(), index);
    }

    let mut errors = Vec::new();
    for (index, phase) in phases.iter().enumerate() {
        for dep in &phase.depends_on {
            match position.get(dep.as_str()) {
                None => errors.push(format!(
                    "Phase {}: depends on non-existent phase {}",
                    phase.key, dep
                )),
                Some(&dep_index) if dep_index >= index => errors.push(format!(
                    "Phase {}: cannot depend on phase {} (would create cycle)",
                    phase.key, dep
                )),
                Some(_) => {}
            }
        }
    }
    errors
}

/// Extract [`PhaseDeps`] from a raw phases array.
///
/// Mirrors [`crate::plan::Phase::key`]: a non-empty string `id` wins, then the
/// numeric `phase`, then the 1-based position.
pub fn document_phase_deps(phases: &[Value]) -> Vec<PhaseDeps> {
    phases
        .iter()
        .enumerate()
        .map(|(index, phase)| PhaseDeps {
            key: document_phase_key(phase, index),
            depends_on: phase
                .get("depends_on")
                .and_then(Value::as_array)
                .map(|deps| deps.iter().map(value_key).collect())
                .unwrap_or_default(),
        })
        .collect()
}

fn document_phase_key(phase: &Value, index: usize) -> String {
    let id = phase.get("id").filter(|id| is_truthy(id));
    match id.or_else(|| phase.get("phase")) {
        Some(value) => value_key(value),
        None => (index + 1).to_string(),
    }
}

fn value_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64() != Some(0.0),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}
