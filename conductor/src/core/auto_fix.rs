//! Mechanical repair of common plan omissions.
//!
//! Fills only what the document needs to parse: names, identities, and statuses.
//! File lists and verification details are never invented.

use serde_json::{Map, Value, json};

pub const PLACEHOLDER_FEATURE: &str = "Unnamed Feature";
pub const PLACEHOLDER_DESCRIPTION: &str = "No description";

/// Repair a plan document in place and report whether anything changed.
///
/// Idempotent: a second pass over the output is a no-op.
pub fn auto_fix(mut doc: Value) -> (Value, bool) {
    let mut changed = false;
    let Some(root) = doc.as_object_mut() else {
        return (doc, false);
    };

    changed |= fill(root, "feature", || json!(PLACEHOLDER_FEATURE));
    changed |= fill(root, "workflow_type", || json!("feature"));
    changed |= fill(root, "phases", || json!([]));

    if let Some(phases) = root.get_mut("phases").and_then(Value::as_array_mut) {
        for (index, phase) in phases.iter_mut().enumerate() {
            if let Some(phase) = phase.as_object_mut() {
                changed |= fix_phase(phase, index + 1);
            }
        }
    }

    (doc, changed)
}

fn fix_phase(phase: &mut Map<String, Value>, number: usize) -> bool {
    let mut changed = false;
    changed |= fill(phase, "phase", || json!(number));
    changed |= fill(phase, "name", || json!(format!("Phase {number}")));
    changed |= fill(phase, "subtasks", || json!([]));

    if let Some(subtasks) = phase.get_mut("subtasks").and_then(Value::as_array_mut) {
        for (index, subtask) in subtasks.iter_mut().enumerate() {
            let Some(subtask) = subtask.as_object_mut() else {
                continue;
            };
            changed |= fill(subtask, "id", || json!(format!("subtask-{number}-{}", index + 1)));
            changed |= fill(subtask, "description", || json!(PLACEHOLDER_DESCRIPTION));
            changed |= fill(subtask, "status", || json!("pending"));
        }
    }
    changed
}

fn fill(object: &mut Map<String, Value>, key: &str, value: impl FnOnce() -> Value) -> bool {
    if object.contains_key(key) {
        return false;
    }
    object.insert(key.to_string(), value());
    true
}
