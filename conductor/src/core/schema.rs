//! Structural rules for the implementation plan document.
//!
//! Runs on the raw JSON value so a single pass can report every rule failure,
//! including ones that would stop [`crate::plan::Plan::from_value`] at the first
//! mismatch. Errors accumulate; nothing short-circuits except a non-object root.

use std::collections::HashSet;

use serde_json::Value;

use crate::core::dependencies::{dependency_errors, document_phase_deps};
use crate::core::types::{Checkpoint, ValidationResult};
use crate::plan::{PhaseType, REQUIRED_PLAN_KEYS, SubtaskStatus, VerificationType, WorkflowType};

const PLAN_FILE: &str = "implementation_plan.json";
const PHASE_REQUIRED: [&str; 2] = ["name", "subtasks"];
const PHASE_IDENTITY: [&str; 2] = ["phase", "id"];
const SUBTASK_REQUIRED: [&str; 3] = ["id", "description", "status"];

/// Validate a plan document against the schema rules.
pub fn validate_plan_document(doc: &Value) -> ValidationResult {
    let mut result = ValidationResult::new(Checkpoint::Plan);

    let Some(object) = doc.as_object() else {
        result.error_with_fix(
            "Plan document must be a JSON object",
            format!("Regenerate {PLAN_FILE}"),
        );
        return result;
    };

    for field in REQUIRED_PLAN_KEYS {
        if !object.contains_key(field) {
            result.error_with_fix(
                format!("Missing required field: {field}"),
                format!("Add '{field}' to {PLAN_FILE}"),
            );
        }
    }

    if let Some(workflow) = object.get("workflow_type") {
        let names = WorkflowType::ALL.map(WorkflowType::as_str);
        if !is_one_of(workflow, &names) {
            result.error_with_fix(
                format!("Invalid workflow_type: {}", display(workflow)),
                format!("Use one of: {}", names.join(", ")),
            );
        }
    }

    let phases: &[Value] = object
        .get("phases")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    if phases.is_empty() {
        result.error_with_fix("No phases defined", "Add at least one phase with subtasks");
    }
    for (index, phase) in phases.iter().enumerate() {
        validate_phase(phase, index, &mut result);
    }

    let total_subtasks: usize = phases.iter().map(|phase| subtasks_of(phase).len()).sum();
    if total_subtasks == 0 {
        result.error_with_fix("No subtasks defined in any phase", "Add subtasks to phases");
    }

    check_unique_subtask_ids(phases, &mut result);

    for err in dependency_errors(&document_phase_deps(phases)) {
        result.error(err);
    }

    result
}

fn validate_phase(phase: &Value, index: usize, result: &mut ValidationResult) {
    let label = format!("Phase {}", index + 1);
    let Some(object) = phase.as_object() else {
        result.error(format!("{label}: must be an object"));
        return;
    };

    for field in PHASE_REQUIRED {
        if !object.contains_key(field) {
            result.error(format!("{label}: missing required field '{field}'"));
        }
    }
    if !PHASE_IDENTITY.iter().any(|field| object.contains_key(*field)) {
        result.error(format!(
            "{label}: missing required field (need one of: {})",
            PHASE_IDENTITY.join(", ")
        ));
    }

    if let Some(kind) = object.get("type") {
        if !is_one_of(kind, &PhaseType::ALL.map(PhaseType::as_str)) {
            result.error(format!("{label}: invalid type '{}'", display(kind)));
        }
    }

    for (sub_index, subtask) in subtasks_of(phase).iter().enumerate() {
        validate_subtask(subtask, &format!("{label}, Subtask {}", sub_index + 1), result);
    }
}

fn validate_subtask(subtask: &Value, label: &str, result: &mut ValidationResult) {
    let Some(object) = subtask.as_object() else {
        result.error(format!("{label}: must be an object"));
        return;
    };

    for field in SUBTASK_REQUIRED {
        if !object.contains_key(field) {
            result.error(format!("{label}: missing required field '{field}'"));
        }
    }

    if let Some(status) = object.get("status") {
        if !is_one_of(status, &SubtaskStatus::ALL.map(SubtaskStatus::as_str)) {
            result.error(format!("{label}: invalid status '{}'", display(status)));
        }
    }

    if let Some(verification) = object.get("verification") {
        match verification.get("type") {
            None => result.error(format!("{label}: verification missing 'type'")),
            Some(kind)
                if !is_one_of(kind, &VerificationType::ALL.map(VerificationType::as_str)) =>
            {
                result.error(format!(
                    "{label}: invalid verification type '{}'",
                    display(kind)
                ));
            }
            Some(_) => {}
        }
    }
}

fn check_unique_subtask_ids(phases: &[Value], result: &mut ValidationResult) {
    let mut seen = HashSet::new();
    for subtask in phases.iter().flat_map(|phase| subtasks_of(phase).iter()) {
        if let Some(id) = subtask.get("id").and_then(Value::as_str) {
            if !seen.insert(id) {
                result.error(format!("Duplicate subtask id '{id}'"));
            }
        }
    }
}

fn subtasks_of(phase: &Value) -> &[Value] {
    phase
        .get("subtasks")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn is_one_of(value: &Value, allowed: &[&str]) -> bool {
    value.as_str().is_some_and(|s| allowed.contains(&s))
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_doc() -> Value {
        json!({
            "feature": "Search",
            "workflow_type": "feature",
            "phases": [
                {
                    "phase": 1,
                    "name": "Index",
                    "type": "setup",
                    "subtasks": [
                        {"id": "index-schema", "description": "Schema", "status": "pending",
                         "verification": {"type": "command", "run": "cargo test"}}
                    ]
                },
                {
                    "id": "query",
                    "name": "Query",
                    "depends_on": [1],
                    "subtasks": [
                        {"id": "query-api", "description": "API", "status": "pending"}
                    ]
                }
            ]
        })
    }

    #[test]
    fn valid_plan_passes() {
        let result = validate_plan_document(&valid_doc());
        assert!(result.valid, "unexpected errors: {:?}", result.errors);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn errors_accumulate_without_short_circuit() {
        let doc = json!({
            "workflow_type": "rewrite",
            "phases": [
                {"name": "Bad", "type": "deploy", "subtasks": [
                    {"id": "x", "status": "done", "verification": {"type": "smoke"}},
                    {"description": "no id", "status": "pending", "verification": {}}
                ]}
            ]
        });
        let result = validate_plan_document(&doc);
        assert!(!result.valid);
        let expected = [
            "Missing required field: feature",
            "Invalid workflow_type: rewrite",
            "Phase 1: missing required field (need one of: phase, id)",
            "Phase 1: invalid type 'deploy'",
            "Phase 1, Subtask 1: missing required field 'description'",
            "Phase 1, Subtask 1: invalid status 'done'",
            "Phase 1, Subtask 1: invalid verification type 'smoke'",
            "Phase 1, Subtask 2: missing required field 'id'",
            "Phase 1, Subtask 2: verification missing 'type'",
        ];
        for message in expected {
            assert!(
                result.errors.iter().any(|err| err == message),
                "missing error '{message}' in {:?}",
                result.errors
            );
        }
    }

    #[test]
    fn either_identity_form_is_accepted() {
        let mut doc = valid_doc();
        doc["phases"][0].as_object_mut().expect("phase").remove("phase");
        doc["phases"][0]["id"] = json!("index");
        doc["phases"][1]["depends_on"] = json!(["index"]);
        let result = validate_plan_document(&doc);
        assert!(result.valid, "unexpected errors: {:?}", result.errors);
    }

    #[test]
    fn empty_phases_and_subtasks_are_errors() {
        let doc = json!({"feature": "x", "workflow_type": "simple", "phases": []});
        let result = validate_plan_document(&doc);
        assert_eq!(
            result.errors,
            vec![
                "No phases defined".to_string(),
                "No subtasks defined in any phase".to_string()
            ]
        );
    }

    #[test]
    fn phase_with_empty_subtasks_counts_toward_total() {
        let doc = json!({"feature": "x", "workflow_type": "simple",
            "phases": [{"phase": 1, "name": "Only", "subtasks": []}]});
        let result = validate_plan_document(&doc);
        assert_eq!(result.errors, vec!["No subtasks defined in any phase".to_string()]);
    }

    #[test]
    fn forward_dependency_is_flagged() {
        let mut doc = valid_doc();
        doc["phases"][0]["depends_on"] = json!(["query"]);
        let result = validate_plan_document(&doc);
        assert_eq!(
            result.errors,
            vec!["Phase 1: cannot depend on phase query (would create cycle)".to_string()]
        );
    }

    #[test]
    fn duplicate_subtask_ids_are_flagged() {
        let mut doc = valid_doc();
        doc["phases"][1]["subtasks"][0]["id"] = json!("index-schema");
        let result = validate_plan_document(&doc);
        assert_eq!(
            result.errors,
            vec!["Duplicate subtask id 'index-schema'".to_string()]
        );
    }

    #[test]
    fn non_object_root_is_single_error() {
        let result = validate_plan_document(&json!([1, 2]));
        assert_eq!(result.errors.len(), 1);
        assert!(!result.valid);
    }
}
