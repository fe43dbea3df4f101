//! Checkpoint validation of a spec directory.
//!
//! Four independent checkpoints, each individually invocable: prerequisite
//! artifacts, the context document, the written specification, and the plan
//! document. Failures accumulate into [`ValidationResult`]s; only I/O errors that
//! make a checkpoint impossible to evaluate are raised.

use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::core::auto_fix::auto_fix;
use crate::core::schema::validate_plan_document;
use crate::core::types::{Checkpoint, ValidationResult};
use crate::io::paths::{CONTEXT_FILE, PLAN_FILE, PROJECT_INDEX_FILE, SPEC_FILE, SpecPaths};
use crate::io::plan_store::save_plan_document;
use crate::plan::Plan;

pub const SPEC_REQUIRED_SECTIONS: [&str; 4] =
    ["Overview", "Workflow Type", "Task Scope", "Success Criteria"];
pub const SPEC_RECOMMENDED_SECTIONS: [&str; 4] = [
    "Files to Modify",
    "Files to Reference",
    "Requirements",
    "QA Acceptance Criteria",
];
pub const CONTEXT_REQUIRED_FIELDS: [&str; 1] = ["task_description"];
pub const CONTEXT_RECOMMENDED_FIELDS: [&str; 3] =
    ["files_to_modify", "files_to_reference", "scoped_services"];
/// Specs shorter than this are flagged as probably incomplete.
pub const SPEC_MIN_CHARS: usize = 500;

static REQUIRED_HEADINGS: LazyLock<Vec<(&'static str, Regex)>> =
    LazyLock::new(|| heading_patterns(&SPEC_REQUIRED_SECTIONS));
static RECOMMENDED_HEADINGS: LazyLock<Vec<(&'static str, Regex)>> =
    LazyLock::new(|| heading_patterns(&SPEC_RECOMMENDED_SECTIONS));

fn heading_patterns(sections: &[&'static str]) -> Vec<(&'static str, Regex)> {
    sections
        .iter()
        .map(|section| {
            let pattern = format!(r"(?mi)^##?\s+{}", regex::escape(section));
            let re = Regex::new(&pattern).expect("escaped heading pattern is valid");
            (*section, re)
        })
        .collect()
}

/// Validation report over one or more checkpoints.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub results: Vec<ValidationResult>,
}

impl ValidationReport {
    pub fn new(results: Vec<ValidationResult>) -> Self {
        Self {
            valid: results.iter().all(|r| r.valid),
            results,
        }
    }
}

/// Validates the artifacts of one spec directory.
#[derive(Debug, Clone)]
pub struct SpecValidator {
    paths: SpecPaths,
}

impl SpecValidator {
    pub fn new(spec_dir: impl AsRef<Path>) -> Self {
        Self {
            paths: SpecPaths::new(spec_dir.as_ref()),
        }
    }

    /// Run all four checkpoints in order.
    pub fn validate_all(&self) -> Result<ValidationReport> {
        Ok(ValidationReport::new(vec![
            self.validate_prereqs(),
            self.validate_context()?,
            self.validate_spec_document()?,
            self.validate_plan()?,
        ]))
    }

    pub fn validate(&self, checkpoint: Checkpoint) -> Result<ValidationResult> {
        match checkpoint {
            Checkpoint::Prereqs => Ok(self.validate_prereqs()),
            Checkpoint::Context => self.validate_context(),
            Checkpoint::Spec => self.validate_spec_document(),
            Checkpoint::Plan => self.validate_plan(),
        }
    }

    pub fn validate_prereqs(&self) -> ValidationResult {
        let mut result = ValidationResult::new(Checkpoint::Prereqs);
        let dir = self.paths.dir();
        if !dir.is_dir() {
            result.error_with_fix(
                format!("Spec directory does not exist: {}", dir.display()),
                format!("Create directory: mkdir -p {}", dir.display()),
            );
            return result;
        }

        let local = self.paths.project_index();
        let shared = self.paths.shared_project_index();
        if !local.exists() {
            if shared.exists() {
                result.warning(format!(
                    "{PROJECT_INDEX_FILE} exists two levels up but not in the spec directory"
                ));
                result.fix(format!("Copy: cp {} {}", shared.display(), local.display()));
            } else {
                result.error_with_fix(
                    format!("{PROJECT_INDEX_FILE} not found"),
                    format!("Generate {PROJECT_INDEX_FILE} for the project into {}", dir.display()),
                );
            }
        }
        result
    }

    pub fn validate_context(&self) -> Result<ValidationResult> {
        let mut result = ValidationResult::new(Checkpoint::Context);
        let Some(raw) = read_if_exists(&self.paths.context())? else {
            result.error_with_fix(
                format!("{CONTEXT_FILE} not found"),
                format!("Create {CONTEXT_FILE} with a task_description"),
            );
            return Ok(result);
        };

        let context: Value = match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(err) => {
                result.error_with_fix(
                    format!("{CONTEXT_FILE} is invalid JSON: {err}"),
                    format!("Regenerate {CONTEXT_FILE} or fix JSON syntax"),
                );
                return Ok(result);
            }
        };

        for field in CONTEXT_REQUIRED_FIELDS {
            if context.get(field).is_none() {
                result.error_with_fix(
                    format!("Missing required field: {field}"),
                    format!("Add '{field}' to {CONTEXT_FILE}"),
                );
            }
        }
        for field in CONTEXT_RECOMMENDED_FIELDS {
            if context.get(field).is_none_or(is_empty_value) {
                result.warning(format!("Missing recommended field: {field}"));
            }
        }
        Ok(result)
    }

    pub fn validate_spec_document(&self) -> Result<ValidationResult> {
        let mut result = ValidationResult::new(Checkpoint::Spec);
        let Some(content) = read_if_exists(&self.paths.spec())? else {
            result.error_with_fix(
                format!("{SPEC_FILE} not found"),
                format!("Create {SPEC_FILE} with required sections"),
            );
            return Ok(result);
        };

        for (section, re) in REQUIRED_HEADINGS.iter() {
            if !re.is_match(&content) {
                result.error_with_fix(
                    format!("Missing required section: '{section}'"),
                    format!("Add '## {section}' section to {SPEC_FILE}"),
                );
            }
        }
        for (section, re) in RECOMMENDED_HEADINGS.iter() {
            if !re.is_match(&content) {
                result.warning(format!("Missing recommended section: '{section}'"));
            }
        }
        if content.chars().count() < SPEC_MIN_CHARS {
            result.warning(format!("{SPEC_FILE} seems too short (< {SPEC_MIN_CHARS} chars)"));
        }
        Ok(result)
    }

    #[instrument(skip_all, fields(spec_dir = %self.paths.dir().display()))]
    pub fn validate_plan(&self) -> Result<ValidationResult> {
        let plan_path = self.paths.plan();
        let Some(raw) = read_if_exists(&plan_path)? else {
            let mut result = ValidationResult::new(Checkpoint::Plan);
            result.error_with_fix(
                format!("{PLAN_FILE} not found"),
                format!("Write an implementation plan to {}", plan_path.display()),
            );
            return Ok(result);
        };

        let doc: Value = match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(err) => {
                let mut result = ValidationResult::new(Checkpoint::Plan);
                result.error_with_fix(
                    format!("{PLAN_FILE} is invalid JSON: {err}"),
                    format!("Regenerate {PLAN_FILE} or fix JSON syntax"),
                );
                return Ok(result);
            }
        };

        let mut result = validate_plan_document(&doc);
        if result.valid {
            // Field types the rules do not cover (e.g. a non-numeric expect_status).
            if let Err(err) = Plan::from_value(doc) {
                result.error(format!("{PLAN_FILE} does not parse: {err:#}"));
            }
        }
        debug!(valid = result.valid, errors = result.errors.len(), "plan validated");
        Ok(result)
    }

    /// Repair the plan document on disk. Returns true when it was rewritten.
    ///
    /// A missing or unparseable document is left alone.
    #[instrument(skip_all, fields(spec_dir = %self.paths.dir().display()))]
    pub fn auto_fix_plan(&self) -> Result<bool> {
        let plan_path = self.paths.plan();
        let Some(raw) = read_if_exists(&plan_path)? else {
            return Ok(false);
        };
        let Ok(doc) = serde_json::from_str::<Value>(&raw) else {
            debug!("plan is not valid JSON, skipping auto-fix");
            return Ok(false);
        };

        let (fixed, changed) = auto_fix(doc);
        if changed {
            save_plan_document(&plan_path, &fixed)?;
            info!(path = %plan_path.display(), "auto-fixed plan");
        }
        Ok(changed)
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Number(n) => n.as_f64() == Some(0.0),
    }
}

fn read_if_exists(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    fs::read_to_string(path)
        .map(Some)
        .with_context(|| format!("read {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{SpecDir, full_spec_text, simple_plan};
    use serde_json::json;

    #[test]
    fn prereqs_missing_directory_suggests_mkdir() {
        let temp = tempfile::tempdir().expect("tempdir");
        let result = SpecValidator::new(temp.path().join("absent")).validate_prereqs();
        assert!(!result.valid);
        assert!(result.errors[0].starts_with("Spec directory does not exist"));
        assert!(result.fixes[0].starts_with("Create directory: mkdir -p"));
    }

    #[test]
    fn prereqs_warns_when_index_only_two_levels_up() {
        let temp = tempfile::tempdir().expect("tempdir");
        let spec_dir = temp.path().join("specs").join("001-x");
        fs::create_dir_all(&spec_dir).expect("mkdir");
        fs::write(temp.path().join(PROJECT_INDEX_FILE), "{}").expect("write index");

        let result = SpecValidator::new(&spec_dir).validate_prereqs();
        assert!(result.valid);
        assert_eq!(result.warnings.len(), 1);
        assert!(result.fixes[0].starts_with("Copy: cp"));
    }

    #[test]
    fn prereqs_errors_without_any_index() {
        let temp = tempfile::tempdir().expect("tempdir");
        let result = SpecValidator::new(temp.path()).validate_prereqs();
        assert_eq!(result.errors, vec![format!("{PROJECT_INDEX_FILE} not found")]);
    }

    #[test]
    fn missing_context_document_is_reported_with_fix() {
        let temp = tempfile::tempdir().expect("tempdir");
        let result = SpecValidator::new(temp.path())
            .validate_context()
            .expect("validate");
        assert_eq!(result.errors, vec!["context.json not found".to_string()]);
        assert_eq!(result.fixes.len(), 1);
    }

    #[test]
    fn context_recommended_fields_warn_when_empty() {
        let spec = SpecDir::new().expect("spec dir");
        spec.write_context(&json!({
            "task_description": "x",
            "files_to_modify": [],
            "scoped_services": ["api"]
        }))
        .expect("write context");
        let result = SpecValidator::new(spec.path())
            .validate_context()
            .expect("validate");
        assert!(result.valid);
        assert_eq!(
            result.warnings,
            vec![
                "Missing recommended field: files_to_modify".to_string(),
                "Missing recommended field: files_to_reference".to_string()
            ]
        );
    }

    #[test]
    fn zero_and_false_count_as_empty_recommended_fields() {
        let spec = SpecDir::new().expect("spec dir");
        spec.write_context(&json!({
            "task_description": "x",
            "files_to_modify": 0,
            "files_to_reference": false,
            "scoped_services": 0.0
        }))
        .expect("write context");
        let result = SpecValidator::new(spec.path())
            .validate_context()
            .expect("validate");
        assert!(result.valid);
        assert_eq!(result.warnings.len(), 3);
        assert!(
            result
                .warnings
                .contains(&"Missing recommended field: scoped_services".to_string())
        );
    }

    #[test]
    fn context_invalid_json_is_an_error() {
        let spec = SpecDir::new().expect("spec dir");
        fs::write(spec.path().join(CONTEXT_FILE), "{ nope").expect("write");
        let result = SpecValidator::new(spec.path())
            .validate_context()
            .expect("validate");
        assert!(!result.valid);
        assert!(result.errors[0].starts_with("context.json is invalid JSON"));
    }

    #[test]
    fn spec_headings_are_case_insensitive_and_accept_one_or_two_hashes() {
        let spec = SpecDir::new().expect("spec dir");
        let text =
            "# overview\nx\n## WORKFLOW TYPE\nfeature\n#  Task Scope\ny\n## Success criteria\nz\n";
        spec.write_spec(text).expect("write spec");
        let result = SpecValidator::new(spec.path())
            .validate_spec_document()
            .expect("validate");
        assert!(result.valid, "unexpected errors: {:?}", result.errors);
        assert!(result.warnings.iter().any(|w| w.contains("too short")));
        assert_eq!(
            result
                .warnings
                .iter()
                .filter(|w| w.starts_with("Missing recommended section"))
                .count(),
            4
        );
    }

    #[test]
    fn spec_rejects_deeper_headings_and_missing_sections() {
        let spec = SpecDir::new().expect("spec dir");
        spec.write_spec("### Overview\n## Workflow Type\n## Task Scope\n")
            .expect("write spec");
        let result = SpecValidator::new(spec.path())
            .validate_spec_document()
            .expect("validate");
        assert_eq!(
            result.errors,
            vec![
                "Missing required section: 'Overview'".to_string(),
                "Missing required section: 'Success Criteria'".to_string()
            ]
        );
        assert_eq!(result.fixes[0], "Add '## Overview' section to spec.md");
    }

    #[test]
    fn complete_spec_directory_passes_all_checkpoints() {
        let spec = SpecDir::new().expect("spec dir");
        spec.write_project_index().expect("index");
        spec.write_context(&json!({
            "task_description": "Add avatars",
            "files_to_modify": ["a.py"],
            "files_to_reference": ["b.py"],
            "scoped_services": ["api"]
        }))
        .expect("context");
        spec.write_spec(&full_spec_text()).expect("spec");
        spec.write_plan(&simple_plan(&["api-1", "api-2"])).expect("plan");

        let report = SpecValidator::new(spec.path()).validate_all().expect("validate");
        assert!(report.valid, "{:#?}", report.results);
        let checkpoints: Vec<_> = report.results.iter().map(|r| r.checkpoint).collect();
        assert_eq!(
            checkpoints,
            vec![
                Checkpoint::Prereqs,
                Checkpoint::Context,
                Checkpoint::Spec,
                Checkpoint::Plan
            ]
        );
    }

    #[test]
    fn plan_with_mistyped_field_fails_parse_check() {
        let spec = SpecDir::new().expect("spec dir");
        let mut plan = simple_plan(&["api-1"]);
        plan["phases"][0]["subtasks"][0]["verification"] =
            json!({"type": "api", "expect_status": "two hundred"});
        spec.write_plan(&plan).expect("plan");

        let result = SpecValidator::new(spec.path()).validate_plan().expect("validate");
        assert!(!result.valid);
        assert!(result.errors[0].contains("does not parse"));
    }

    #[test]
    fn auto_fix_rewrites_once() {
        let spec = SpecDir::new().expect("spec dir");
        spec.write_plan(&json!({"phases": [{"subtasks": [{"description": "x"}]}]}))
            .expect("plan");
        let validator = SpecValidator::new(spec.path());

        assert!(!validator.validate_plan().expect("before").valid);
        assert!(validator.auto_fix_plan().expect("first fix"));
        assert!(!validator.auto_fix_plan().expect("second fix"));

        let result = validator.validate_plan().expect("after");
        assert!(result.valid, "unexpected errors: {:?}", result.errors);
    }

    #[test]
    fn auto_fix_skips_missing_and_broken_documents() {
        let spec = SpecDir::new().expect("spec dir");
        let validator = SpecValidator::new(spec.path());
        assert!(!validator.auto_fix_plan().expect("missing"));
        fs::write(spec.path().join(PLAN_FILE), "{").expect("write");
        assert!(!validator.auto_fix_plan().expect("broken"));
    }
}
