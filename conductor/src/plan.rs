//! Typed build plan: phases, subtasks, verifications, and statuses.
//!
//! The plan document on disk is loosely structured JSON. [`Plan::from_value`] is the
//! single boundary where it becomes typed; anything that does not fit is reported as a
//! [`MalformedPlanError`]. Unknown keys are kept in `extra` maps so a parse/serialize
//! round-trip never drops fields written by other tools.

use std::fmt;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Top-level keys that must be present before a document is parsed.
pub const REQUIRED_PLAN_KEYS: [&str; 3] = ["feature", "workflow_type", "phases"];

/// The plan document could not be parsed into the typed model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedPlanError {
    pub reason: String,
}

impl MalformedPlanError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for MalformedPlanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed plan: {}", self.reason)
    }
}

impl std::error::Error for MalformedPlanError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowType {
    Feature,
    Refactor,
    Investigation,
    Migration,
    Simple,
}

impl WorkflowType {
    pub const ALL: [WorkflowType; 5] = [
        WorkflowType::Feature,
        WorkflowType::Refactor,
        WorkflowType::Investigation,
        WorkflowType::Migration,
        WorkflowType::Simple,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowType::Feature => "feature",
            WorkflowType::Refactor => "refactor",
            WorkflowType::Investigation => "investigation",
            WorkflowType::Migration => "migration",
            WorkflowType::Simple => "simple",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseType {
    Setup,
    Implementation,
    Investigation,
    Integration,
    Cleanup,
}

impl PhaseType {
    pub const ALL: [PhaseType; 5] = [
        PhaseType::Setup,
        PhaseType::Implementation,
        PhaseType::Investigation,
        PhaseType::Integration,
        PhaseType::Cleanup,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PhaseType::Setup => "setup",
            PhaseType::Implementation => "implementation",
            PhaseType::Investigation => "investigation",
            PhaseType::Integration => "integration",
            PhaseType::Cleanup => "cleanup",
        }
    }
}

/// Subtask lifecycle status.
///
/// Not a strict state machine: any component may overwrite it. The scheduler only
/// distinguishes `pending` and `completed` from everything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskStatus {
    Pending,
    InProgress,
    Completed,
    Blocked,
    Failed,
}

impl SubtaskStatus {
    pub const ALL: [SubtaskStatus; 5] = [
        SubtaskStatus::Pending,
        SubtaskStatus::InProgress,
        SubtaskStatus::Completed,
        SubtaskStatus::Blocked,
        SubtaskStatus::Failed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SubtaskStatus::Pending => "pending",
            SubtaskStatus::InProgress => "in_progress",
            SubtaskStatus::Completed => "completed",
            SubtaskStatus::Blocked => "blocked",
            SubtaskStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for SubtaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationType {
    Command,
    Api,
    Browser,
    Component,
    Manual,
    None,
    E2e,
}

impl VerificationType {
    pub const ALL: [VerificationType; 7] = [
        VerificationType::Command,
        VerificationType::Api,
        VerificationType::Browser,
        VerificationType::Component,
        VerificationType::Manual,
        VerificationType::None,
        VerificationType::E2e,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            VerificationType::Command => "command",
            VerificationType::Api => "api",
            VerificationType::Browser => "browser",
            VerificationType::Component => "component",
            VerificationType::Manual => "manual",
            VerificationType::None => "none",
            VerificationType::E2e => "e2e",
        }
    }
}

/// How a subtask's completion is checked. Recorded and surfaced, never executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verification {
    #[serde(rename = "type")]
    pub kind: VerificationType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expect_status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expect_contains: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Verification {
    /// One-line human description used in prompts and status output.
    pub fn summary(&self) -> String {
        match self.kind {
            VerificationType::Command => match &self.run {
                Some(run) => format!("command: {run}"),
                None => "command".to_string(),
            },
            VerificationType::Api => {
                let method = self.method.as_deref().unwrap_or("GET");
                let url = self.url.as_deref().unwrap_or("/");
                match self.expect_status {
                    Some(status) => format!("api: {method} {url} -> {status}"),
                    None => format!("api: {method} {url}"),
                }
            }
            kind => match &self.scenario {
                Some(scenario) => format!("{}: {scenario}", kind.as_str()),
                None => kind.as_str().to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subtask {
    pub id: String,
    pub description: String,
    pub status: SubtaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub all_services: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files_to_modify: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files_to_create: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patterns_from: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<Verification>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A dependency reference: either a legacy phase number or a string phase id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PhaseRef {
    Number(i64),
    Name(String),
}

impl PhaseRef {
    /// Canonical key used to match against [`Phase::key`].
    pub fn key(&self) -> String {
        match self {
            PhaseRef::Number(n) => n.to_string(),
            PhaseRef::Name(name) => name.clone(),
        }
    }
}

impl fmt::Display for PhaseRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    /// Legacy numeric identity.
    #[serde(rename = "phase", default, skip_serializing_if = "Option::is_none")]
    pub number: Option<i64>,
    /// String identity; takes precedence over `number` when both are set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<PhaseType>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<PhaseRef>,
    #[serde(default)]
    pub parallel_safe: bool,
    pub subtasks: Vec<Subtask>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Phase {
    /// Identity key of the phase at `position` (0-based) in the plan.
    pub fn key(&self, position: usize) -> String {
        if let Some(id) = self.id.as_deref().filter(|id| !id.is_empty()) {
            return id.to_string();
        }
        match self.number {
            Some(number) => number.to_string(),
            None => (position + 1).to_string(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.subtasks
            .iter()
            .all(|subtask| subtask.status == SubtaskStatus::Completed)
    }
}

/// Root aggregate of a build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub feature: String,
    pub workflow_type: WorkflowType,
    pub phases: Vec<Phase>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services_involved: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub final_acceptance: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Plan {
    /// Parse a plan from its JSON text.
    pub fn from_json(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|err| MalformedPlanError::new(format!("invalid json: {err}")))?;
        Self::from_value(value)
    }

    /// Convert the loosely-typed wire document into the typed model.
    pub fn from_value(value: Value) -> Result<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| MalformedPlanError::new("plan document must be a JSON object"))?;
        for key in REQUIRED_PLAN_KEYS {
            if !object.contains_key(key) {
                return Err(MalformedPlanError::new(format!("missing required key '{key}'")).into());
            }
        }

        let plan: Plan =
            serde_json::from_value(value).map_err(|err| MalformedPlanError::new(err.to_string()))?;

        for (index, phase) in plan.phases.iter().enumerate() {
            if phase.number.is_none() && phase.id.is_none() {
                return Err(MalformedPlanError::new(format!(
                    "phase {}: missing identity (need one of: phase, id)",
                    index + 1
                ))
                .into());
            }
        }
        Ok(plan)
    }

    pub fn to_value(&self) -> Result<Value> {
        serde_json::to_value(self).context("serialize plan")
    }

    /// Pretty-printed JSON with a trailing newline.
    pub fn to_json_pretty(&self) -> Result<String> {
        let mut buf = serde_json::to_string_pretty(self).context("serialize plan")?;
        buf.push('\n');
        Ok(buf)
    }

    /// All subtasks, flattened in phase order.
    pub fn subtasks(&self) -> impl Iterator<Item = &Subtask> {
        self.phases.iter().flat_map(|phase| phase.subtasks.iter())
    }

    pub fn subtask_count(&self) -> usize {
        self.phases.iter().map(|phase| phase.subtasks.len()).sum()
    }

    pub fn find_subtask(&self, id: &str) -> Option<&Subtask> {
        self.subtasks().find(|subtask| subtask.id == id)
    }

    pub fn find_subtask_mut(&mut self, id: &str) -> Option<&mut Subtask> {
        self.phases
            .iter_mut()
            .flat_map(|phase| phase.subtasks.iter_mut())
            .find(|subtask| subtask.id == id)
    }

    /// Position and phase that own the subtask `id`.
    pub fn phase_of(&self, subtask_id: &str) -> Option<(usize, &Phase)> {
        self.phases
            .iter()
            .enumerate()
            .find(|(_, phase)| phase.subtasks.iter().any(|s| s.id == subtask_id))
    }

    /// Overwrite a subtask's status. Returns false if the id is unknown.
    pub fn set_status(&mut self, id: &str, status: SubtaskStatus) -> bool {
        match self.find_subtask_mut(id) {
            Some(subtask) => {
                subtask.status = status;
                true
            }
            None => false,
        }
    }

    /// True when every subtask is `completed`.
    pub fn is_complete(&self) -> bool {
        self.subtasks()
            .all(|subtask| subtask.status == SubtaskStatus::Completed)
    }

    /// Ids of subtasks that are not yet `completed`, in plan order.
    pub fn incomplete_ids(&self) -> Vec<String> {
        self.subtasks()
            .filter(|subtask| subtask.status != SubtaskStatus::Completed)
            .map(|subtask| subtask.id.clone())
            .collect()
    }

    /// Stamp lifecycle timestamps (`created_at` only when absent).
    pub fn touch(&mut self, now: &str) {
        if self.created_at.is_none() {
            self.created_at = Some(now.to_string());
        }
        self.updated_at = Some(now.to_string());
    }
}
