//! Shared deterministic types for conductor core logic.
//!
//! These types define stable contracts between core components and the CLI. They
//! do not depend on external state or I/O.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::plan::SubtaskStatus;

/// Validation checkpoint that produced a [`ValidationResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Checkpoint {
    Prereqs,
    Context,
    Spec,
    Plan,
}

impl Checkpoint {
    pub fn as_str(self) -> &'static str {
        match self {
            Checkpoint::Prereqs => "prereqs",
            Checkpoint::Context => "context",
            Checkpoint::Spec => "spec",
            Checkpoint::Plan => "plan",
        }
    }
}

/// Outcome of one validation checkpoint.
///
/// Rule failures accumulate here instead of being raised, so a single pass reports
/// every problem together with its suggested fix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub checkpoint: Checkpoint,
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub fixes: Vec<String>,
}

impl ValidationResult {
    pub fn new(checkpoint: Checkpoint) -> Self {
        Self {
            checkpoint,
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
            fixes: Vec::new(),
        }
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
        self.valid = false;
    }

    pub fn error_with_fix(&mut self, message: impl Into<String>, fix: impl Into<String>) {
        self.error(message);
        self.fixes.push(fix.into());
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn fix(&mut self, fix: impl Into<String>) {
        self.fixes.push(fix.into());
    }
}

impl fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Checkpoint: {}", self.checkpoint.as_str())?;
        write!(f, "Status: {}", if self.valid { "PASS" } else { "FAIL" })?;

        if !self.errors.is_empty() {
            write!(f, "\n\nErrors:")?;
            for err in &self.errors {
                write!(f, "\n  x {err}")?;
            }
        }
        if !self.warnings.is_empty() {
            write!(f, "\n\nWarnings:")?;
            for warning in &self.warnings {
                write!(f, "\n  ! {warning}")?;
            }
        }
        if !self.fixes.is_empty() && !self.valid {
            write!(f, "\n\nSuggested fixes:")?;
            for fix in &self.fixes {
                write!(f, "\n  -> {fix}")?;
            }
        }
        Ok(())
    }
}

/// Proposed status change for one subtask, produced by an agent session.
///
/// Sessions never write the coordinator's plan directly; the coordinator applies
/// these serially after the batch has finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub subtask_id: String,
    pub status: SubtaskStatus,
}

/// Per-subtask result of one execution session after the completion cross-check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionOutcome {
    pub subtask_id: String,
    /// True only if the session succeeded and the subtask is `completed` afterwards.
    pub success: bool,
    /// Failure description (session error, or missing completion mark).
    pub error: Option<String>,
}
