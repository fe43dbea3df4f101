//! Per-subtask attempt history (`<session-dir>/attempt_history.json`).
//!
//! Every finished session appends one attempt. A retried subtask's prompt is given
//! the earlier errors, plus the subtasks that keep failing.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::types::SessionOutcome;
use crate::io::fs::write_atomic;

pub const ATTEMPT_HISTORY_FILE: &str = "attempt_history.json";

/// Failed attempts after which a subtask that never succeeded counts as stuck.
pub const STUCK_AFTER_ATTEMPTS: usize = 3;

/// Errors quoted back to a retried session, most recent last.
const RECENT_ERRORS: usize = 3;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttemptHistory {
    pub subtasks: BTreeMap<String, Vec<Attempt>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attempt {
    /// 1-based attempt number for the subtask.
    pub attempt: usize,
    pub success: bool,
    pub error: Option<String>,
    /// RFC 3339 time the session finished.
    pub finished_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StuckSubtask {
    pub id: String,
    pub attempts: usize,
}

/// What a retried session is told about earlier attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecoveryContext {
    pub attempts: usize,
    pub last_errors: Vec<String>,
    pub stuck: Vec<StuckSubtask>,
}

impl AttemptHistory {
    pub fn record(&mut self, outcome: &SessionOutcome, finished_at: &str) {
        let attempts = self.subtasks.entry(outcome.subtask_id.clone()).or_default();
        attempts.push(Attempt {
            attempt: attempts.len() + 1,
            success: outcome.success,
            error: outcome.error.clone(),
            finished_at: finished_at.to_string(),
        });
    }

    pub fn attempt_count(&self, subtask_id: &str) -> usize {
        self.subtasks.get(subtask_id).map_or(0, Vec::len)
    }

    /// Subtasks with at least [`STUCK_AFTER_ATTEMPTS`] attempts and no success, by id.
    pub fn stuck(&self) -> Vec<StuckSubtask> {
        self.subtasks
            .iter()
            .filter(|(_, attempts)| {
                attempts.len() >= STUCK_AFTER_ATTEMPTS && !attempts.iter().any(|a| a.success)
            })
            .map(|(id, attempts)| StuckSubtask {
                id: id.clone(),
                attempts: attempts.len(),
            })
            .collect()
    }

    /// Recovery notes for `subtask_id`, or `None` when it has no failed attempt.
    pub fn recovery(&self, subtask_id: &str) -> Option<RecoveryContext> {
        let attempts = self.subtasks.get(subtask_id)?;
        if attempts.iter().all(|a| a.success) {
            return None;
        }
        let errors: Vec<String> = attempts
            .iter()
            .filter(|a| !a.success)
            .filter_map(|a| a.error.clone())
            .collect();
        let last_errors = errors[errors.len().saturating_sub(RECENT_ERRORS)..].to_vec();
        Some(RecoveryContext {
            attempts: attempts.len(),
            last_errors,
            stuck: self.stuck(),
        })
    }
}

/// Load the history, or an empty one if the file does not exist yet.
pub fn load_attempt_history(path: &Path) -> Result<AttemptHistory> {
    if !path.exists() {
        return Ok(AttemptHistory::default());
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("read attempt history {}", path.display()))?;
    let history: AttemptHistory = serde_json::from_str(&contents)
        .with_context(|| format!("parse attempt history {}", path.display()))?;
    debug!(subtasks = history.subtasks.len(), "attempt history loaded");
    Ok(history)
}

pub fn write_attempt_history(path: &Path, history: &AttemptHistory) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(history).context("serialize attempt history")?;
    buf.push('\n');
    write_atomic(path, &buf)
}
