//! Plan document load/save.
//!
//! The document on disk is the single source of truth for subtask status across
//! process boundaries, so every write goes through [`write_atomic`].

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::io::fs::write_atomic;
use crate::plan::Plan;

/// Load and parse the plan. Shape errors surface as [`crate::plan::MalformedPlanError`].
#[instrument(skip_all, fields(path = %path.display()))]
pub fn load_plan(path: &Path) -> Result<Plan> {
    let raw = fs::read_to_string(path).with_context(|| format!("read plan {}", path.display()))?;
    let plan = Plan::from_json(&raw).with_context(|| format!("parse plan {}", path.display()))?;
    debug!(subtasks = plan.subtask_count(), "loaded plan");
    Ok(plan)
}

#[instrument(skip_all, fields(path = %path.display()))]
pub fn save_plan(path: &Path, plan: &Plan) -> Result<()> {
    write_atomic(path, &plan.to_json_pretty()?)
}

pub fn save_plan_document(path: &Path, doc: &Value) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(doc).context("serialize plan document")?;
    buf.push('\n');
    write_atomic(path, &buf)
}
