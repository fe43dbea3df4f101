//! Per-subtask prompt builder.
//!
//! The template marks each section with `<!-- section:KEY required|droppable -->`.
//! When the rendered prompt exceeds the byte budget, droppable sections are removed
//! in a fixed order and the last remaining section is truncated as a final resort.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow};
use minijinja::{Environment, context};
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::io::attempts::RecoveryContext;
use crate::io::paths::SpecPaths;
use crate::plan::{Plan, Subtask};

const SUBTASK_TEMPLATE: &str = include_str!("prompts/subtask.md");

/// Least important first.
const DROP_ORDER: [&str; 6] = ["spec", "recovery", "task", "phase", "files", "verification"];

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->")
        .expect("section marker regex is valid")
});

#[derive(Debug, Clone, Serialize)]
struct PhaseContext {
    key: String,
    name: String,
    kind: Option<&'static str>,
}

/// Everything a subtask prompt is rendered from.
#[derive(Debug, Clone)]
pub struct PromptInputs {
    pub project_dir: PathBuf,
    pub plan_path: PathBuf,
    pub spec_path: PathBuf,
    pub subtask: Subtask,
    pub phase_key: String,
    pub phase_name: String,
    pub phase_kind: Option<&'static str>,
    /// `task_description` from the context document, when present.
    pub task_description: Option<String>,
    /// Full text of the written specification, when present.
    pub spec: Option<String>,
    /// Earlier failed attempts at this subtask.
    pub recovery: Option<RecoveryContext>,
}

impl PromptInputs {
    /// Collect inputs for `subtask_id` from the plan and the spec directory.
    pub fn load(
        paths: &SpecPaths,
        project_dir: &Path,
        plan: &Plan,
        subtask_id: &str,
    ) -> Result<Self> {
        let subtask = plan
            .find_subtask(subtask_id)
            .ok_or_else(|| anyhow!("unknown subtask '{subtask_id}'"))?
            .clone();
        let (position, phase) = plan
            .phase_of(subtask_id)
            .ok_or_else(|| anyhow!("subtask '{subtask_id}' has no phase"))?;

        Ok(Self {
            project_dir: project_dir.to_path_buf(),
            plan_path: paths.plan(),
            spec_path: paths.spec(),
            subtask,
            phase_key: phase.key(position),
            phase_name: phase.name.clone(),
            phase_kind: phase.kind.map(|kind| kind.as_str()),
            task_description: read_task_description(&paths.context())?,
            spec: read_optional(&paths.spec())?,
            recovery: None,
        })
    }
}

/// Builds subtask prompts within a byte budget.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        Self { budget_bytes }
    }

    pub fn build(&self, input: &PromptInputs) -> Result<String> {
        let rendered = render(input)?;
        let mut sections = parse_sections(&rendered);
        apply_budget(&mut sections, self.budget_bytes);
        Ok(sections
            .iter()
            .map(|s| s.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n"))
    }
}

fn render(input: &PromptInputs) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("subtask", SUBTASK_TEMPLATE)
        .context("load subtask template")?;
    let template = env.get_template("subtask")?;
    let phase = PhaseContext {
        key: input.phase_key.clone(),
        name: input.phase_name.clone(),
        kind: input.phase_kind,
    };
    let rendered = template
        .render(context! {
            project_dir => input.project_dir.display().to_string(),
            plan_path => input.plan_path.display().to_string(),
            spec_path => input.spec_path.display().to_string(),
            subtask => &input.subtask,
            phase => phase,
            task_description => non_blank(input.task_description.as_deref()),
            verification => input.subtask.verification.as_ref().map(|v| v.summary()),
            spec => non_blank(input.spec.as_deref()),
            recovery => &input.recovery,
        })
        .context("render subtask prompt")?;
    Ok(rendered)
}

fn non_blank(text: Option<&str>) -> Option<&str> {
    text.map(str::trim).filter(|s| !s.is_empty())
}

#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    content: String,
}

fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    let markers: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::new();

    for (i, caps) in markers.iter().enumerate() {
        let (Some(whole), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let end = markers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |m| m.start());
        let content = rendered[whole.end()..end].trim().to_string();
        let required = kind.as_str() == "required";
        if !content.is_empty() || required {
            sections.push(ParsedSection {
                key: key.as_str().to_string(),
                required,
                content,
            });
        }
    }
    sections
}

fn apply_budget(sections: &mut Vec<ParsedSection>, budget: usize) {
    let total_len =
        |secs: &[ParsedSection]| -> usize { secs.iter().map(|s| s.content.len()).sum() };

    for key in DROP_ORDER {
        if total_len(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }

    let total = total_len(sections);
    let Some(last) = sections.last_mut() else {
        return;
    };
    if total <= budget {
        return;
    }
    let allowed = budget.saturating_sub(total - last.content.len());
    let before_len = last.content.len();
    const MARKER: &str = "\n[truncated]";
    let keep = floor_char_boundary(&last.content, allowed.saturating_sub(MARKER.len()));
    last.content.truncate(keep);
    if allowed > MARKER.len() {
        last.content.push_str(MARKER);
    }
    debug!(
        section = last.key,
        before_len,
        after_len = last.content.len(),
        "truncated section for budget"
    );
}

fn floor_char_boundary(s: &str, index: usize) -> usize {
    let mut index = index.min(s.len());
    while !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn read_task_description(path: &Path) -> Result<Option<String>> {
    let Some(raw) = read_optional(path)? else {
        return Ok(None);
    };
    // A broken context document is reported by `validate`; the prompt just omits it.
    let Ok(value) = serde_json::from_str::<Value>(&raw) else {
        return Ok(None);
    };
    Ok(value
        .get("task_description")
        .and_then(Value::as_str)
        .map(str::to_string))
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("read prompt input {}", path.display()))?;
    Ok(Some(contents))
}
