//! Test-only helpers: spec directories, plan documents, git repos, scripted agents.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::Path;
use std::process::Command;
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use serde_json::{Value, json};
use tempfile::TempDir;

use crate::core::types::StatusUpdate;
use crate::io::agent::{Agent, SessionReport, SessionRequest};
use crate::io::git::Git;
use crate::io::paths::{CONTEXT_FILE, PROJECT_INDEX_FILE, SPEC_FILE, SpecPaths};
use crate::io::plan_store::save_plan_document;
use crate::plan::SubtaskStatus;

/// Spec directory name used by [`SpecDir`].
pub const TEST_SPEC_NAME: &str = "001-test-feature";

/// Temporary project with a spec directory at `.conductor/specs/<TEST_SPEC_NAME>`.
pub struct SpecDir {
    temp: TempDir,
    paths: SpecPaths,
}

impl SpecDir {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("create tempdir")?;
        let dir = temp.path().join(".conductor").join("specs").join(TEST_SPEC_NAME);
        fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
        Ok(Self {
            temp,
            paths: SpecPaths::new(dir),
        })
    }

    /// The spec directory itself.
    pub fn path(&self) -> &Path {
        self.paths.dir()
    }

    pub fn project_dir(&self) -> &Path {
        self.temp.path()
    }

    pub fn paths(&self) -> &SpecPaths {
        &self.paths
    }

    pub fn write_context(&self, doc: &Value) -> Result<()> {
        write_json(&self.path().join(CONTEXT_FILE), doc)
    }

    pub fn write_spec(&self, text: &str) -> Result<()> {
        let path = self.path().join(SPEC_FILE);
        fs::write(&path, text).with_context(|| format!("write {}", path.display()))
    }

    pub fn write_plan(&self, doc: &Value) -> Result<()> {
        save_plan_document(&self.paths.plan(), doc)
    }

    pub fn read_plan(&self) -> Result<Value> {
        let raw = fs::read_to_string(self.paths.plan()).context("read plan")?;
        serde_json::from_str(&raw).context("parse plan")
    }

    pub fn write_project_index(&self) -> Result<()> {
        write_json(
            &self.path().join(PROJECT_INDEX_FILE),
            &json!({"project_type": "single", "services": {}}),
        )
    }
}

fn write_json(path: &Path, doc: &Value) -> Result<()> {
    let raw = serde_json::to_string_pretty(doc)?;
    fs::write(path, raw).with_context(|| format!("write {}", path.display()))
}

/// Single-phase feature plan with every subtask pending.
pub fn simple_plan(ids: &[&str]) -> Value {
    plan_with_phases(vec![phase(1, &[], ids)])
}

/// Phase object numbered `number`, depending on `depends_on`, with pending subtasks.
pub fn phase(number: u32, depends_on: &[u32], ids: &[&str]) -> Value {
    let subtasks: Vec<Value> = ids
        .iter()
        .map(|id| json!({"id": id, "description": format!("Implement {id}"), "status": "pending"}))
        .collect();
    let name = if number == 1 {
        "Implementation".to_string()
    } else {
        format!("Phase {number}")
    };
    json!({
        "phase": number,
        "name": name,
        "depends_on": depends_on,
        "subtasks": subtasks,
    })
}

pub fn plan_with_phases(phases: Vec<Value>) -> Value {
    json!({
        "feature": "Test feature",
        "workflow_type": "feature",
        "phases": phases,
    })
}

/// Set the status of `id` inside a plan document built by the helpers above.
pub fn set_status(plan: &mut Value, id: &str, status: &str) {
    let Some(phases) = plan["phases"].as_array_mut() else {
        return;
    };
    for phase in phases {
        let Some(subtasks) = phase["subtasks"].as_array_mut() else {
            continue;
        };
        for subtask in subtasks {
            if subtask["id"] == id {
                subtask["status"] = json!(status);
            }
        }
    }
}

/// A spec document with every required and recommended section.
pub fn full_spec_text() -> String {
    let body = "This paragraph exists so the document clears the minimum length check \
                and reads like a real specification written by a person.";
    [
        "Overview",
        "Workflow Type",
        "Task Scope",
        "Success Criteria",
        "Files to Modify",
        "Files to Reference",
        "Requirements",
        "QA Acceptance Criteria",
    ]
    .iter()
    .map(|section| format!("## {section}\n\n{body}\n"))
    .collect::<Vec<_>>()
    .join("\n")
}

/// Temporary git repository on `main` with one commit.
pub struct TestRepo {
    temp: TempDir,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("create tempdir")?;
        let repo = Self { temp };
        repo.git_cmd(&["init", "-q", "-b", "main"])?;
        repo.git_cmd(&["config", "user.name", "Conductor Tests"])?;
        repo.git_cmd(&["config", "user.email", "tests@conductor.invalid"])?;
        repo.git_cmd(&["config", "commit.gpgsign", "false"])?;
        repo.write_file("README.md", "# test repo\n")?;
        repo.commit_all("initial commit")?;
        Ok(repo)
    }

    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    pub fn git(&self) -> Git {
        Git::new(self.path())
    }

    pub fn write_file(&self, rel: &str, contents: &str) -> Result<()> {
        let path = self.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))
    }

    pub fn commit_all(&self, message: &str) -> Result<()> {
        let git = self.git();
        git.add_all()?;
        if !git.commit_staged(message)? {
            return Err(anyhow!("nothing to commit for '{message}'"));
        }
        Ok(())
    }

    /// Run an arbitrary git command in the repo and return trimmed stdout.
    pub fn git_cmd(&self, args: &[&str]) -> Result<String> {
        let out = Command::new("git")
            .args(args)
            .current_dir(self.path())
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))?;
        if !out.status.success() {
            return Err(anyhow!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&out.stderr).trim()
            ));
        }
        Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
    }
}

/// Behaviour of one scripted session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scripted {
    /// Report the session's subtask as completed.
    Complete,
    /// Succeed without reporting any status change.
    Silent,
    /// Mark the subtask in progress and stop there.
    ClaimOnly,
    /// Report the subtask as failed.
    ReportFailed,
    /// Return an error without reporting anything.
    Fail(String),
    /// Panic inside the session.
    Panic,
    /// Report another subtask as completed.
    MarkOther(String),
}

/// [`Agent`] that replays scripted behaviours per subtask id.
///
/// Each call pops the next queued behaviour for the subtask; once the queue is
/// empty the default applies.
pub struct ScriptedAgent {
    default: Scripted,
    queues: Mutex<HashMap<String, VecDeque<Scripted>>>,
    calls: Mutex<Vec<SessionRequest>>,
}

impl ScriptedAgent {
    pub fn new(default: Scripted) -> Self {
        Self {
            default,
            queues: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every session completes its subtask.
    pub fn completing() -> Self {
        Self::new(Scripted::Complete)
    }

    pub fn script(self, subtask_id: &str, behaviours: Vec<Scripted>) -> Self {
        self.queues
            .lock()
            .expect("queues lock")
            .insert(subtask_id.to_string(), behaviours.into());
        self
    }

    /// Subtask ids in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .expect("calls lock")
            .iter()
            .map(|request| request.subtask_id.clone())
            .collect()
    }

    pub fn requests(&self) -> Vec<SessionRequest> {
        self.calls.lock().expect("calls lock").clone()
    }

    fn next(&self, subtask_id: &str) -> Scripted {
        self.queues
            .lock()
            .expect("queues lock")
            .get_mut(subtask_id)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| self.default.clone())
    }
}

impl Agent for ScriptedAgent {
    fn run_session(&self, request: &SessionRequest) -> Result<SessionReport> {
        self.calls
            .lock()
            .expect("calls lock")
            .push(request.clone());
        let own = |status| SessionReport {
            transcript: format!("scripted session for {}", request.subtask_id),
            updates: vec![StatusUpdate {
                subtask_id: request.subtask_id.clone(),
                status,
            }],
        };
        match self.next(&request.subtask_id) {
            Scripted::Complete => Ok(own(SubtaskStatus::Completed)),
            Scripted::Silent => Ok(SessionReport::default()),
            Scripted::ClaimOnly => Ok(own(SubtaskStatus::InProgress)),
            Scripted::ReportFailed => Ok(own(SubtaskStatus::Failed)),
            Scripted::Fail(message) => Err(anyhow!(message)),
            Scripted::Panic => panic!("scripted panic in {}", request.subtask_id),
            Scripted::MarkOther(other) => Ok(SessionReport {
                transcript: String::new(),
                updates: vec![StatusUpdate {
                    subtask_id: other,
                    status: SubtaskStatus::Completed,
                }],
            }),
        }
    }
}

