//! Agent abstraction for subtask sessions.
//!
//! The [`Agent`] trait decouples the coordinator from the actual agent backend
//! (an external CLI by default). A session never touches the coordinator's plan: it
//! works against a private copy of the plan document and reports the final status
//! of its own subtask as a [`StatusUpdate`]. Tests use scripted agents that return
//! predetermined reports without spawning processes.

use std::path::PathBuf;
use std::process::Command;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::types::StatusUpdate;
use crate::io::config::AgentConfig;
use crate::io::plan_store::load_plan;
use crate::io::process::run_command_with_timeout;

/// Environment variable carrying the session's plan copy path.
pub const PLAN_PATH_ENV: &str = "CONDUCTOR_PLAN_PATH";
/// Environment variable carrying the session's subtask id.
pub const SUBTASK_ID_ENV: &str = "CONDUCTOR_SUBTASK_ID";

/// Parameters for one agent session.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub subtask_id: String,
    /// Prompt text fed to the agent.
    pub prompt: String,
    /// Working directory for the session (the project checkout).
    pub workdir: PathBuf,
    /// Session-private copy of the plan document the agent may rewrite.
    pub plan_path: PathBuf,
    /// Where to stream the session transcript, if anywhere.
    pub transcript_path: Option<PathBuf>,
}

/// What a finished session hands back to the coordinator.
#[derive(Debug, Clone, Default)]
pub struct SessionReport {
    pub transcript: String,
    /// Proposed status changes. The coordinator ignores any that name another subtask.
    pub updates: Vec<StatusUpdate>,
}

/// Abstraction over agent execution backends.
///
/// Implementations are called from blocking worker threads, several at a time.
pub trait Agent: Send + Sync {
    fn run_session(&self, request: &SessionRequest) -> Result<SessionReport>;
}

/// Agent that spawns the configured command with the prompt on stdin.
#[derive(Debug, Clone)]
pub struct CommandAgent {
    config: AgentConfig,
}

impl CommandAgent {
    pub fn new(config: AgentConfig) -> Self {
        Self { config }
    }
}

impl Agent for CommandAgent {
    #[instrument(
        skip_all,
        fields(subtask = %request.subtask_id, timeout_secs = self.config.timeout_secs)
    )]
    fn run_session(&self, request: &SessionRequest) -> Result<SessionReport> {
        let (program, args) = self
            .config
            .command
            .split_first()
            .ok_or_else(|| anyhow!("agent.command is empty"))?;
        info!(workdir = %request.workdir.display(), program = %program, "starting agent session");

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(&request.workdir)
            .env(PLAN_PATH_ENV, &request.plan_path)
            .env(SUBTASK_ID_ENV, &request.subtask_id);

        let output = run_command_with_timeout(
            cmd,
            Some(request.prompt.as_bytes()),
            self.config.timeout(),
            self.config.output_limit_bytes,
            request.transcript_path.as_deref(),
        )
        .with_context(|| format!("run agent for {}", request.subtask_id))?;

        if output.timed_out {
            warn!("agent session timed out");
            return Err(anyhow!(
                "agent session timed out after {}s",
                self.config.timeout_secs
            ));
        }
        if !output.success() {
            warn!(exit_code = ?output.status.code(), "agent session failed");
            return Err(anyhow!(
                "agent exited with status {:?}",
                output.status.code()
            ));
        }

        let plan = load_plan(&request.plan_path).context("read session plan copy")?;
        let updates = plan
            .find_subtask(&request.subtask_id)
            .map(|subtask| StatusUpdate {
                subtask_id: subtask.id.clone(),
                status: subtask.status,
            })
            .into_iter()
            .collect::<Vec<_>>();
        debug!(updates = updates.len(), "agent session finished");

        Ok(SessionReport {
            transcript: output.transcript(),
            updates,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::io::plan_store::save_plan_document;
    use crate::plan::SubtaskStatus;
    use serde_json::json;
    use std::path::Path;

    fn seed_plan(path: &Path, status: &str) {
        save_plan_document(
            path,
            &json!({"feature": "f", "workflow_type": "simple", "phases": [
                {"phase": 1, "name": "P", "subtasks": [
                    {"id": "api-1", "description": "d", "status": status}
                ]}
            ]}),
        )
        .expect("seed plan");
    }

    fn agent(script: &str) -> CommandAgent {
        CommandAgent::new(AgentConfig {
            command: vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            timeout_secs: 10,
            output_limit_bytes: 10_000,
        })
    }

    fn request(root: &Path) -> SessionRequest {
        SessionRequest {
            subtask_id: "api-1".to_string(),
            prompt: "do the thing\n".to_string(),
            workdir: root.to_path_buf(),
            plan_path: root.join("session").join("implementation_plan.json"),
            transcript_path: Some(root.join("session").join("transcript.log")),
        }
    }

    #[test]
    fn reports_status_written_to_plan_copy() {
        let temp = tempfile::tempdir().expect("tempdir");
        let request = request(temp.path());
        seed_plan(&request.plan_path, "pending");
        seed_plan(&temp.path().join("done.json"), "completed");

        let report = agent(r#"cat; cp done.json "$CONDUCTOR_PLAN_PATH""#)
            .run_session(&request)
            .expect("session");

        assert_eq!(
            report.updates,
            vec![StatusUpdate {
                subtask_id: "api-1".to_string(),
                status: SubtaskStatus::Completed,
            }]
        );
        assert!(report.transcript.contains("do the thing"));
        let transcript = std::fs::read_to_string(temp.path().join("session").join("transcript.log"))
            .expect("transcript");
        assert!(transcript.contains("do the thing"));
    }

    #[test]
    fn non_zero_exit_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let request = request(temp.path());
        seed_plan(&request.plan_path, "pending");

        let err = agent("cat >/dev/null; exit 3")
            .run_session(&request)
            .expect_err("should fail");
        assert!(err.to_string().contains("status Some(3)"));
    }
}
