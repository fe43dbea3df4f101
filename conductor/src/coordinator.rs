//! Build coordinator: repeated scheduling rounds over the plan.
//!
//! Each iteration re-derives the eligible subtasks from the persisted plan, takes up
//! to `max_parallel` of them, and runs them batch by batch. Sessions within a batch run
//! concurrently on blocking worker threads and hand their proposed status changes back
//! over a channel. The coordinator is the only writer of the plan document: after a
//! batch it reloads the plan, applies the updates serially, and saves it.
//!
//! Outcomes are also appended to the attempt history, so a retried subtask's prompt
//! carries the errors of its earlier attempts.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::core::scheduler::{batch, clamp_parallel, eligible_subtasks};
use crate::core::types::{SessionOutcome, StatusUpdate};
use crate::io::agent::{Agent, SessionRequest};
use crate::io::attempts::{
    ATTEMPT_HISTORY_FILE, AttemptHistory, load_attempt_history, write_attempt_history,
};
use crate::io::config::ConductorConfig;
use crate::io::paths::{PLAN_FILE, SpecPaths};
use crate::io::plan_store::{load_plan, save_plan};
use crate::io::prompt::{PromptBuilder, PromptInputs};
use crate::plan::{Plan, SubtaskStatus};

const NOT_MARKED_COMPLETED: &str = "session finished but subtask is not marked completed";

/// Knobs for one build, resolved from [`ConductorConfig`] and CLI overrides.
#[derive(Debug, Clone)]
pub struct BuildSettings {
    /// Sessions per iteration, already clamped to `1..=10`.
    pub max_parallel: usize,
    pub max_iterations: u32,
    pub batch_delay: Duration,
    pub iteration_delay: Duration,
    pub prompt_budget_bytes: usize,
    /// Root for per-session plan copies, transcripts and the attempt history.
    pub session_dir: PathBuf,
}

impl BuildSettings {
    pub fn from_config(cfg: &ConductorConfig, project_dir: &Path, spec_name: &str) -> Self {
        Self {
            max_parallel: clamp_parallel(cfg.max_parallel),
            max_iterations: cfg.max_iterations,
            batch_delay: cfg.batch_delay(),
            iteration_delay: cfg.iteration_delay(),
            prompt_budget_bytes: cfg.prompt_budget_bytes,
            session_dir: project_dir
                .join(&cfg.bookkeeping_dir)
                .join("sessions")
                .join(spec_name),
        }
    }
}

/// Reason the build loop stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BuildStop {
    /// Every subtask is `completed`.
    Complete,
    /// Nothing is eligible but the plan is incomplete.
    Stalled {
        /// Pending subtasks held back by unmet dependencies.
        pending: Vec<String>,
        /// Every subtask that is not `completed`.
        incomplete: Vec<String>,
    },
    /// `max_iterations` rounds ran without completing the plan.
    IterationsExhausted {
        max_iterations: u32,
        incomplete: Vec<String>,
    },
}

/// Bookkeeping for one scheduling round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IterationReport {
    pub iteration: u32,
    pub eligible: usize,
    pub batches: usize,
    pub outcomes: Vec<SessionOutcome>,
}

impl IterationReport {
    pub fn launched(&self) -> usize {
        self.outcomes.len()
    }

    pub fn completed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.success).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.completed()
    }
}

/// Summary of a build invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildOutcome {
    pub iterations: u32,
    pub sessions_launched: usize,
    pub stop: BuildStop,
    pub reports: Vec<IterationReport>,
}

impl BuildOutcome {
    pub fn success(&self) -> bool {
        self.stop == BuildStop::Complete
    }
}

/// Drives a plan to completion through an [`Agent`].
pub struct Coordinator<A> {
    paths: SpecPaths,
    project_dir: PathBuf,
    agent: Arc<A>,
    settings: BuildSettings,
}

impl<A: Agent + 'static> Coordinator<A> {
    pub fn new(
        paths: SpecPaths,
        project_dir: impl Into<PathBuf>,
        agent: Arc<A>,
        settings: BuildSettings,
    ) -> Self {
        Self {
            paths,
            project_dir: project_dir.into(),
            agent,
            settings,
        }
    }

    /// Run iterations until the plan completes, stalls, or `max_iterations` is reached.
    ///
    /// Session failures never abort the loop. Errors are returned only for plan I/O
    /// (unreadable or malformed plan document) and prompt generation.
    #[instrument(
        skip_all,
        fields(
            spec_dir = %self.paths.dir().display(),
            max_parallel = self.settings.max_parallel
        )
    )]
    pub async fn run<F: FnMut(&IterationReport)>(
        &self,
        mut on_iteration: F,
    ) -> Result<BuildOutcome> {
        let plan_path = self.paths.plan();
        let mut reports = Vec::new();
        let mut sessions_launched = 0usize;

        for iteration in 1..=self.settings.max_iterations {
            let plan = load_plan(&plan_path)?;
            if plan.is_complete() {
                info!(iteration, "plan complete");
                return Ok(finish(iteration - 1, sessions_launched, BuildStop::Complete, reports));
            }

            let eligible = eligible_subtasks(&plan);
            if eligible.is_empty() {
                let stop = stalled(&plan);
                warn!(iteration, ?stop, "no eligible subtasks, build stalled");
                return Ok(finish(iteration - 1, sessions_launched, stop, reports));
            }

            let round = &eligible[..eligible.len().min(self.settings.max_parallel)];
            let batches: Vec<Vec<String>> = batch(round, self.settings.max_parallel)
                .into_iter()
                .map(|members| members.into_iter().map(|s| s.id.clone()).collect())
                .collect();
            info!(
                iteration,
                eligible = eligible.len(),
                launching = round.len(),
                batches = batches.len(),
                "starting iteration"
            );

            let mut outcomes = Vec::new();
            for (index, ids) in batches.iter().enumerate() {
                if index > 0 {
                    tokio::time::sleep(self.settings.batch_delay).await;
                }
                sessions_launched += ids.len();
                outcomes.extend(self.run_batch(ids).await?);
            }

            let report = IterationReport {
                iteration,
                eligible: eligible.len(),
                batches: batches.len(),
                outcomes,
            };
            if report.failed() > 0 {
                warn!(iteration, failed = report.failed(), "subtasks failed this iteration");
            }
            on_iteration(&report);
            reports.push(report);

            if iteration < self.settings.max_iterations {
                tokio::time::sleep(self.settings.iteration_delay).await;
            }
        }

        let plan = load_plan(&plan_path)?;
        let stop = if plan.is_complete() {
            BuildStop::Complete
        } else {
            BuildStop::IterationsExhausted {
                max_iterations: self.settings.max_iterations,
                incomplete: plan.incomplete_ids(),
            }
        };
        Ok(finish(self.settings.max_iterations, sessions_launched, stop, reports))
    }

    /// Run one batch concurrently and fold the results back into the plan.
    #[instrument(skip_all, fields(batch = ?ids))]
    async fn run_batch(&self, ids: &[String]) -> Result<Vec<SessionOutcome>> {
        let plan_path = self.paths.plan();
        let history_path = self.settings.session_dir.join(ATTEMPT_HISTORY_FILE);
        let mut history = load_attempt_history(&history_path)?;
        let snapshot = load_plan(&plan_path)?;
        let requests = ids
            .iter()
            .enumerate()
            .map(|(index, id)| self.prepare_session(&snapshot, &history, index, id))
            .collect::<Result<Vec<_>>>()?;

        let (tx, mut rx) = mpsc::unbounded_channel::<StatusUpdate>();
        let handles = requests.into_iter().map(|request| {
            let agent = Arc::clone(&self.agent);
            let tx = tx.clone();
            tokio::task::spawn_blocking(move || {
                let report = agent.run_session(&request)?;
                for update in report.updates {
                    if update.subtask_id != request.subtask_id {
                        warn!(
                            session = %request.subtask_id,
                            target = %update.subtask_id,
                            "ignoring status update for another subtask"
                        );
                        continue;
                    }
                    // The receiver outlives every session in the batch.
                    let _ = tx.send(update);
                }
                Ok::<(), anyhow::Error>(())
            })
        });
        let joined = join_all(handles).await;
        drop(tx);

        let mut session_errors: HashMap<&str, String> = HashMap::new();
        for (id, result) in ids.iter().zip(joined) {
            let error = match result {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => format!("{err:#}"),
                Err(join_err) => format!("session task failed: {join_err}"),
            };
            warn!(subtask = %id, error = %error, "session failed");
            session_errors.insert(id.as_str(), error);
        }

        let mut updates = Vec::new();
        while let Ok(update) = rx.try_recv() {
            updates.push(update);
        }

        let mut plan = load_plan(&plan_path)?;
        for update in &updates {
            if !plan.set_status(&update.subtask_id, update.status) {
                warn!(subtask = %update.subtask_id, "status update for unknown subtask");
            }
        }
        plan.touch(&Utc::now().to_rfc3339());
        save_plan(&plan_path, &plan)?;
        debug!(applied = updates.len(), "plan updated after batch");

        let outcomes: Vec<SessionOutcome> = ids
            .iter()
            .map(|id| {
                let completed = plan
                    .find_subtask(id)
                    .is_some_and(|s| s.status == SubtaskStatus::Completed);
                let error = match session_errors.remove(id.as_str()) {
                    Some(error) => Some(error),
                    None if completed => None,
                    None => Some(NOT_MARKED_COMPLETED.to_string()),
                };
                SessionOutcome {
                    subtask_id: id.clone(),
                    success: error.is_none(),
                    error,
                }
            })
            .collect();

        let finished_at = Utc::now().to_rfc3339();
        for outcome in &outcomes {
            history.record(outcome, &finished_at);
        }
        write_attempt_history(&history_path, &history)?;
        Ok(outcomes)
    }

    fn prepare_session(
        &self,
        plan: &Plan,
        history: &AttemptHistory,
        index: usize,
        subtask_id: &str,
    ) -> Result<SessionRequest> {
        let dir = self.settings.session_dir.join(session_dir_name(index, subtask_id));
        let plan_copy = dir.join(PLAN_FILE);
        save_plan(&plan_copy, plan)
            .with_context(|| format!("write session plan for {subtask_id}"))?;

        let mut input = PromptInputs::load(&self.paths, &self.project_dir, plan, subtask_id)?;
        input.plan_path = plan_copy.clone();
        input.recovery = history.recovery(subtask_id);
        debug!(
            subtask = subtask_id,
            attempt = history.attempt_count(subtask_id) + 1,
            "preparing session"
        );
        let prompt = PromptBuilder::new(self.settings.prompt_budget_bytes)
            .build(&input)
            .with_context(|| format!("build prompt for {subtask_id}"))?;

        Ok(SessionRequest {
            subtask_id: subtask_id.to_string(),
            prompt,
            workdir: self.project_dir.clone(),
            plan_path: plan_copy,
            transcript_path: Some(dir.join("transcript.log")),
        })
    }
}

fn stalled(plan: &Plan) -> BuildStop {
    BuildStop::Stalled {
        pending: plan
            .subtasks()
            .filter(|s| s.status == SubtaskStatus::Pending)
            .map(|s| s.id.clone())
            .collect(),
        incomplete: plan.incomplete_ids(),
    }
}

fn finish(
    iterations: u32,
    sessions_launched: usize,
    stop: BuildStop,
    reports: Vec<IterationReport>,
) -> BuildOutcome {
    BuildOutcome {
        iterations,
        sessions_launched,
        stop,
        reports,
    }
}

/// `<batch position>-<path-safe id>`; the position keeps ids that sanitize alike apart.
fn session_dir_name(index: usize, subtask_id: &str) -> String {
    let safe: String = subtask_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_') { c } else { '_' })
        .collect();
    format!("{index:02}-{safe}")
}

/// Run the coordinator to completion on a fresh multi-threaded runtime.
pub fn run_blocking<A: Agent + 'static, F: FnMut(&IterationReport)>(
    coordinator: &Coordinator<A>,
    on_iteration: F,
) -> Result<BuildOutcome> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("start async runtime")?;
    runtime.block_on(coordinator.run(on_iteration))
}
