//! Build-loop tests driving the coordinator with scripted agents.
//!
//! Each test seeds a plan in a temporary spec directory, runs the coordinator
//! with zero delays, and checks both the returned outcome and the persisted plan.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{Result, anyhow};
use conductor::coordinator::{BuildSettings, BuildStop, Coordinator};
use conductor::core::types::StatusUpdate;
use conductor::io::agent::{Agent, SessionReport, SessionRequest};
use conductor::io::attempts::{ATTEMPT_HISTORY_FILE, load_attempt_history};
use conductor::io::plan_store::{load_plan, save_plan};
use conductor::plan::SubtaskStatus;
use conductor::test_support::{
    Scripted, ScriptedAgent, SpecDir, phase, plan_with_phases, set_status, simple_plan,
};

fn settings(spec: &SpecDir, max_parallel: usize, max_iterations: u32) -> BuildSettings {
    BuildSettings {
        max_parallel,
        max_iterations,
        batch_delay: Duration::ZERO,
        iteration_delay: Duration::ZERO,
        prompt_budget_bytes: 40_000,
        session_dir: spec.project_dir().join(".conductor").join("sessions"),
    }
}

fn coordinator<A: Agent + 'static>(
    spec: &SpecDir,
    agent: &Arc<A>,
    settings: BuildSettings,
) -> Coordinator<A> {
    Coordinator::new(
        spec.paths().clone(),
        spec.project_dir(),
        Arc::clone(agent),
        settings,
    )
}

/// Completes its subtask by editing the session's plan copy, like an external agent.
/// Tracks how many sessions are live at once.
#[derive(Default)]
struct PlanEditingAgent {
    live: AtomicUsize,
    max_live: AtomicUsize,
}

impl Agent for PlanEditingAgent {
    fn run_session(&self, request: &SessionRequest) -> Result<SessionReport> {
        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live.fetch_max(live, Ordering::SeqCst);

        let mut plan = load_plan(&request.plan_path)?;
        plan.set_status(&request.subtask_id, SubtaskStatus::Completed);
        save_plan(&request.plan_path, &plan)?;
        thread::sleep(Duration::from_millis(100));
        let status = load_plan(&request.plan_path)?
            .find_subtask(&request.subtask_id)
            .ok_or_else(|| anyhow!("subtask vanished from plan copy"))?
            .status;

        self.live.fetch_sub(1, Ordering::SeqCst);
        Ok(SessionReport {
            transcript: String::new(),
            updates: vec![StatusUpdate {
                subtask_id: request.subtask_id.clone(),
                status,
            }],
        })
    }
}

fn status_of(spec: &SpecDir, id: &str) -> SubtaskStatus {
    load_plan(&spec.paths().plan())
        .expect("load plan")
        .find_subtask(id)
        .expect("subtask present")
        .status
}

#[tokio::test]
async fn already_complete_plan_launches_nothing() {
    let spec = SpecDir::new().expect("spec dir");
    let mut plan = simple_plan(&["api-1"]);
    set_status(&mut plan, "api-1", "completed");
    spec.write_plan(&plan).expect("plan");
    let agent = Arc::new(ScriptedAgent::completing());

    let outcome = coordinator(&spec, &agent, settings(&spec, 3, 5))
        .run(|_| {})
        .await
        .expect("run");

    assert!(outcome.success());
    assert_eq!(outcome.iterations, 0);
    assert_eq!(outcome.sessions_launched, 0);
    assert!(agent.calls().is_empty());
}

#[tokio::test]
async fn phases_run_in_dependency_order() {
    let spec = SpecDir::new().expect("spec dir");
    spec.write_plan(&plan_with_phases(vec![
        phase(1, &[], &["setup-1"]),
        phase(2, &[1], &["api-1", "api-2"]),
    ]))
    .expect("plan");
    let agent = Arc::new(ScriptedAgent::completing());

    let mut seen = Vec::new();
    let outcome = coordinator(&spec, &agent, settings(&spec, 3, 10))
        .run(|report| seen.push((report.iteration, report.outcomes.len(), report.batches)))
        .await
        .expect("run");

    assert_eq!(outcome.stop, BuildStop::Complete);
    assert_eq!(outcome.iterations, 2);
    assert_eq!(outcome.sessions_launched, 3);
    assert_eq!(seen, vec![(1, 1, 1), (2, 2, 1)]);

    let calls = agent.calls();
    assert_eq!(calls[0], "setup-1");
    let mut second: Vec<_> = calls[1..].to_vec();
    second.sort();
    assert_eq!(second, vec!["api-1", "api-2"]);

    let plan = load_plan(&spec.paths().plan()).expect("load plan");
    assert!(plan.is_complete());
    assert!(plan.created_at.is_some());
    assert!(plan.updated_at.is_some());
}

#[tokio::test]
async fn session_without_status_change_is_retried() {
    let spec = SpecDir::new().expect("spec dir");
    spec.write_plan(&simple_plan(&["api-1"])).expect("plan");
    let agent = Arc::new(ScriptedAgent::completing().script("api-1", vec![Scripted::Silent]));

    let outcome = coordinator(&spec, &agent, settings(&spec, 3, 5))
        .run(|_| {})
        .await
        .expect("run");

    assert!(outcome.success());
    assert_eq!(agent.calls(), vec!["api-1", "api-1"]);
    let first = &outcome.reports[0].outcomes[0];
    assert!(!first.success);
    assert!(
        first
            .error
            .as_deref()
            .is_some_and(|e| e.contains("not marked completed"))
    );
    assert!(outcome.reports[1].outcomes[0].success);
}

#[tokio::test]
async fn failed_session_does_not_block_siblings() {
    let spec = SpecDir::new().expect("spec dir");
    spec.write_plan(&simple_plan(&["api-1", "api-2"])).expect("plan");
    let agent = Arc::new(
        ScriptedAgent::completing()
            .script("api-1", vec![Scripted::Fail("agent crashed".to_string())]),
    );

    let outcome = coordinator(&spec, &agent, settings(&spec, 3, 1))
        .run(|_| {})
        .await
        .expect("run");

    assert_eq!(
        outcome.stop,
        BuildStop::IterationsExhausted {
            max_iterations: 1,
            incomplete: vec!["api-1".to_string()],
        }
    );
    let report = &outcome.reports[0];
    assert_eq!(report.completed(), 1);
    assert_eq!(report.failed(), 1);
    let failed = report
        .outcomes
        .iter()
        .find(|o| o.subtask_id == "api-1")
        .expect("api-1 outcome");
    assert!(failed.error.as_deref().is_some_and(|e| e.contains("agent crashed")));

    assert_eq!(status_of(&spec, "api-1"), SubtaskStatus::Pending);
    assert_eq!(status_of(&spec, "api-2"), SubtaskStatus::Completed);
}

#[tokio::test]
async fn panicking_session_is_recorded_and_retried() {
    let spec = SpecDir::new().expect("spec dir");
    spec.write_plan(&simple_plan(&["api-1"])).expect("plan");
    let agent = Arc::new(ScriptedAgent::completing().script("api-1", vec![Scripted::Panic]));

    let outcome = coordinator(&spec, &agent, settings(&spec, 3, 3))
        .run(|_| {})
        .await
        .expect("run");

    assert!(outcome.success());
    let first = &outcome.reports[0].outcomes[0];
    assert!(
        first
            .error
            .as_deref()
            .is_some_and(|e| e.starts_with("session task failed"))
    );
}

#[tokio::test]
async fn updates_for_other_subtasks_are_ignored() {
    let spec = SpecDir::new().expect("spec dir");
    spec.write_plan(&simple_plan(&["api-1", "api-2"])).expect("plan");
    let agent = Arc::new(
        ScriptedAgent::completing()
            .script("api-1", vec![Scripted::MarkOther("api-2".to_string())]),
    );

    let outcome = coordinator(&spec, &agent, settings(&spec, 1, 1))
        .run(|_| {})
        .await
        .expect("run");

    assert_eq!(agent.calls(), vec!["api-1"]);
    assert_eq!(
        outcome.stop,
        BuildStop::IterationsExhausted {
            max_iterations: 1,
            incomplete: vec!["api-1".to_string(), "api-2".to_string()],
        }
    );
    assert_eq!(status_of(&spec, "api-2"), SubtaskStatus::Pending);
}

#[tokio::test]
async fn failed_dependency_phase_stalls_the_build() {
    let spec = SpecDir::new().expect("spec dir");
    spec.write_plan(&plan_with_phases(vec![
        phase(1, &[], &["setup-1"]),
        phase(2, &[1], &["api-1"]),
    ]))
    .expect("plan");
    let agent =
        Arc::new(ScriptedAgent::completing().script("setup-1", vec![Scripted::ReportFailed]));

    let outcome = coordinator(&spec, &agent, settings(&spec, 3, 10))
        .run(|_| {})
        .await
        .expect("run");

    assert_eq!(outcome.iterations, 1);
    assert_eq!(
        outcome.stop,
        BuildStop::Stalled {
            pending: vec!["api-1".to_string()],
            incomplete: vec!["setup-1".to_string(), "api-1".to_string()],
        }
    );
    assert_eq!(status_of(&spec, "setup-1"), SubtaskStatus::Failed);
}

#[tokio::test]
async fn groups_split_into_separate_batches() {
    let spec = SpecDir::new().expect("spec dir");
    spec.write_plan(&simple_plan(&["api-1", "web-1", "api-2"])).expect("plan");
    let agent = Arc::new(ScriptedAgent::completing());

    let outcome = coordinator(&spec, &agent, settings(&spec, 3, 5))
        .run(|_| {})
        .await
        .expect("run");

    assert!(outcome.success());
    assert_eq!(outcome.iterations, 1);
    assert_eq!(outcome.reports[0].batches, 2);
    let ids: Vec<_> = outcome.reports[0]
        .outcomes
        .iter()
        .map(|o| o.subtask_id.as_str())
        .collect();
    assert_eq!(ids, vec!["api-1", "api-2", "web-1"]);
}

#[tokio::test]
async fn sessions_get_private_plan_copy_and_prompt() {
    let spec = SpecDir::new().expect("spec dir");
    spec.write_plan(&simple_plan(&["api-1"])).expect("plan");
    let agent = Arc::new(ScriptedAgent::completing());

    coordinator(&spec, &agent, settings(&spec, 3, 5))
        .run(|_| {})
        .await
        .expect("run");

    let requests = agent.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_ne!(request.plan_path, spec.paths().plan());
    assert!(request.plan_path.exists());
    assert!(request.prompt.contains("api-1"));
    assert!(
        request
            .prompt
            .contains(&request.plan_path.display().to_string())
    );
    assert_eq!(request.workdir, spec.project_dir());
}

#[tokio::test]
async fn claimed_but_unfinished_subtask_stalls_the_build() {
    let spec = SpecDir::new().expect("spec dir");
    spec.write_plan(&simple_plan(&["api-1"])).expect("plan");
    let agent = Arc::new(ScriptedAgent::new(Scripted::ClaimOnly));

    let outcome = coordinator(&spec, &agent, settings(&spec, 3, 10))
        .run(|_| {})
        .await
        .expect("run");

    assert_eq!(outcome.iterations, 1);
    assert_eq!(
        outcome.stop,
        BuildStop::Stalled {
            pending: vec![],
            incomplete: vec!["api-1".to_string()],
        }
    );
    assert_eq!(status_of(&spec, "api-1"), SubtaskStatus::InProgress);
}

#[tokio::test]
async fn blocked_subtask_stalls_once_siblings_finish() {
    let spec = SpecDir::new().expect("spec dir");
    let mut plan = simple_plan(&["api-1", "api-2"]);
    set_status(&mut plan, "api-1", "blocked");
    spec.write_plan(&plan).expect("plan");
    let agent = Arc::new(ScriptedAgent::completing());

    let outcome = coordinator(&spec, &agent, settings(&spec, 3, 10))
        .run(|_| {})
        .await
        .expect("run");

    assert_eq!(agent.calls(), vec!["api-2"]);
    assert_eq!(outcome.iterations, 1);
    assert_eq!(
        outcome.stop,
        BuildStop::Stalled {
            pending: vec![],
            incomplete: vec!["api-1".to_string()],
        }
    );
}

#[tokio::test]
async fn sessions_in_a_batch_run_concurrently() {
    let spec = SpecDir::new().expect("spec dir");
    spec.write_plan(&simple_plan(&["api-1", "api-2", "api-3"])).expect("plan");
    let agent = Arc::new(PlanEditingAgent::default());

    let outcome = coordinator(&spec, &agent, settings(&spec, 3, 5))
        .run(|_| {})
        .await
        .expect("run");

    assert!(outcome.success());
    assert_eq!(outcome.reports[0].batches, 1);
    assert_eq!(agent.max_live.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn similar_ids_get_separate_session_dirs() {
    let spec = SpecDir::new().expect("spec dir");
    spec.write_plan(&simple_plan(&["1.1", "1_1"])).expect("plan");
    let agent = Arc::new(PlanEditingAgent::default());

    let outcome = coordinator(&spec, &agent, settings(&spec, 2, 1))
        .run(|_| {})
        .await
        .expect("run");

    assert_eq!(outcome.stop, BuildStop::Complete);
    assert_eq!(outcome.reports[0].completed(), 2);
    assert_eq!(agent.max_live.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn retried_session_prompt_carries_previous_error() {
    let spec = SpecDir::new().expect("spec dir");
    spec.write_plan(&simple_plan(&["api-1"])).expect("plan");
    let agent = Arc::new(
        ScriptedAgent::completing()
            .script("api-1", vec![Scripted::Fail("pytest api: 2 failed".to_string())]),
    );
    let settings = settings(&spec, 3, 5);
    let history_path = settings.session_dir.join(ATTEMPT_HISTORY_FILE);

    let outcome = coordinator(&spec, &agent, settings)
        .run(|_| {})
        .await
        .expect("run");

    assert!(outcome.success());
    let requests = agent.requests();
    assert_eq!(requests.len(), 2);
    assert!(!requests[0].prompt.contains("### Previous Attempts"));
    assert!(requests[1].prompt.contains("### Previous Attempts"));
    assert!(requests[1].prompt.contains("- pytest api: 2 failed"));

    let history = load_attempt_history(&history_path).expect("history");
    assert_eq!(history.attempt_count("api-1"), 2);
    assert!(!history.subtasks["api-1"][0].success);
    assert!(history.subtasks["api-1"][1].success);
}
