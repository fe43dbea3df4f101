//! Build progress summary derived from plan statuses.

use serde::Serialize;

use crate::core::scheduler::eligible_subtasks;
use crate::plan::{Plan, SubtaskStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseProgress {
    pub key: String,
    pub name: String,
    pub completed: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct BuildProgress {
    pub pending: Vec<String>,
    pub in_progress: Vec<String>,
    pub completed: Vec<String>,
    pub failed: Vec<String>,
    pub blocked: Vec<String>,
    /// Pending subtasks whose phase dependencies are met right now.
    pub eligible: Vec<String>,
    pub phases: Vec<PhaseProgress>,
    /// More than one subtask is pending.
    pub can_parallelize: bool,
}

impl BuildProgress {
    pub fn from_plan(plan: &Plan) -> Self {
        let mut progress = Self::default();
        for subtask in plan.subtasks() {
            let bucket = match subtask.status {
                SubtaskStatus::Pending => &mut progress.pending,
                SubtaskStatus::InProgress => &mut progress.in_progress,
                SubtaskStatus::Completed => &mut progress.completed,
                SubtaskStatus::Failed => &mut progress.failed,
                SubtaskStatus::Blocked => &mut progress.blocked,
            };
            bucket.push(subtask.id.clone());
        }

        progress.eligible = eligible_subtasks(plan)
            .into_iter()
            .map(|subtask| subtask.id.clone())
            .collect();
        progress.phases = plan
            .phases
            .iter()
            .enumerate()
            .map(|(position, phase)| PhaseProgress {
                key: phase.key(position),
                name: phase.name.clone(),
                completed: phase
                    .subtasks
                    .iter()
                    .filter(|s| s.status == SubtaskStatus::Completed)
                    .count(),
                total: phase.subtasks.len(),
            })
            .collect();
        progress.can_parallelize = progress.pending.len() > 1;
        progress
    }

    pub fn total(&self) -> usize {
        self.pending.len()
            + self.in_progress.len()
            + self.completed.len()
            + self.failed.len()
            + self.blocked.len()
    }
}
