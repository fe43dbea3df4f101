//! Eligibility and batching of subtasks.
//!
//! Eligibility is re-derived from the plan every round. Batching groups subtasks by a
//! coarse id-prefix key and chunks each group to `max_parallel`; it does not look at
//! declared file overlap.

use std::collections::HashMap;

use crate::plan::{Plan, Subtask, SubtaskStatus};

/// Upper bound on concurrent sessions regardless of configuration.
pub const MAX_PARALLEL_LIMIT: usize = 10;
pub const DEFAULT_GROUP: &str = "default";

/// Clamp a requested parallelism to `1..=MAX_PARALLEL_LIMIT`.
pub fn clamp_parallel(requested: usize) -> usize {
    requested.clamp(1, MAX_PARALLEL_LIMIT)
}

/// Pending subtasks whose owning phase is runnable, in plan order.
///
/// A phase is runnable when every phase it depends on has all subtasks completed.
/// A dependency naming no existing phase is treated as satisfied; the validator
/// reports it separately.
pub fn eligible_subtasks(plan: &Plan) -> Vec<&Subtask> {
    let mut complete: HashMap<String, bool> = HashMap::new();
    for (position, phase) in plan.phases.iter().enumerate() {
        complete.insert(phase.key(position), phase.is_complete());
    }

    plan.phases
        .iter()
        .filter(|phase| {
            phase
                .depends_on
                .iter()
                .all(|dep| complete.get(&dep.key()).copied().unwrap_or(true))
        })
        .flat_map(|phase| phase.subtasks.iter())
        .filter(|subtask| subtask.status == SubtaskStatus::Pending)
        .collect()
}

/// Grouping key: the id prefix before the first `-`, or [`DEFAULT_GROUP`].
pub fn group_key(subtask_id: &str) -> &str {
    match subtask_id.split_once('-') {
        Some((prefix, _)) => prefix,
        None => DEFAULT_GROUP,
    }
}

/// Split subtasks into batches of at most `max_parallel`, never mixing groups.
///
/// Groups are emitted in discovery order; members keep their input order.
/// A `max_parallel` of zero is treated as one.
pub fn batch<'a>(subtasks: &[&'a Subtask], max_parallel: usize) -> Vec<Vec<&'a Subtask>> {
    let size = max_parallel.max(1);
    let mut order: Vec<&str> = Vec::new();
    let mut groups: HashMap<&str, Vec<&'a Subtask>> = HashMap::new();
    for subtask in subtasks {
        let key = group_key(&subtask.id);
        groups
            .entry(key)
            .or_insert_with(|| {
                order.push(key);
                Vec::new()
            })
            .push(*subtask);
    }

    let mut batches = Vec::new();
    for key in order {
        if let Some(members) = groups.remove(key) {
            batches.extend(members.chunks(size).map(|chunk| chunk.to_vec()));
        }
    }
    batches
}
