//! Stable exit codes for conductor CLI commands.

/// Command succeeded, or the build completed every subtask.
pub const OK: i32 = 0;
/// Validation failed, or the command errored (bad plan, config, git, I/O).
pub const INVALID: i32 = 1;
/// `conductor run` stopped with nothing eligible and the plan incomplete.
pub const STALLED: i32 = 3;
/// `conductor run` used up `max_iterations` without completing the plan.
pub const EXHAUSTED: i32 = 4;
