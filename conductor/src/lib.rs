//! Dependency-aware parallel build orchestration for agent-implemented plans.
//!
//! A spec directory holds an implementation plan: ordered phases with
//! position-based dependencies, each containing subtasks. Conductor validates
//! the plan, schedules eligible subtasks into concurrent agent sessions until
//! the plan completes or stalls, and previews how the resulting work branch
//! would merge back.
//!
//! - **[`core`]**: Pure, deterministic logic (schema rules, scheduling, progress).
//!   No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (filesystem, git, process execution).
//!   Isolated to enable fakes in tests.
//!
//! Orchestration modules ([`validate`], [`coordinator`], [`conflicts`], [`preview`],
//! [`branches`]) coordinate core logic with I/O to implement CLI commands.

pub mod branches;
pub mod conflicts;
pub mod coordinator;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod plan;
pub mod preview;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod validate;
