//! I/O helpers for conductor commands.

pub mod agent;
pub mod attempts;
pub mod config;
pub mod fs;
pub mod git;
pub mod paths;
pub mod plan_store;
pub mod process;
pub mod prompt;
