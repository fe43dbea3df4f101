//! Deterministic, pure logic shared by the conductor commands.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! plans and documents and return deterministic outputs suitable for tests.

pub mod auto_fix;
pub mod dependencies;
pub mod progress;
pub mod scheduler;
pub mod schema;
pub mod types;
