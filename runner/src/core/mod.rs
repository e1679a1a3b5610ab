//! Deterministic, pure logic shared by the runner.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod error;
pub mod naming;
pub mod provision;
pub mod pruning;
pub mod resolve;
pub mod stage;
pub mod types;
