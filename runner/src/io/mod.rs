//! Side-effecting collaborators of the pipeline.

pub mod analyzer;
pub mod builder;
pub mod config;
pub mod diagnostics;
pub mod environment;
pub mod jobmgr;
pub mod launcher;
pub mod matrix;
pub mod process;
pub mod provision;
pub mod results;
