//! Hybrid MPI experiment runner.
//!
//! Builds an MPI implementation on the host and the same (or another)
//! version inside a container image, runs a workload across both, and
//! records whether the combination works. The crate keeps a strict split:
//!
//! - **[`core`]**: Pure, deterministic logic (naming, stage machine,
//!   provisioning decisions, pruning). No I/O.
//! - **[`io`]**: Side-effecting collaborators (settings, directories,
//!   processes, builders, launcher, diagnostics, results). Each sits behind
//!   a trait so tests can swap in scripted doubles.
//!
//! [`pipeline`] runs one experiment through its stages; [`batch`] prunes a
//! matrix against recorded results and runs what is left.

pub mod batch;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod pipeline;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
