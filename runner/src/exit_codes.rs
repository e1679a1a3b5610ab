//! Stable exit codes for `hybrid-runner` commands.

/// Command succeeded; every experiment that ran passed.
pub const OK: i32 = 0;
/// Invalid settings, matrix or arguments, or any other setup error.
pub const INVALID: i32 = 1;
/// At least one experiment failed.
pub const FAILED: i32 = 2;
/// The batch stopped on a fatal error (host uninstall failed).
pub const FATAL: i32 = 3;
