//! Error taxonomy for experiment runs.
//!
//! Configuration and tooling errors travel inside [`ExecResult`] so the
//! captured output stays attached to them. A logical failure is not an error
//! at all: the outcome simply does not pass. [`FatalError`] is reserved for
//! failures that happen after a result was produced and must stop the batch.
//!
//! [`ExecResult`]: crate::core::types::ExecResult

use std::fmt;

use thiserror::Error;

use crate::core::stage::Stage;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunError {
    /// Raw failure reported by an external command or collaborator.
    #[error("{0}")]
    Command(String),

    /// Directory creation or config derivation failed.
    #[error("failed to set experiment's configuration: {0}")]
    Configuration(String),

    /// Builder lookup by implementation id failed.
    #[error("no builder registered for implementation '{0}'")]
    NoBuilder(String),

    /// Install, build, pull, run or analysis failed.
    #[error("{context}: {cause}{}", persist_suffix(.persist_error))]
    Tooling {
        stage: Stage,
        context: String,
        cause: String,
        /// Set when saving the diagnostic record for this failure also failed.
        persist_error: Option<String>,
    },
}

fn persist_suffix(persist_error: &Option<String>) -> String {
    match persist_error {
        Some(err) => format!(" (failed to save error details: {err})"),
        None => String::new(),
    }
}

impl RunError {
    pub fn command(message: impl fmt::Display) -> Self {
        RunError::Command(message.to_string())
    }

    pub fn tooling(stage: Stage, context: impl Into<String>, cause: impl fmt::Display) -> Self {
        RunError::Tooling {
            stage,
            context: context.into(),
            cause: cause.to_string(),
            persist_error: None,
        }
    }

    /// Record that persisting diagnostics for this error failed.
    ///
    /// Only tooling errors carry the note; other variants are returned as-is.
    pub fn with_persist_failure(self, err: impl fmt::Display) -> Self {
        match self {
            RunError::Tooling {
                stage,
                context,
                cause,
                ..
            } => RunError::Tooling {
                stage,
                context,
                cause,
                persist_error: Some(err.to_string()),
            },
            other => other,
        }
    }
}

/// How a run failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Aborted before any install or build work.
    Configuration,
    /// An external tool failed; diagnostics were persisted.
    Tooling,
    /// The workload itself reported a failing outcome.
    Logical,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureKind::Configuration => "configuration",
            FailureKind::Tooling => "tooling",
            FailureKind::Logical => "logical",
        })
    }
}

/// Failure that cannot be represented in a returned outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FatalError {
    #[error("failed to uninstall {implem} from host: {cause}")]
    Uninstall { implem: String, cause: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tooling_error_wraps_context_and_cause() {
        let err = RunError::tooling(
            Stage::InstallingHost,
            "failed to install MPI on host",
            RunError::command("make exited with status 2"),
        );
        assert_eq!(
            err.to_string(),
            "failed to install MPI on host: make exited with status 2"
        );
    }

    #[test]
    fn persist_failure_is_appended_to_message() {
        let err = RunError::tooling(Stage::Running, "failed to run experiment", "timed out")
            .with_persist_failure("disk full");
        let message = err.to_string();
        assert!(message.starts_with("failed to run experiment: timed out"));
        assert!(message.ends_with("(failed to save error details: disk full)"));
    }

    #[test]
    fn persist_failure_leaves_other_variants_untouched() {
        let err = RunError::Configuration("failed to create /x".to_string());
        assert_eq!(err.clone().with_persist_failure("nope"), err);
    }
}
