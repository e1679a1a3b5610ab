//! Pipeline stage machine.
//!
//! Stages advance strictly forward; any stage may drop to [`Stage::Failed`],
//! which is terminal.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Configuring,
    InstallingHost,
    ProvisioningContainer,
    Running,
    Analyzing,
    Done,
    Failed,
}

impl Stage {
    /// The stage that follows a successful `self`. Terminal stages have none.
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Configuring => Some(Stage::InstallingHost),
            Stage::InstallingHost => Some(Stage::ProvisioningContainer),
            Stage::ProvisioningContainer => Some(Stage::Running),
            Stage::Running => Some(Stage::Analyzing),
            Stage::Analyzing => Some(Stage::Done),
            Stage::Done | Stage::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Done | Stage::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Configuring => "configuring",
            Stage::InstallingHost => "installing-host",
            Stage::ProvisioningContainer => "provisioning-container",
            Stage::Running => "running",
            Stage::Analyzing => "analyzing",
            Stage::Done => "done",
            Stage::Failed => "failed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks the current stage of one run and refuses to move backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageTracker {
    current: Stage,
    failed_at: Option<Stage>,
}

impl Default for StageTracker {
    fn default() -> Self {
        Self {
            current: Stage::Configuring,
            failed_at: None,
        }
    }
}

impl StageTracker {
    pub fn current(&self) -> Stage {
        self.current
    }

    /// Stage that was active when the run failed, if it failed.
    pub fn failed_at(&self) -> Option<Stage> {
        self.failed_at
    }

    /// Move to the next stage. Returns the new stage, or `None` if terminal.
    pub fn advance(&mut self) -> Option<Stage> {
        let next = self.current.next()?;
        self.current = next;
        Some(next)
    }

    pub fn fail(&mut self) {
        if !self.current.is_terminal() {
            self.failed_at = Some(self.current);
            self.current = Stage::Failed;
        }
    }
}
