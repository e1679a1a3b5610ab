//! Job manager detection.

use std::env;
use std::fmt;

use tracing::debug;

/// How workload processes are spawned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobManager {
    /// `mpirun` from the host installation.
    Native,
    /// `srun` inside a Slurm allocation.
    Slurm,
}

impl JobManager {
    /// Launcher program and the flag that sets the rank count.
    pub fn launcher(self) -> (&'static str, &'static str) {
        match self {
            JobManager::Native => ("mpirun", "-np"),
            JobManager::Slurm => ("srun", "-n"),
        }
    }
}

impl fmt::Display for JobManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JobManager::Native => "native",
            JobManager::Slurm => "slurm",
        })
    }
}

pub trait JobManagerDetector {
    fn detect(&self) -> JobManager;
}

/// Picks Slurm when running inside an allocation, native otherwise.
pub struct EnvJobManagerDetector;

impl JobManagerDetector for EnvJobManagerDetector {
    fn detect(&self) -> JobManager {
        let manager = detect_from(env::var_os("SLURM_JOB_ID").is_some());
        debug!(%manager, "job manager detected");
        manager
    }
}

fn detect_from(in_slurm_allocation: bool) -> JobManager {
    if in_slurm_allocation {
        JobManager::Slurm
    } else {
        JobManager::Native
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slurm_allocation_selects_srun() {
        assert_eq!(detect_from(true), JobManager::Slurm);
        assert_eq!(JobManager::Slurm.launcher(), ("srun", "-n"));
    }

    #[test]
    fn defaults_to_native_mpirun() {
        assert_eq!(detect_from(false), JobManager::Native);
        assert_eq!(JobManager::Native.launcher(), ("mpirun", "-np"));
    }
}
