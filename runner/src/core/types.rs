//! Shared data model for experiments.
//!
//! These types carry no I/O. An [`ExperimentSpec`] is read-only input to the
//! pipeline; resolved configs are derived from it per run, and only the
//! [`ExperimentOutcome`] outlives a run.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::error::RunError;

/// Identity of a software implementation (e.g. `OpenMPI 4.0.0`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImplemInfo {
    pub id: String,
    pub version: String,
    /// Source tarball location. Empty when unknown.
    #[serde(default)]
    pub url: String,
}

impl ImplemInfo {
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
            url: String::new(),
        }
    }
}

impl fmt::Display for ImplemInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.id, self.version)
    }
}

/// Directories used to build and install one software stack.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildEnv {
    pub build_dir: PathBuf,
    pub scratch_dir: PathBuf,
    pub install_dir: PathBuf,
}

/// How software is laid out inside a container image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackagingModel {
    /// MPI inside the container, launched by the host MPI.
    #[default]
    Hybrid,
}

impl PackagingModel {
    pub fn as_str(self) -> &'static str {
        match self {
            PackagingModel::Hybrid => "hybrid",
        }
    }
}

/// Container descriptor as supplied by the experiment matrix.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Target distribution, e.g. `ubuntu:disco`.
    pub distro: String,
    #[serde(default)]
    pub model: PackagingModel,
}

/// Workload to run against both stacks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppInfo {
    pub name: String,
    /// Binary path inside the container image.
    pub bin_path: String,
    /// Where the builder fetches the application source from.
    #[serde(default)]
    pub source: String,
    /// Regex the workload stdout must match for the output to be accepted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_output: Option<String>,
}

/// One unit of work: a host stack, a container stack and a workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentSpec {
    pub host: ImplemInfo,
    pub container_implem: ImplemInfo,
    pub container: ContainerSpec,
    pub host_env: BuildEnv,
    pub container_env: BuildEnv,
    pub app: AppInfo,
}

/// Resolved configuration for the host side of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    pub implem: ImplemInfo,
    pub env: BuildEnv,
}

/// Fully qualified container image descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedContainer {
    /// Image file name, e.g. `ubuntu_disco-openmpi-4.0.0-init-test-hybrid.sif`.
    pub name: String,
    /// `install_dir/name`.
    pub path: PathBuf,
    /// Pre-built image location used when the image is pulled.
    pub url: String,
    pub build_dir: PathBuf,
    pub install_dir: PathBuf,
    pub distro: String,
    pub model: PackagingModel,
}

/// Resolved configuration for the container side of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerConfig {
    pub implem: ImplemInfo,
    pub env: BuildEnv,
    pub container: ResolvedContainer,
}

/// Outcome of a low-level external action (install, build, run).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    pub error: Option<RunError>,
}

impl ExecResult {
    pub fn ok(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            error: None,
        }
    }

    /// A failed action with no captured output.
    pub fn failed(error: RunError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    pub fn is_err(&self) -> bool {
        self.error.is_some()
    }
}

/// Durable result of one experiment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentOutcome {
    pub pass: bool,
    pub host: ImplemInfo,
    pub container: ImplemInfo,
    #[serde(default)]
    pub note: String,
}

impl ExperimentOutcome {
    /// A not-yet-passed outcome carrying the identities of `spec`.
    pub fn for_spec(spec: &ExperimentSpec) -> Self {
        Self {
            pass: false,
            host: spec.host.clone(),
            container: spec.container_implem.clone(),
            note: String::new(),
        }
    }
}

/// Workload family selected in settings; picks the results file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Workload {
    Init,
    NetPipe,
    Imb,
}

impl Workload {
    /// IMB takes precedence when both selectors are set.
    pub fn from_flags(netpipe: bool, imb: bool) -> Self {
        if imb {
            Workload::Imb
        } else if netpipe {
            Workload::NetPipe
        } else {
            Workload::Init
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Workload::Init => "init",
            Workload::NetPipe => "netpipe",
            Workload::Imb => "imb",
        }
    }
}
