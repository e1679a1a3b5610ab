//! Experiment matrix files.
//!
//! A matrix names one implementation, the versions to test on the host and
//! in the container, and the workload. It expands to the cartesian product
//! of host and container versions.
//!
//! ```toml
//! [experiment]
//! implementation = "OpenMPI"
//! host_versions = ["4.0.0", "3.1.4"]
//! container_versions = ["4.0.0"]
//! distro = "ubuntu:disco"
//! base_dir = "/scratch/hybrid-runner"
//! url_template = "https://download.open-mpi.org/release/open-mpi/v{{ major_minor }}/openmpi-{{ version }}.tar.bz2"
//!
//! [app]
//! name = "init-test"
//! bin_path = "/opt/app/init-test"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use minijinja::{Environment, context};
use serde::{Deserialize, Serialize};

use crate::core::types::{
    AppInfo, BuildEnv, ContainerSpec, ExperimentSpec, ImplemInfo, PackagingModel,
};
use crate::io::config::write_atomic;

pub const MATRIX_FILE: &str = "matrix.toml";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MatrixFile {
    pub experiment: MatrixExperiment,
    pub app: AppInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MatrixExperiment {
    pub implementation: String,
    pub host_versions: Vec<String>,
    pub container_versions: Vec<String>,
    pub distro: String,
    /// Root for per-version build, scratch and install directories.
    pub base_dir: PathBuf,
    /// Source tarball URL template; sees `id`, `version` and `major_minor`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_template: Option<String>,
}

impl MatrixFile {
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("read matrix {}", path.display()))?;
        let matrix: MatrixFile = toml::from_str(&contents)
            .with_context(|| format!("parse matrix {}", path.display()))?;
        matrix
            .validate()
            .with_context(|| format!("validate matrix {}", path.display()))?;
        Ok(matrix)
    }

    fn validate(&self) -> Result<()> {
        let exp = &self.experiment;
        if exp.implementation.trim().is_empty() {
            bail!("experiment.implementation must be non-empty");
        }
        if exp.host_versions.is_empty() {
            bail!("experiment.host_versions must be a non-empty array");
        }
        if exp.container_versions.is_empty() {
            bail!("experiment.container_versions must be a non-empty array");
        }
        if exp.distro.trim().is_empty() {
            bail!("experiment.distro must be non-empty");
        }
        if self.app.name.trim().is_empty() {
            bail!("app.name must be non-empty");
        }
        if self.app.bin_path.trim().is_empty() {
            bail!("app.bin_path must be non-empty");
        }
        Ok(())
    }

    /// Expand into one spec per (host version, container version) pair,
    /// host-major order.
    pub fn expand(&self) -> Result<Vec<ExperimentSpec>> {
        let exp = &self.experiment;
        let mut specs = Vec::with_capacity(exp.host_versions.len() * exp.container_versions.len());
        for host_version in &exp.host_versions {
            for container_version in &exp.container_versions {
                specs.push(ExperimentSpec {
                    host: self.implem(host_version)?,
                    container_implem: self.implem(container_version)?,
                    container: ContainerSpec {
                        distro: exp.distro.clone(),
                        model: PackagingModel::Hybrid,
                    },
                    host_env: build_env(&exp.base_dir.join("host"), host_version),
                    container_env: build_env(&exp.base_dir.join("container"), container_version),
                    app: self.app.clone(),
                });
            }
        }
        Ok(specs)
    }

    fn implem(&self, version: &str) -> Result<ImplemInfo> {
        let mut implem = ImplemInfo::new(&self.experiment.implementation, version);
        if let Some(template) = &self.experiment.url_template {
            implem.url = Environment::new()
                .render_str(
                    template,
                    context! {
                        id => &implem.id,
                        version => version,
                        major_minor => major_minor(version),
                    },
                )
                .with_context(|| format!("render url_template for {version}"))?;
        }
        Ok(implem)
    }
}

fn build_env(root: &Path, version: &str) -> BuildEnv {
    let dir = root.join(version);
    BuildEnv {
        build_dir: dir.join("build"),
        scratch_dir: dir.join("scratch"),
        install_dir: dir.join("install"),
    }
}

/// `4.0.2` -> `4.0`; versions without a dot are returned unchanged.
fn major_minor(version: &str) -> &str {
    match version.match_indices('.').nth(1) {
        Some((index, _)) => &version[..index],
        None => version,
    }
}

/// Serialize `matrix` to `path` as TOML.
pub fn write_matrix(path: &Path, matrix: &MatrixFile) -> Result<()> {
    let mut buf = toml::to_string_pretty(matrix).context("serialize matrix toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

/// Matrix written by `hybrid-runner init`.
pub fn sample_matrix(base_dir: &Path) -> MatrixFile {
    MatrixFile {
        experiment: MatrixExperiment {
            implementation: "OpenMPI".to_string(),
            host_versions: vec!["4.0.0".to_string()],
            container_versions: vec!["4.0.0".to_string(), "3.1.4".to_string()],
            distro: "ubuntu:disco".to_string(),
            base_dir: base_dir.to_path_buf(),
            url_template: Some(
                "https://download.open-mpi.org/release/open-mpi/v{{ major_minor }}/openmpi-{{ version }}.tar.bz2"
                    .to_string(),
            ),
        },
        app: AppInfo {
            name: "init-test".to_string(),
            bin_path: "/opt/app/init-test".to_string(),
            source: "apps/init-test".to_string(),
            expected_output: None,
        },
    }
}
