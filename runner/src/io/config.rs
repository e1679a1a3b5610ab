//! Runner settings stored in `hybrid-runner.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::types::Workload;

/// Default settings file name, looked up in the working directory.
pub const SETTINGS_FILE: &str = "hybrid-runner.toml";

/// Runner settings (TOML).
///
/// Loaded once and passed by reference to every stage; nothing mutates it
/// during a run. Missing fields default to values that work on a plain
/// Linux host with Singularity installed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    /// Keep host installs after a run instead of uninstalling them.
    pub persistent: bool,

    /// Directory receiving results files and error records.
    pub output_dir: PathBuf,

    pub workload: WorkloadConfig,
    pub container: ContainerRuntimeConfig,
    pub limits: LimitsConfig,

    /// Builders keyed by implementation id (matched case-insensitively).
    pub builders: BTreeMap<String, BuilderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkloadConfig {
    /// Run the NetPIPE benchmark.
    pub netpipe: bool,
    /// Run the Intel MPI Benchmarks. Takes precedence over `netpipe` for
    /// results file naming.
    pub imb: bool,
    /// Number of ranks to launch.
    pub ranks: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ContainerRuntimeConfig {
    /// Container runtime binary.
    pub runtime: String,
    /// The user may build images (e.g. has sudo).
    pub build_privilege: bool,
    /// Build without privilege (fakeroot); also allows building.
    pub nopriv: bool,
    /// Registry holding pre-built images, e.g. `library://hpc/mpi`.
    pub registry: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LimitsConfig {
    /// Wall-clock budget for each external command, in seconds.
    pub command_timeout_secs: u64,
    /// Captured stdout/stderr beyond this many bytes is discarded.
    pub output_limit_bytes: usize,
}

/// Commands used by the default builder for one implementation.
///
/// Every argument is a minijinja template; see `io::builder` for the
/// variables available.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BuilderConfig {
    pub install: Vec<String>,
    pub uninstall: Vec<String>,
    /// Container definition file template.
    pub definition: String,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            netpipe: false,
            imb: false,
            ranks: 2,
        }
    }
}

impl Default for ContainerRuntimeConfig {
    fn default() -> Self {
        Self {
            runtime: "singularity".to_string(),
            build_privilege: false,
            nopriv: false,
            registry: "library://hybrid-runner/mpi".to_string(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: 2 * 60 * 60,
            output_limit_bytes: 1_000_000,
        }
    }
}

const DEFINITION_TEMPLATE: &str = r#"Bootstrap: docker
From: {{ distro }}

%files
    {{ app_source }} /opt/app-src

%post
    {{ package_install }}
    mkdir -p /tmp/mpi && cd /tmp/mpi
    wget -q {{ url }} && tar -xf $(basename {{ url }})
    cd {{ id | lower }}-{{ version }} && ./configure --prefix=/opt/mpi && make -j install
    cd /opt/app-src && PATH=/opt/mpi/bin:$PATH mpicc -o {{ app_bin }} *.c

%environment
    export PATH=/opt/mpi/bin:$PATH
    export LD_LIBRARY_PATH=/opt/mpi/lib:$LD_LIBRARY_PATH
"#;

fn default_builder() -> BuilderConfig {
    BuilderConfig {
        install: vec![
            "sh".to_string(),
            "-c".to_string(),
            "cd {{ build_dir }} && wget -q {{ url }} && tar -xf $(basename {{ url }}) \
             && cd {{ id | lower }}-{{ version }} \
             && ./configure --prefix={{ install_dir }} && make -j install"
                .to_string(),
        ],
        uninstall: vec![
            "rm".to_string(),
            "-rf".to_string(),
            "{{ install_dir }}".to_string(),
        ],
        definition: DEFINITION_TEMPLATE.to_string(),
    }
}

impl Default for Settings {
    fn default() -> Self {
        let mut builders = BTreeMap::new();
        builders.insert("openmpi".to_string(), default_builder());
        builders.insert("mpich".to_string(), default_builder());
        Self {
            persistent: false,
            output_dir: PathBuf::from("results"),
            workload: WorkloadConfig::default(),
            container: ContainerRuntimeConfig::default(),
            limits: LimitsConfig::default(),
            builders,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if self.limits.command_timeout_secs == 0 {
            return Err(anyhow!("limits.command_timeout_secs must be > 0"));
        }
        if self.limits.output_limit_bytes == 0 {
            return Err(anyhow!("limits.output_limit_bytes must be > 0"));
        }
        if self.workload.ranks == 0 {
            return Err(anyhow!("workload.ranks must be > 0"));
        }
        if self.container.runtime.trim().is_empty() {
            return Err(anyhow!("container.runtime must be non-empty"));
        }
        if self.container.registry.trim().is_empty() {
            return Err(anyhow!("container.registry must be non-empty"));
        }
        for (id, builder) in &self.builders {
            if builder.install.is_empty() || builder.install[0].trim().is_empty() {
                return Err(anyhow!("builders.{id}.install must be a non-empty array"));
            }
            if builder.uninstall.is_empty() || builder.uninstall[0].trim().is_empty() {
                return Err(anyhow!("builders.{id}.uninstall must be a non-empty array"));
            }
        }
        Ok(())
    }

    /// Images may be built locally rather than pulled.
    pub fn build_allowed(&self) -> bool {
        self.container.build_privilege || self.container.nopriv
    }

    pub fn workload(&self) -> Workload {
        Workload::from_flags(self.workload.netpipe, self.workload.imb)
    }
}

/// Load settings from a TOML file.
///
/// If the file is missing, returns `Settings::default()`.
pub fn load_settings(path: &Path) -> Result<Settings> {
    if !path.exists() {
        let settings = Settings::default();
        settings.validate()?;
        return Ok(settings);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let settings: Settings =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    settings.validate()?;
    Ok(settings)
}

/// Atomically write settings to disk (temp file + rename).
pub fn write_settings(path: &Path, settings: &Settings) -> Result<()> {
    settings.validate()?;
    let mut buf = toml::to_string_pretty(settings).context("serialize settings toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

/// Write `contents` to a sibling temp file, then rename it over `path`.
pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    if !parent.as_os_str().is_empty() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let settings = load_settings(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(SETTINGS_FILE);
        let mut settings = Settings::default();
        settings.persistent = true;
        settings.workload.imb = true;
        write_settings(&path, &settings).expect("write");
        let loaded = load_settings(&path).expect("load");
        assert_eq!(loaded, settings);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(SETTINGS_FILE);
        fs::write(&path, "[container]\nbuild_privilege = true\n").expect("write");
        let settings = load_settings(&path).expect("load");
        assert!(settings.build_allowed());
        assert_eq!(settings.container.runtime, "singularity");
        assert!(settings.builders.contains_key("openmpi"));
    }

    #[test]
    fn rejects_zero_timeout() {
        let mut settings = Settings::default();
        settings.limits.command_timeout_secs = 0;
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("command_timeout_secs"));
    }

    #[test]
    fn rejects_builder_without_install_command() {
        let mut settings = Settings::default();
        settings
            .builders
            .insert("custom".to_string(), BuilderConfig::default());
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("builders.custom.install"));
    }

    #[test]
    fn nopriv_allows_building() {
        let mut settings = Settings::default();
        assert!(!settings.build_allowed());
        settings.container.nopriv = true;
        assert!(settings.build_allowed());
    }
}
