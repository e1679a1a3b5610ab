//! Persistence of failure details.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::types::{ExecResult, ImplemInfo};
use crate::io::config::Settings;

/// Receives details about tooling failures.
pub trait DiagnosticSink {
    fn save(
        &self,
        host: &ImplemInfo,
        container: &ImplemInfo,
        settings: &Settings,
        exec: &ExecResult,
    ) -> Result<()>;
}

/// Error record written by [`FileDiagnostics`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorRecord {
    pub recorded_at: String,
    pub host: ImplemInfo,
    pub container: ImplemInfo,
    pub error: Option<String>,
    pub stdout: String,
    pub stderr: String,
}

/// Writes one JSON record per host/container pair under `<output_dir>/errors/`.
///
/// A later failure for the same pair replaces the earlier record.
pub struct FileDiagnostics;

impl FileDiagnostics {
    pub fn record_path(output_dir: &Path, host: &ImplemInfo, container: &ImplemInfo) -> PathBuf {
        output_dir.join("errors").join(format!(
            "{}-{}_{}-{}.json",
            host.id, host.version, container.id, container.version
        ))
    }
}

impl DiagnosticSink for FileDiagnostics {
    fn save(
        &self,
        host: &ImplemInfo,
        container: &ImplemInfo,
        settings: &Settings,
        exec: &ExecResult,
    ) -> Result<()> {
        let path = Self::record_path(&settings.output_dir, host, container);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create errors dir {}", parent.display()))?;
        }
        let record = ErrorRecord {
            recorded_at: Utc::now().to_rfc3339(),
            host: host.clone(),
            container: container.clone(),
            error: exec.error.as_ref().map(ToString::to_string),
            stdout: exec.stdout.clone(),
            stderr: exec.stderr.clone(),
        };
        let mut buf = serde_json::to_string_pretty(&record).context("serialize error record")?;
        buf.push('\n');
        fs::write(&path, buf).with_context(|| format!("write {}", path.display()))?;
        debug!(path = %path.display(), "error details saved");
        Ok(())
    }
}

/// Persist `exec` through `sink`, noting a persistence failure on its error.
///
/// The original error is kept either way.
pub fn record_failure(
    sink: &dyn DiagnosticSink,
    host: &ImplemInfo,
    container: &ImplemInfo,
    settings: &Settings,
    mut exec: ExecResult,
) -> ExecResult {
    if let Err(err) = sink.save(host, container, settings, &exec) {
        warn!(err = %format!("{err:#}"), "failed to save error details");
        exec.error = exec
            .error
            .map(|original| original.with_persist_failure(format!("{err:#}")));
    }
    exec
}
