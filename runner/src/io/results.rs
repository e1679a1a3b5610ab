//! Results file storage.
//!
//! One line per experiment:
//! `<host version>\t<container version>\t<PASS|FAIL>\t<note>`.
//! The implementation id is implied by the file name.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result, bail};
use tracing::debug;

use crate::core::types::{ExperimentOutcome, ImplemInfo};

const PASS: &str = "PASS";
const FAIL: &str = "FAIL";

/// Load recorded outcomes. A missing file means no results yet.
pub fn load_results(path: &Path, implem_id: &str) -> Result<Vec<ExperimentOutcome>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let results = contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            parse_line(line, implem_id)
                .with_context(|| format!("{}:{}", path.display(), index + 1))
        })
        .collect::<Result<Vec<_>>>()?;
    debug!(path = %path.display(), count = results.len(), "results loaded");
    Ok(results)
}

/// Append one outcome, creating the file and its directory if needed.
pub fn append_result(path: &Path, outcome: &ExperimentOutcome) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("create results dir {}", parent.display()))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;
    writeln!(file, "{}", format_line(outcome))
        .with_context(|| format!("append to {}", path.display()))?;
    Ok(())
}

fn format_line(outcome: &ExperimentOutcome) -> String {
    let note = outcome.note.replace(['\t', '\n', '\r'], " ");
    format!(
        "{}\t{}\t{}\t{}",
        outcome.host.version,
        outcome.container.version,
        if outcome.pass { PASS } else { FAIL },
        note
    )
}

fn parse_line(line: &str, implem_id: &str) -> Result<ExperimentOutcome> {
    let mut fields = line.splitn(4, '\t');
    let (Some(host), Some(container), Some(status)) = (fields.next(), fields.next(), fields.next())
    else {
        bail!("expected at least 3 tab-separated fields");
    };
    let pass = match status {
        PASS => true,
        FAIL => false,
        other => bail!("unknown status '{other}'"),
    };
    Ok(ExperimentOutcome {
        pass,
        host: ImplemInfo::new(implem_id, host),
        container: ImplemInfo::new(implem_id, container),
        note: fields.next().unwrap_or_default().to_string(),
    })
}
