//! Batch driver: prune already-recorded experiments, run the rest.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{error, info, instrument, warn};

use crate::core::error::FatalError;
use crate::core::naming::output_filename;
use crate::core::pruning::{common_implementation, foreign_family, is_covered, prune};
use crate::core::types::ExperimentSpec;
use crate::io::config::Settings;
use crate::io::results::{append_result, load_results};
use crate::pipeline::{Collaborators, RunReport, run_experiment};

/// Specs that still need to run, plus where their results go.
#[derive(Debug, Clone)]
pub struct BatchPlan {
    pub results_path: PathBuf,
    pub pending: Vec<ExperimentSpec>,
    pub skipped: usize,
}

/// Totals for one batch.
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Set when the batch stopped early.
    pub fatal: Option<FatalError>,
    pub reports: Vec<RunReport>,
}

/// Load recorded results and drop every spec they already cover.
pub fn plan_batch(specs: &[ExperimentSpec], settings: &Settings) -> Result<BatchPlan> {
    let implem = common_implementation(specs).context("plan batch")?;
    for spec in foreign_family(specs, &implem.id) {
        warn!(
            host = %spec.host,
            container = %spec.container_implem,
            expected = %implem.id,
            "experiment uses a different implementation than the batch"
        );
    }

    let results_path = settings
        .output_dir
        .join(output_filename(&implem.id, settings.workload()));
    let existing = load_results(&results_path, &implem.id)?;
    for spec in specs.iter().filter(|spec| is_covered(spec, &existing)) {
        info!(
            host = %spec.host.version,
            container = %spec.container_implem.version,
            "result already recorded, skipping"
        );
    }
    let pending = prune(specs, &existing);
    Ok(BatchPlan {
        skipped: specs.len() - pending.len(),
        results_path,
        pending,
    })
}

/// Run every pending experiment in order and append each outcome.
///
/// A [`FatalError`] stops the batch; outcomes recorded before it are kept.
#[instrument(skip_all, fields(count = specs.len()))]
pub fn run_batch(
    specs: &[ExperimentSpec],
    settings: &Settings,
    collab: Collaborators<'_>,
) -> Result<BatchSummary> {
    let plan = plan_batch(specs, settings)?;
    let mut summary = BatchSummary {
        skipped: plan.skipped,
        ..BatchSummary::default()
    };

    for spec in &plan.pending {
        let report = match run_experiment(spec, settings, collab) {
            Ok(report) => report,
            Err(fatal) => {
                error!(%fatal, "stopping batch");
                summary.fatal = Some(fatal);
                break;
            }
        };
        append_result(&plan.results_path, &report.outcome)?;
        if report.success {
            summary.passed += 1;
        } else {
            summary.failed += 1;
        }
        summary.reports.push(report);
    }

    info!(
        passed = summary.passed,
        failed = summary.failed,
        skipped = summary.skipped,
        results = %plan.results_path.display(),
        "batch finished"
    );
    Ok(summary)
}
