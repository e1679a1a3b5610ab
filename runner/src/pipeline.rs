//! Orchestration of a single experiment.
//!
//! [`run_experiment`] walks one [`ExperimentSpec`] through the stage machine
//! in [`crate::core::stage`]. Every external effect goes through the
//! [`Collaborators`] bundle so the pipeline can be driven with scripted
//! doubles in tests.

use tracing::{info, instrument, warn};

use crate::core::error::{FailureKind, FatalError, RunError};
use crate::core::stage::{Stage, StageTracker};
use crate::core::types::{
    ContainerConfig, ExecResult, ExperimentOutcome, ExperimentSpec, HostConfig,
};
use crate::io::analyzer::OutputAnalyzer;
use crate::io::builder::{Builder, BuilderRegistry};
use crate::io::config::Settings;
use crate::io::diagnostics::{DiagnosticSink, record_failure};
use crate::io::environment::derive_configs;
use crate::io::jobmgr::{JobManager, JobManagerDetector};
use crate::io::launcher::Launcher;
use crate::io::provision::{ImagePuller, ProvisionDeps, provision_container};

/// External collaborators used by one run.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub builders: &'a BuilderRegistry,
    pub job_managers: &'a dyn JobManagerDetector,
    pub launcher: &'a dyn Launcher,
    pub puller: &'a dyn ImagePuller,
    pub diagnostics: &'a dyn DiagnosticSink,
    pub analyzer: &'a dyn OutputAnalyzer,
}

/// What a finished run reports back to its caller.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Mirrors `outcome.pass`.
    pub success: bool,
    pub outcome: ExperimentOutcome,
    /// Raw result of the last attempted stage.
    pub exec: ExecResult,
    /// [`Stage::Done`], or the stage the run stopped in.
    pub stage: Stage,
    pub failure: Option<FailureKind>,
}

impl RunReport {
    fn stopped(
        mut outcome: ExperimentOutcome,
        exec: ExecResult,
        stages: &mut StageTracker,
        kind: FailureKind,
    ) -> Self {
        stages.fail();
        let stage = stages.failed_at().unwrap_or(Stage::Failed);
        outcome.pass = false;
        Self {
            success: false,
            outcome,
            exec,
            stage,
            failure: Some(kind),
        }
    }

    fn done(outcome: ExperimentOutcome, exec: ExecResult) -> Self {
        Self {
            success: outcome.pass,
            outcome,
            exec,
            stage: Stage::Done,
            failure: None,
        }
    }

    /// Error message of the failing stage, if any.
    pub fn error(&self) -> Option<&RunError> {
        self.exec.error.as_ref()
    }
}

/// Host installation held for the rest of a run.
///
/// Dropping the handle leaves the software installed; [`release`] removes it.
///
/// [`release`]: HostInstall::release
#[must_use = "a host installation must be released or explicitly kept"]
pub struct HostInstall<'a> {
    builder: &'a dyn Builder,
    host: &'a HostConfig,
}

impl HostInstall<'_> {
    /// Uninstall the host software.
    pub fn release(self, settings: &Settings) -> Result<(), FatalError> {
        let exec = self
            .builder
            .uninstall_host(&self.host.implem, &self.host.env, settings);
        match exec.error {
            Some(err) => Err(FatalError::Uninstall {
                implem: self.host.implem.to_string(),
                cause: err.to_string(),
            }),
            None => {
                info!(implem = %self.host.implem, "host installation removed");
                Ok(())
            }
        }
    }

    /// Keep the installation for later runs.
    pub fn keep(self) {
        info!(implem = %self.host.implem, "persistent run, keeping host installation");
    }
}

/// Install the host stack and hand back its release handle.
///
/// On failure the returned [`ExecResult`] carries the wrapped error and the
/// diagnostics have been saved once.
fn install_host<'a>(
    host: &'a HostConfig,
    container: &ContainerConfig,
    settings: &Settings,
    collab: Collaborators<'a>,
) -> Result<HostInstall<'a>, ExecResult> {
    let attempt = collab
        .builders
        .load(&host.implem)
        .map(|builder| (builder, builder.install_on_host(&host.implem, &host.env, settings)));
    let exec = match attempt {
        Ok((builder, exec)) if !exec.is_err() => {
            info!(implem = %host.implem, "MPI installed on host");
            return Ok(HostInstall { builder, host });
        }
        Ok((_, exec)) => exec,
        Err(err) => ExecResult::failed(err),
    };

    let cause = exec
        .error
        .clone()
        .unwrap_or_else(|| RunError::command("unknown install error"));
    Err(record_failure(
        collab.diagnostics,
        &host.implem,
        &container.implem,
        settings,
        ExecResult {
            error: Some(RunError::tooling(
                Stage::InstallingHost,
                "failed to install MPI on host",
                cause,
            )),
            ..exec
        },
    ))
}

/// Run one experiment through every stage.
///
/// Configuration, tooling and logical failures come back inside the report.
/// `Err` is returned only when removing the host installation fails, which
/// leaves the host in an unknown state and must stop the batch.
#[instrument(skip_all, fields(host = %spec.host, container = %spec.container_implem, app = %spec.app.name))]
pub fn run_experiment(
    spec: &ExperimentSpec,
    settings: &Settings,
    collab: Collaborators<'_>,
) -> Result<RunReport, FatalError> {
    let mut stages = StageTracker::default();
    let outcome = ExperimentOutcome::for_spec(spec);

    let (host, container) = match derive_configs(spec, settings) {
        Ok(configs) => configs,
        Err(err) => {
            warn!(%err, "configuration failed");
            return Ok(RunReport::stopped(
                outcome,
                ExecResult::failed(err),
                &mut stages,
                FailureKind::Configuration,
            ));
        }
    };

    stages.advance();
    let job_manager = collab.job_managers.detect();
    let install = match install_host(&host, &container, settings, collab) {
        Ok(install) => install,
        Err(exec) => {
            warn!(err = ?exec.error.as_ref().map(ToString::to_string), "host install failed");
            return Ok(RunReport::stopped(
                outcome,
                exec,
                &mut stages,
                FailureKind::Tooling,
            ));
        }
    };

    let ctx = RunContext {
        spec,
        host: &host,
        container: &container,
        job_manager,
        settings,
    };
    let report = run_installed(&ctx, collab, &mut stages, outcome);

    if settings.persistent {
        install.keep();
    } else {
        install.release(settings)?;
    }
    Ok(report)
}

/// Resolved inputs shared by the stages after host install.
struct RunContext<'a> {
    spec: &'a ExperimentSpec,
    host: &'a HostConfig,
    container: &'a ContainerConfig,
    job_manager: JobManager,
    settings: &'a Settings,
}

/// Stages that run while the host installation is in place.
fn run_installed(
    ctx: &RunContext<'_>,
    collab: Collaborators<'_>,
    stages: &mut StageTracker,
    outcome: ExperimentOutcome,
) -> RunReport {
    let RunContext {
        spec,
        host,
        container,
        job_manager,
        settings,
    } = *ctx;
    stages.advance();
    let deps = ProvisionDeps {
        builders: collab.builders,
        puller: collab.puller,
        diagnostics: collab.diagnostics,
    };
    if let Err(err) = provision_container(&spec.app, &host.implem, container, settings, &deps) {
        warn!(%err, "container provisioning failed");
        return RunReport::stopped(
            outcome,
            ExecResult::failed(err),
            stages,
            FailureKind::Tooling,
        );
    }

    stages.advance();
    let (mut outcome, exec) = collab.launcher.run(
        &spec.app,
        host,
        &host.env,
        container,
        job_manager,
        settings,
        &[],
    );
    if !outcome.pass {
        warn!(note = %outcome.note, "workload reported a failing outcome");
        return RunReport::stopped(outcome, exec, stages, FailureKind::Logical);
    }
    if let Some(cause) = exec.error.clone() {
        let exec = record_failure(
            collab.diagnostics,
            &host.implem,
            &container.implem,
            settings,
            ExecResult {
                error: Some(RunError::tooling(
                    Stage::Running,
                    "failed to run experiment",
                    cause,
                )),
                ..exec
            },
        );
        warn!(err = ?exec.error.as_ref().map(ToString::to_string), "experiment run failed");
        return RunReport::stopped(outcome, exec, stages, FailureKind::Tooling);
    }

    stages.advance();
    if let Err(err) = collab
        .analyzer
        .analyze(&exec, &mut outcome, &spec.app, settings)
    {
        let exec = ExecResult {
            error: Some(RunError::tooling(
                Stage::Analyzing,
                "failed to process output",
                format!("{err:#}"),
            )),
            ..exec
        };
        warn!(err = %format!("{err:#}"), "output analysis failed");
        return RunReport::stopped(outcome, exec, stages, FailureKind::Tooling);
    }

    stages.advance();
    outcome.pass = true;
    info!(note = %outcome.note, "experiment done");
    RunReport::done(outcome, exec)
}
