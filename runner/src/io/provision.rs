//! Container image provisioning: skip, build or pull.

use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{info, instrument};

use crate::core::error::RunError;
use crate::core::provision::{ProvisionAction, decide};
use crate::core::stage::Stage;
use crate::core::types::{
    AppInfo, ContainerConfig, ExecResult, ImplemInfo, ResolvedContainer,
};
use crate::io::builder::BuilderRegistry;
use crate::io::config::Settings;
use crate::io::diagnostics::{DiagnosticSink, record_failure};
use crate::io::process::{describe, run_command};

/// Fetches pre-built images.
pub trait ImagePuller {
    fn pull(
        &self,
        container: &ResolvedContainer,
        implem: &ImplemInfo,
        settings: &Settings,
    ) -> Result<()>;
}

/// Pulls with `<runtime> pull <path> <url>`.
pub struct RuntimePuller;

impl ImagePuller for RuntimePuller {
    #[instrument(skip_all, fields(url = %container.url))]
    fn pull(
        &self,
        container: &ResolvedContainer,
        implem: &ImplemInfo,
        settings: &Settings,
    ) -> Result<()> {
        let mut cmd = Command::new(&settings.container.runtime);
        cmd.arg("pull").arg(&container.path).arg(&container.url);
        info!(command = %describe(&cmd), %implem, "pulling container image");

        let timeout = Duration::from_secs(settings.limits.command_timeout_secs);
        let output = run_command(cmd, timeout, settings.limits.output_limit_bytes)
            .context("run image pull")?;
        if let Some(reason) = output.failure_reason("image pull", timeout) {
            return Err(anyhow!("{reason}: {}", output.stderr_text().trim()));
        }
        Ok(())
    }
}

/// Collaborators the provisioner may call.
pub struct ProvisionDeps<'a> {
    pub builders: &'a BuilderRegistry,
    pub puller: &'a dyn ImagePuller,
    pub diagnostics: &'a dyn DiagnosticSink,
}

/// Make the container image for `container` available.
///
/// Returns the action taken. A half-built image is left in place for
/// inspection.
#[instrument(skip_all, fields(image = %container.container.path.display()))]
pub fn provision_container(
    app: &AppInfo,
    host: &ImplemInfo,
    container: &ContainerConfig,
    settings: &Settings,
    deps: &ProvisionDeps<'_>,
) -> Result<ProvisionAction, RunError> {
    let image = &container.container;
    let action = decide(settings.build_allowed(), image.path.exists());
    match action {
        ProvisionAction::Skip => {
            info!("{} already exists, skipping build", image.path.display());
        }
        ProvisionAction::Build => {
            let exec = build_image(app, container, settings, deps.builders);
            if let Some(cause) = exec.error.clone() {
                let exec = record_failure(
                    deps.diagnostics,
                    host,
                    &container.implem,
                    settings,
                    ExecResult {
                        error: Some(RunError::tooling(
                            Stage::ProvisioningContainer,
                            "failed to create container",
                            cause,
                        )),
                        ..exec
                    },
                );
                return Err(exec.error.unwrap_or_else(|| {
                    RunError::command("failed to create container")
                }));
            }
        }
        ProvisionAction::Pull => {
            deps.puller
                .pull(image, &container.implem, settings)
                .map_err(|err| {
                    RunError::tooling(
                        Stage::ProvisioningContainer,
                        "failed to pull container",
                        format!("{err:#}"),
                    )
                })?;
        }
    }
    Ok(action)
}

/// Generate the definition file, then build the image from it.
fn build_image(
    app: &AppInfo,
    container: &ContainerConfig,
    settings: &Settings,
    builders: &BuilderRegistry,
) -> ExecResult {
    let builder = match builders.load(&container.implem) {
        Ok(builder) => builder,
        Err(err) => return ExecResult::failed(err),
    };

    info!("creating MPI container");
    if let Err(err) = builder.generate_definition_file(
        app,
        &container.implem,
        &container.env,
        &container.container,
        settings,
    ) {
        let stderr = format!("failed to generate definition file: {err:#}");
        return ExecResult {
            error: Some(RunError::command(&stderr)),
            stdout: String::new(),
            stderr,
        };
    }

    if let Err(err) = builder.create_image(&container.container, settings) {
        let stderr = format!("failed to create container image: {err:#}");
        return ExecResult {
            error: Some(RunError::command(&stderr)),
            stdout: String::new(),
            stderr,
        };
    }

    ExecResult::default()
}
