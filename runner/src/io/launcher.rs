//! Workload launcher.

use std::ffi::OsString;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::core::error::RunError;
use crate::core::types::{
    AppInfo, BuildEnv, ContainerConfig, ExecResult, ExperimentOutcome, HostConfig,
};
use crate::io::config::Settings;
use crate::io::jobmgr::JobManager;
use crate::io::process::{describe, run_command};

/// Spawns the workload and observes it.
///
/// The returned outcome's `pass` is the workload's own verdict. When the
/// launch itself fails (spawn error, timeout) there is no verdict: `pass`
/// stays `true` and the [`ExecResult`] carries the error instead.
pub trait Launcher {
    #[allow(clippy::too_many_arguments)]
    fn run(
        &self,
        app: &AppInfo,
        host: &HostConfig,
        host_env: &BuildEnv,
        container: &ContainerConfig,
        job_manager: JobManager,
        settings: &Settings,
        extra_args: &[String],
    ) -> (ExperimentOutcome, ExecResult);
}

/// Runs `mpirun`/`srun` from the host stack around `<runtime> exec <image>`.
pub struct MpiLauncher;

impl MpiLauncher {
    fn command(
        app: &AppInfo,
        host_env: &BuildEnv,
        container: &ContainerConfig,
        job_manager: JobManager,
        settings: &Settings,
        extra_args: &[String],
    ) -> Command {
        let (program, ranks_flag) = job_manager.launcher();
        let host_bin = host_env.install_dir.join("bin");
        let mut cmd = match job_manager {
            JobManager::Native if host_bin.join(program).exists() => {
                Command::new(host_bin.join(program))
            }
            _ => Command::new(program),
        };
        cmd.arg(ranks_flag)
            .arg(settings.workload.ranks.to_string())
            .arg(&settings.container.runtime)
            .arg("exec")
            .arg(&container.container.path)
            .arg(&app.bin_path)
            .args(extra_args);
        cmd.env("PATH", prepend_path(&host_bin, "PATH"));
        cmd.env(
            "LD_LIBRARY_PATH",
            prepend_path(&host_env.install_dir.join("lib"), "LD_LIBRARY_PATH"),
        );
        cmd
    }
}

fn prepend_path(dir: &Path, var: &str) -> OsString {
    let mut value = OsString::from(dir.as_os_str());
    if let Some(existing) = std::env::var_os(var).filter(|v| !v.is_empty()) {
        value.push(":");
        value.push(existing);
    }
    value
}

impl Launcher for MpiLauncher {
    #[instrument(skip_all, fields(app = %app.name, %job_manager))]
    fn run(
        &self,
        app: &AppInfo,
        host: &HostConfig,
        host_env: &BuildEnv,
        container: &ContainerConfig,
        job_manager: JobManager,
        settings: &Settings,
        extra_args: &[String],
    ) -> (ExperimentOutcome, ExecResult) {
        let mut outcome = ExperimentOutcome {
            pass: true,
            host: host.implem.clone(),
            container: container.implem.clone(),
            note: String::new(),
        };

        let cmd = Self::command(app, host_env, container, job_manager, settings, extra_args);
        info!(command = %describe(&cmd), "launching workload");
        let timeout = Duration::from_secs(settings.limits.command_timeout_secs);
        let output = match run_command(cmd, timeout, settings.limits.output_limit_bytes) {
            Ok(output) => output,
            Err(err) => {
                return (
                    outcome,
                    ExecResult::failed(RunError::command(format!("launch {}: {err:#}", app.name))),
                );
            }
        };

        let mut exec = ExecResult::ok(output.stdout_text(), output.stderr_text());
        if output.timed_out {
            exec.error = output
                .failure_reason(&app.name, timeout)
                .map(RunError::Command);
        } else if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "workload failed");
            outcome.pass = false;
            outcome.note = format!(
                "{} exited with status {}",
                app.name,
                output
                    .status
                    .code()
                    .map_or_else(|| "signal".to_string(), |code| code.to_string())
            );
        }
        (outcome, exec)
    }
}
