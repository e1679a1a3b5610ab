//! Bounded execution of external commands.
//!
//! Every collaborator that shells out (builders, puller, launcher) goes
//! through [`run_command`], so timeouts and output limits are applied the
//! same way everywhere.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

use crate::core::error::RunError;
use crate::core::types::ExecResult;

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    /// Why the command did not succeed, or `None` if it did.
    pub fn failure_reason(&self, label: &str, timeout: Duration) -> Option<String> {
        if self.timed_out {
            return Some(format!("{label} timed out after {}s", timeout.as_secs()));
        }
        if !self.status.success() {
            return Some(format!(
                "{label} failed with status {}",
                self.status
                    .code()
                    .map_or_else(|| "signal".to_string(), |code| code.to_string())
            ));
        }
        None
    }

    fn lossy(bytes: &[u8], truncated: usize, stream: &str) -> String {
        let mut text = String::from_utf8_lossy(bytes).into_owned();
        if truncated > 0 {
            text.push_str(&format!("\n[{stream} truncated {truncated} bytes]\n"));
        }
        text
    }

    pub fn stdout_text(&self) -> String {
        Self::lossy(&self.stdout, self.stdout_truncated, "stdout")
    }

    pub fn stderr_text(&self) -> String {
        Self::lossy(&self.stderr, self.stderr_truncated, "stderr")
    }
}

/// Render a command for logs and error messages.
pub fn describe(cmd: &Command) -> String {
    let mut parts = vec![cmd.get_program().to_string_lossy().into_owned()];
    parts.extend(cmd.get_args().map(|arg| arg.to_string_lossy().into_owned()));
    parts.join(" ")
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. `output_limit_bytes` bounds the amount of
/// stdout/stderr kept in memory; the rest is drained and counted.
///
/// On unix the child leads its own process group, and a timeout kills the whole group so
/// grandchildren holding the output pipes cannot outlive it.
#[instrument(skip_all, fields(command = %describe(&cmd), timeout_secs = timeout.as_secs()))]
pub fn run_command(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    debug!("spawning child process");
    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawn {}", describe(&cmd)))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_handle = thread::spawn(move || read_stream_limited(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, output_limit_bytes));

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing"
            );
            timed_out = true;
            kill_tree(&mut child).context("kill command")?;
            child.wait().context("wait command after kill")?
        }
    };

    let (stdout, stdout_truncated) = join_output(stdout_handle).context("join stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_handle).context("join stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

/// Run a command and fold spawn errors, timeouts and non-zero exits into an
/// [`ExecResult`].
pub fn run_to_exec_result(
    cmd: Command,
    label: &str,
    timeout: Duration,
    output_limit_bytes: usize,
) -> ExecResult {
    match run_command(cmd, timeout, output_limit_bytes) {
        Ok(output) => ExecResult {
            stdout: output.stdout_text(),
            stderr: output.stderr_text(),
            error: output
                .failure_reason(label, timeout)
                .map(RunError::Command),
        },
        Err(err) => ExecResult::failed(RunError::command(format!("{label}: {err:#}"))),
    }
}

#[cfg(unix)]
#[allow(unsafe_code)]
fn kill_tree(child: &mut Child) -> Result<()> {
    let pgid = libc::pid_t::try_from(child.id()).context("child pid out of range")?;
    // SAFETY: killpg only sends a signal; `pgid` is the group this child leads.
    if unsafe { libc::killpg(pgid, libc::SIGKILL) } == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        return Ok(());
    }
    Err(err).context("killpg")
}

#[cfg(not(unix))]
fn kill_tree(child: &mut Child) -> Result<()> {
    child.kill().context("kill child")
}

fn join_output(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}
