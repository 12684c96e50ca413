//! Builds, launches, and tears down candidate processes.
//!
//! Every launched child lives in its own process group (unix) and is owned by
//! a [`ProcessGuard`]; dropping the guard without a clean teardown kills the
//! whole group, so early returns and panics never leak a candidate.

use std::collections::VecDeque;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command as TokioCommand};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::channel::MessageChannel;
use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::session::ProtocolSession;
use crate::variant::{CommandSpec, VariantPolicy};

pub type ChildSession = ProtocolSession<ChildStdout, ChildStdin>;

const STDERR_TAIL_LINES: usize = 64;
const BUILD_STDERR_LINES: usize = 40;
const DRAIN_SETTLE: Duration = Duration::from_millis(250);

/// Runs the policy's build command inside `target` and waits for it.
pub async fn build(policy: &VariantPolicy, target: &Path, limit: Duration) -> Result<()> {
    let rendered = policy.build.render();
    info!(command = %rendered, target = %target.display(), "building candidate");

    let mut command = command_for(&policy.build, target);
    command.stdin(Stdio::null());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());
    command.kill_on_drop(true);

    let output = tokio::time::timeout(limit, command.output())
        .await
        .map_err(|_| HarnessError::Timeout {
            context: format!("running `{rendered}`"),
            limit,
        })?
        .map_err(|err| HarnessError::BuildFailure {
            status: "not started".to_string(),
            stderr: format!("failed to spawn `{rendered}`: {err}"),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = if stderr.trim().is_empty() {
            String::from_utf8_lossy(&output.stdout).into_owned()
        } else {
            stderr.into_owned()
        };
        return Err(HarnessError::BuildFailure {
            status: describe_exit_status(output.status),
            stderr: tail_lines(stderr.trim(), BUILD_STDERR_LINES),
        });
    }

    debug!(command = %rendered, "build finished");
    Ok(())
}

/// Starts the candidate with all three streams piped and waits out the
/// policy's startup grace before handing back a live session.
pub async fn launch(
    policy: &VariantPolicy,
    target: &Path,
    config: &HarnessConfig,
) -> Result<Session> {
    let rendered = policy.launch.render();
    info!(command = %rendered, variant = %policy.variant, "launching candidate");

    let mut command = command_for(&policy.launch, target);
    command.stdin(Stdio::piped());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());
    command.kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    let mut child = command.spawn().map_err(|err| HarnessError::LaunchFailure {
        command: rendered.clone(),
        reason: err.to_string(),
    })?;

    let missing = |stream: &str| HarnessError::LaunchFailure {
        command: rendered.clone(),
        reason: format!("{stream} was not captured"),
    };
    let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
    let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
    let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;

    let mut process = ProcessGuard::new(child, rendered.clone());
    let tail = StderrTail::default();
    let drain = tokio::spawn(drain_stderr(stderr, tail.clone()));

    if !policy.startup_grace.is_zero() {
        debug!(grace_ms = policy.startup_grace.as_millis() as u64, "waiting for candidate startup");
        tokio::time::sleep(policy.startup_grace).await;
    }
    if let Some(status) = process.try_reap()? {
        process.sweep_group();
        let diagnostics = tail.snapshot().join("\n");
        return Err(HarnessError::LaunchFailure {
            command: rendered,
            reason: format!(
                "exited during startup ({}){}",
                describe_exit_status(status),
                if diagnostics.is_empty() {
                    String::new()
                } else {
                    format!(": {diagnostics}")
                }
            ),
        });
    }

    let channel = MessageChannel::new(
        stdout,
        stdin,
        config.response_timeout,
        policy.filter_non_message_lines,
    );
    Ok(Session {
        protocol: ProtocolSession::new(channel),
        process,
        stderr: tail,
        drain,
    })
}

fn command_for(spec: &CommandSpec, target: &Path) -> TokioCommand {
    let mut command = TokioCommand::new(&spec.program);
    command.args(&spec.args);
    command.current_dir(target);
    command
}

/// A launched candidate: its protocol conversation plus the process that
/// backs it.
pub struct Session {
    protocol: ChildSession,
    process: ProcessGuard,
    stderr: StderrTail,
    drain: JoinHandle<()>,
}

impl Session {
    pub fn protocol(&mut self) -> &mut ChildSession {
        &mut self.protocol
    }

    pub fn stderr_tail(&self) -> Vec<String> {
        self.stderr.snapshot()
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.pid
    }

    /// Closes stdin, asks the process group to terminate, and kills it if it
    /// is still running after `timeout`. Returns how the candidate exited.
    pub async fn teardown(self, timeout: Duration) -> Result<String> {
        let Session {
            protocol,
            mut process,
            stderr: _,
            mut drain,
        } = self;
        drop(protocol);

        let status = process.terminate(timeout).await?;
        if tokio::time::timeout(DRAIN_SETTLE, &mut drain).await.is_err() {
            drain.abort();
        }
        let description = describe_exit_status(status);
        info!(command = %process.command, status = %description, "candidate stopped");
        Ok(description)
    }
}

/// Owns the child process; kills its group on drop unless it was reaped.
pub struct ProcessGuard {
    child: Child,
    pid: Option<u32>,
    command: String,
    reaped: bool,
}

impl ProcessGuard {
    fn new(child: Child, command: String) -> Self {
        let pid = child.id();
        Self {
            child,
            pid,
            command,
            reaped: false,
        }
    }

    fn try_reap(&mut self) -> Result<Option<ExitStatus>> {
        let status = self.child.try_wait()?;
        if status.is_some() {
            self.reaped = true;
        }
        Ok(status)
    }

    async fn terminate(&mut self, timeout: Duration) -> Result<ExitStatus> {
        if let Some(status) = self.try_reap()? {
            self.sweep_group();
            return Ok(status);
        }

        self.request_stop();
        let status = match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                warn!(
                    command = %self.command,
                    timeout_ms = timeout.as_millis() as u64,
                    "candidate ignored termination; killing"
                );
                self.force_kill();
                self.child.wait().await?
            }
        };
        self.reaped = true;
        self.sweep_group();
        Ok(status)
    }

    #[cfg(unix)]
    fn request_stop(&mut self) {
        self.signal_group(libc::SIGTERM);
    }

    #[cfg(not(unix))]
    fn request_stop(&mut self) {
        if let Err(err) = self.child.start_kill() {
            debug!(error = %err, "start_kill failed");
        }
    }

    fn force_kill(&mut self) {
        #[cfg(unix)]
        self.signal_group(libc::SIGKILL);
        if let Err(err) = self.child.start_kill() {
            debug!(error = %err, "start_kill failed");
        }
    }

    /// Descendants (the server behind `cargo run`, helper shells) share the
    /// group and must not outlive the leader.
    fn sweep_group(&self) {
        #[cfg(unix)]
        self.signal_group(libc::SIGKILL);
    }

    #[cfg(unix)]
    fn signal_group(&self, signal: libc::c_int) {
        let Some(pid) = self.pid else {
            return;
        };
        let Ok(pgid) = libc::pid_t::try_from(pid) else {
            return;
        };
        // SAFETY: kill(2) with a negative pid only signals the process group
        // created for this child at spawn.
        let rc = unsafe { libc::kill(-pgid, signal) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ESRCH) {
                debug!(pgid, signal, error = %err, "failed to signal process group");
            }
        }
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        if self.reaped {
            return;
        }
        warn!(command = %self.command, "candidate still running at drop; killing");
        self.force_kill();
    }
}

/// Newest lines the candidate wrote to stderr, shared with the drain task.
#[derive(Debug, Clone, Default)]
pub struct StderrTail {
    lines: Arc<Mutex<VecDeque<String>>>,
}

impl StderrTail {
    fn push(&self, line: String) {
        let mut lines = self.lines.lock();
        if lines.len() == STDERR_TAIL_LINES {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.lines.lock().iter().cloned().collect()
    }
}

async fn drain_stderr<R>(stream: R, tail: StderrTail)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&buf);
                let trimmed = text.trim_end_matches(['\n', '\r']);
                if !trimmed.is_empty() {
                    debug!(target: "mcp_conform::candidate", stream = "stderr", line = trimmed);
                    tail.push(trimmed.to_string());
                }
            }
            Err(err) => {
                warn!(target: "mcp_conform::candidate", stream = "stderr", error = %err, "failed to read candidate stderr");
                break;
            }
        }
    }
}

pub fn describe_exit_status(status: ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("exit code {code}");
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("signal {signal}");
        }
    }

    "unknown status".to_string()
}

fn tail_lines(text: &str, keep: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(keep);
    lines[start..].join("\n")
}
