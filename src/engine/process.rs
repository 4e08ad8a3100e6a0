//! External process launching with kill and cancellation support.

use crate::engine::CancelSignal;
use crate::error::JobError;
use crate::model::OutputPolicy;
use std::ffi::OsString;
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

/// Launches external commands according to an output policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessExecutor {
    policy: OutputPolicy,
}

impl ProcessExecutor {
    pub fn new(policy: OutputPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> OutputPolicy {
        self.policy
    }

    /// Start `argv[0]` with the remaining arguments. The working directory and
    /// environment are inherited from the caller.
    pub fn spawn(&self, argv: &[OsString]) -> Result<ProcessHandle, JobError> {
        let (program, args) = argv.split_first().ok_or_else(|| JobError::SpawnFailed {
            program: String::new(),
            reason: "empty command line".into(),
        })?;
        let program_name = program.to_string_lossy().into_owned();

        let mut cmd = Command::new(program);
        cmd.args(args).stdin(Stdio::null()).kill_on_drop(true);
        // Own process group, so wrapper scripts and their children die together.
        #[cfg(unix)]
        cmd.process_group(0);
        match self.policy {
            OutputPolicy::Discard => {
                cmd.stdout(Stdio::null()).stderr(Stdio::null());
            }
            OutputPolicy::Stream => {
                cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
            }
        }

        let mut child = cmd.spawn().map_err(|e| JobError::SpawnFailed {
            program: program_name.clone(),
            reason: e.to_string(),
        })?;

        // Drain both pipes continuously so a chatty child never blocks on a full pipe.
        let mut pumps = Vec::new();
        if let Some(out) = child.stdout.take() {
            pumps.push(tokio::spawn(forward_lines(out, program_name.clone(), "stdout")));
        }
        if let Some(err) = child.stderr.take() {
            pumps.push(tokio::spawn(forward_lines(err, program_name.clone(), "stderr")));
        }

        tracing::debug!(program = %program_name, pid = ?child.id(), "spawned process");
        Ok(ProcessHandle {
            group: child.id(),
            child,
            program: program_name,
            pumps,
        })
    }
}

async fn forward_lines<R: AsyncRead + Unpin>(stream: R, program: String, channel: &'static str) {
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::info!(target: "mesh_boolean::backend", program = %program, channel, "{line}");
    }
}

/// A running (or finished) child process.
#[derive(Debug)]
pub struct ProcessHandle {
    child: Child,
    program: String,
    pumps: Vec<JoinHandle<()>>,
    /// Process group led by the child; `None` once the group has been swept.
    group: Option<u32>,
}

/// Result of [`ProcessHandle::wait_or_cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Exited(ExitStatus),
    /// Cancellation was observed; the process was killed and has exited.
    Killed(ExitStatus),
}

impl ProcessHandle {
    /// OS process id, `None` once the child has been reaped.
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Wait for the process to exit. Only the awaiting task is blocked.
    ///
    /// Anything the child left behind in its process group is killed once the
    /// child itself has exited.
    pub async fn wait(&mut self) -> Result<ExitStatus, JobError> {
        let status = self.reap().await?;
        self.sweep_group();
        for pump in self.pumps.drain(..) {
            let _ = pump.await;
        }
        Ok(status)
    }

    /// Forcefully terminate the process and everything in its process group.
    /// Killing an exited process is a no-op.
    pub async fn kill(&mut self) -> Result<(), JobError> {
        #[cfg(unix)]
        if let Some(group) = self.group {
            return kill_group(group).map_err(|e| JobError::BackendExecutionFailed {
                reason: format!("failed to kill {}: {e}", self.program),
            });
        }
        match self.child.try_wait() {
            Ok(Some(_)) => return Ok(()),
            Ok(None) => {}
            Err(e) => tracing::debug!(program = %self.program, error = %e, "try_wait failed before kill"),
        }
        match self.child.start_kill() {
            Ok(()) => Ok(()),
            // Raced with a natural exit.
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(JobError::BackendExecutionFailed {
                reason: format!("failed to kill {}: {e}", self.program),
            }),
        }
    }

    /// Wait for exit unless `cancel` fires first, in which case the process
    /// group is killed and the child reaped before returning. A process that
    /// had already exited when cancellation arrived is reported as
    /// [`WaitOutcome::Exited`].
    pub async fn wait_or_cancel(
        &mut self,
        cancel: &mut CancelSignal,
    ) -> Result<WaitOutcome, JobError> {
        tokio::select! {
            biased;
            status = self.wait() => return status.map(WaitOutcome::Exited),
            _ = cancel.cancelled() => {}
        }
        if let Ok(Some(status)) = self.child.try_wait() {
            // Exited, but something still holds its output pipes.
            self.sweep_group();
            self.abort_pumps();
            return Ok(WaitOutcome::Exited(status));
        }
        self.kill().await?;
        let status = self.reap().await?;
        self.group = None;
        self.abort_pumps();
        tracing::debug!(program = %self.program, ?status, "process killed on cancellation");
        Ok(WaitOutcome::Killed(status))
    }

    async fn reap(&mut self) -> Result<ExitStatus, JobError> {
        self.child
            .wait()
            .await
            .map_err(|e| JobError::BackendExecutionFailed {
                reason: format!("waiting for {} failed: {e}", self.program),
            })
    }

    fn sweep_group(&mut self) {
        #[cfg(unix)]
        if let Some(group) = self.group.take() {
            if let Err(e) = kill_group(group) {
                tracing::debug!(program = %self.program, error = %e, "failed to sweep process group");
            }
        }
        #[cfg(not(unix))]
        {
            self.group = None;
        }
    }

    fn abort_pumps(&mut self) {
        for pump in self.pumps.drain(..) {
            pump.abort();
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        // `kill_on_drop` only reaches the direct child.
        self.sweep_group();
        self.abort_pumps();
    }
}

/// SIGKILL every process in `group`. A group that no longer exists is not an error.
#[cfg(unix)]
fn kill_group(group: u32) -> std::io::Result<()> {
    let pgid = libc::pid_t::try_from(group)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "pid out of range"))?;
    // SAFETY: kill(2) takes plain integers; a negative pid addresses the group.
    if unsafe { libc::kill(-pgid, libc::SIGKILL) } == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        return Ok(());
    }
    Err(err)
}

/// Human-readable description of a non-success exit, used as a failure reason.
pub fn describe_exit(status: ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("backend exited with code {code}");
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("backend terminated by signal {signal}");
        }
    }
    "backend terminated abnormally".to_string()
}
