//! Command executor: runs a configured command line through the shell as a
//! child process, with bounded output capture, a hard timeout and a global
//! cap on simultaneously running children.
//!
//! When the cap is reached new invocations are refused immediately with
//! [`CapacityError::ServiceBusy`] rather than queued, so a caller never waits
//! on someone else's long-running command.

use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::CapacityError;

/// Appended to a stream that hit the capture cap.
pub const TRUNCATION_MARKER: &str = "\n[output truncated]\n";

/// How long to keep draining pipes after the shell itself is gone. Background
/// grandchildren may keep a pipe open indefinitely.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

pub const DEFAULT_MAX_CONCURRENT: usize = 4;
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 64 * 1024;
pub const DEFAULT_SHELL: &str = "/bin/sh";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecLimits {
    pub max_concurrent: usize,
    /// Per stream; stdout and stderr are capped independently.
    pub max_output_bytes: usize,
    pub shell: String,
}

impl Default for ExecLimits {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            shell: DEFAULT_SHELL.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecOutcome {
    Success,
    NonZeroExit { code: i32 },
    Signaled { signal: i32 },
    Timeout,
    SpawnFailure { message: String },
}

impl ExecOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecOutcome::Success => "success",
            ExecOutcome::NonZeroExit { .. } => "non_zero_exit",
            ExecOutcome::Signaled { .. } => "signaled",
            ExecOutcome::Timeout => "timeout",
            ExecOutcome::SpawnFailure { .. } => "spawn_failure",
        }
    }
}

/// Everything observed about one invocation. Owned by the request that
/// triggered it and dropped once the response is written.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub id: Uuid,
    pub action: String,
    pub pid: Option<u32>,
    pub outcome: ExecOutcome,
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.outcome == ExecOutcome::Success
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

#[derive(Clone)]
pub struct Executor {
    limits: Arc<ExecLimits>,
    permits: Arc<Semaphore>,
}

impl Executor {
    pub fn new(limits: ExecLimits) -> Self {
        let permits = Arc::new(Semaphore::new(limits.max_concurrent));
        Self {
            limits: Arc::new(limits),
            permits,
        }
    }

    pub fn limits(&self) -> &ExecLimits {
        &self.limits
    }

    /// Free execution slots right now.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `command` for `action`, killing it if it outlives `timeout`.
    ///
    /// Only capacity exhaustion is an `Err`; every way the child itself can
    /// fail is reported through [`ExecutionResult::outcome`].
    pub async fn execute(
        &self,
        action: &str,
        command: &str,
        timeout: Duration,
    ) -> Result<ExecutionResult, CapacityError> {
        let permit = self.permits.clone().try_acquire_owned().map_err(|_| {
            CapacityError::ServiceBusy {
                limit: self.limits.max_concurrent,
            }
        })?;
        let result = self.run(action, command, timeout).await;
        drop(permit);
        Ok(result)
    }

    async fn run(&self, action: &str, command: &str, timeout: Duration) -> ExecutionResult {
        let id = Uuid::new_v4();
        let started_at = Utc::now();
        let start = Instant::now();

        let mut cmd = Command::new(&self.limits.shell);
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so a timeout can take down everything the
        // command started and not just the shell.
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(action, %id, "failed to spawn '{}': {e}", self.limits.shell);
                return ExecutionResult {
                    id,
                    action: action.to_string(),
                    pid: None,
                    outcome: ExecOutcome::SpawnFailure {
                        message: format!("failed to spawn '{}': {e}", self.limits.shell),
                    },
                    exit_code: None,
                    stdout: Vec::new(),
                    stderr: Vec::new(),
                    stdout_truncated: false,
                    stderr_truncated: false,
                    started_at,
                    duration: start.elapsed(),
                };
            }
        };
        let pid = child.id();
        tracing::debug!(action, %id, pid, "spawned");
        // Armed until the shell is reaped: if this future is dropped first
        // (client went away), the whole group dies before the permit is freed.
        let mut group = GroupGuard { pgid: pid };

        let cap = self.limits.max_output_bytes;
        let stdout = child.stdout.take().map(|s| Capture::spawn(s, cap));
        let stderr = child.stderr.take().map(|s| Capture::spawn(s, cap));

        let outcome = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => outcome_from_status(status),
            Ok(Err(e)) => ExecOutcome::SpawnFailure {
                message: format!("wait failed: {e}"),
            },
            Err(_) => {
                tracing::warn!(action, %id, pid, "timed out after {timeout:?}, killing");
                kill_tree(&mut child).await;
                ExecOutcome::Timeout
            }
        };
        group.disarm();

        let ((stdout, stdout_truncated), (stderr, stderr_truncated)) =
            tokio::join!(Capture::collect(stdout), Capture::collect(stderr));

        let exit_code = match &outcome {
            ExecOutcome::Success => Some(0),
            ExecOutcome::NonZeroExit { code } => Some(*code),
            _ => None,
        };

        ExecutionResult {
            id,
            action: action.to_string(),
            pid,
            outcome,
            exit_code,
            stdout,
            stderr,
            stdout_truncated,
            stderr_truncated,
            started_at,
            duration: start.elapsed(),
        }
    }
}

fn outcome_from_status(status: ExitStatus) -> ExecOutcome {
    if let Some(code) = status.code() {
        return if code == 0 {
            ExecOutcome::Success
        } else {
            ExecOutcome::NonZeroExit { code }
        };
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return ExecOutcome::Signaled { signal };
        }
    }
    ExecOutcome::NonZeroExit { code: -1 }
}

/// SIGKILL the child's process group, then reap the child.
async fn kill_tree(child: &mut Child) {
    if let Some(pid) = child.id() {
        kill_group(pid);
    }
    if let Err(e) = child.start_kill() {
        tracing::debug!("start_kill failed: {e}");
    }
    if let Err(e) = child.wait().await {
        tracing::warn!("failed to reap killed child: {e}");
    }
}

#[cfg(unix)]
fn kill_group(pid: u32) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;
    if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        tracing::debug!(pid, "killpg failed: {e}");
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: u32) {}

/// Kills the child's process group on drop unless disarmed.
struct GroupGuard {
    pgid: Option<u32>,
}

impl GroupGuard {
    fn disarm(&mut self) {
        self.pgid = None;
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            tracing::warn!(pgid, "execution abandoned, killing process group");
            kill_group(pgid);
        }
    }
}

// ---------------------------------------------------------------------------
// Bounded capture
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Buffer {
    bytes: Vec<u8>,
    truncated: bool,
}

struct Capture {
    buf: Arc<Mutex<Buffer>>,
    task: JoinHandle<()>,
}

impl Capture {
    /// Read `reader` to EOF on its own task, keeping at most `cap` bytes.
    /// Anything past the cap is read and thrown away so the child never
    /// blocks on a full pipe.
    fn spawn<R>(mut reader: R, cap: usize) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buf = Arc::new(Mutex::new(Buffer::default()));
        let sink = buf.clone();
        let task = tokio::spawn(async move {
            let mut chunk = [0u8; 8192];
            loop {
                let n = match reader.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                let mut b = sink.lock().unwrap_or_else(PoisonError::into_inner);
                let room = cap.saturating_sub(b.bytes.len());
                if n > room {
                    b.bytes.extend_from_slice(&chunk[..room]);
                    b.truncated = true;
                } else {
                    b.bytes.extend_from_slice(&chunk[..n]);
                }
            }
        });
        Self { buf, task }
    }

    /// Wait briefly for EOF, then take whatever was captured.
    async fn collect(capture: Option<Self>) -> (Vec<u8>, bool) {
        let Some(Capture { buf, mut task }) = capture else {
            return (Vec::new(), false);
        };
        if tokio::time::timeout(DRAIN_GRACE, &mut task).await.is_err() {
            task.abort();
        }
        let mut b = std::mem::take(&mut *buf.lock().unwrap_or_else(PoisonError::into_inner));
        if b.truncated {
            b.bytes.extend_from_slice(TRUNCATION_MARKER.as_bytes());
        }
        (b.bytes, b.truncated)
    }
}
