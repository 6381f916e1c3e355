/// Process Supervisor
///
/// **Core Responsibility:**
/// The one place child processes are started and stopped. Every stage and
/// every compile goes through `run_process`.
///
/// **Lifecycle:**
/// 1. Spawn with piped streams, in a fresh process group on Unix
/// 2. Feed stdin and drain stdout/stderr concurrently, keeping at most
///    `output_limit` bytes per stream
/// 3. Wait for exit, the wall-clock limit, or cancellation, whichever is first
/// 4. SIGKILL the whole process group once the leader is done, so no
///    background descendant outlives its stage or keeps the pipes open
///
/// Dropping the `run_process` future also kills the group.
///
/// A spawn failure is not an error here: it comes back as an outcome with
/// `spawn_error` set so the caller can fold it into a verdict.

use crucible_common::types::{Role, StageResult};
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How long stream readers may lag behind the process exit.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

const READ_CHUNK: usize = 8192;

#[derive(Debug, Clone)]
pub struct ProcessSpec<'a> {
    /// Program followed by its arguments
    pub argv: &'a [String],
    pub cwd: Option<&'a Path>,
    pub stdin: Option<&'a [u8]>,
    pub timeout: Duration,
    pub output_limit: usize,
    pub memory_limit_mb: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct ProcessOutcome {
    pub exit_code: Option<i32>,
    /// Terminating signal, when the process did not exit normally
    pub signal: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    pub wall_time: Duration,
    pub timed_out: bool,
    pub cancelled: bool,
    pub spawn_error: Option<String>,
}

impl ProcessOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out && !self.cancelled
    }

    /// Record this outcome as a stage of `role`.
    ///
    /// Non-zero exits mark generator, reference and solution stages as
    /// crashed. Validator exit codes are the verdict channel and never count
    /// as a crash.
    pub fn into_stage(self, role: Role) -> StageResult {
        let crashed = role != Role::Validator
            && !self.timed_out
            && (self.spawn_error.is_some() || self.exit_code != Some(0));
        StageResult {
            role,
            exit_code: self.exit_code,
            stdout: self.stdout,
            stderr: self.stderr,
            stdout_truncated: self.stdout_truncated,
            stderr_truncated: self.stderr_truncated,
            wall_time_ms: self.wall_time.as_millis() as u64,
            timed_out: self.timed_out,
            crashed,
        }
    }
}

/// Run one process to completion under `spec`'s limits.
pub async fn run_process(spec: &ProcessSpec<'_>, cancel: &CancellationToken) -> ProcessOutcome {
    let Some((program, args)) = spec.argv.split_first() else {
        return spawn_failure("empty command".to_string());
    };

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(if spec.stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = spec.cwd {
        cmd.current_dir(dir);
    }
    configure_sandbox(&mut cmd, spec.memory_limit_mb);

    let start = Instant::now();
    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            warn!(program = %program, error = %e, "Failed to spawn process");
            return spawn_failure(format!("failed to spawn {}: {}", program, e));
        }
    };
    let mut group = GroupGuard { pid: child.id() };

    if let (Some(mut stdin), Some(input)) = (child.stdin.take(), spec.stdin) {
        let input = input.to_vec();
        tokio::spawn(async move {
            // The child may exit without reading everything; a broken pipe is expected then.
            let _ = stdin.write_all(&input).await;
            let _ = stdin.shutdown().await;
        });
    }

    let limit = spec.output_limit;
    let stdout_task = child.stdout.take().map(|out| spawn_capture(out, limit));
    let stderr_task = child.stderr.take().map(|err| spawn_capture(err, limit));

    let mut outcome = ProcessOutcome::default();
    let status = tokio::select! {
        status = child.wait() => Some(status),
        _ = tokio::time::sleep(spec.timeout) => {
            outcome.timed_out = true;
            None
        }
        _ = cancel.cancelled() => {
            outcome.cancelled = true;
            None
        }
    };

    let status = match status {
        Some(status) => status.ok(),
        None => {
            group.terminate();
            let _ = child.kill().await;
            child.wait().await.ok()
        }
    };
    outcome.wall_time = start.elapsed();
    // Background descendants die with the stage.
    group.terminate();

    if let Some(status) = status {
        outcome.exit_code = status.code();
        outcome.signal = exit_signal(&status);
    }

    (outcome.stdout, outcome.stdout_truncated) = join_capture(stdout_task).await;
    (outcome.stderr, outcome.stderr_truncated) = join_capture(stderr_task).await;

    debug!(
        program = %program,
        elapsed_ms = outcome.wall_time.as_millis() as u64,
        exit_code = ?outcome.exit_code,
        signal = ?outcome.signal,
        timed_out = outcome.timed_out,
        cancelled = outcome.cancelled,
        "Process finished"
    );
    outcome
}

fn spawn_failure(message: String) -> ProcessOutcome {
    ProcessOutcome {
        stderr: message.clone().into_bytes(),
        spawn_error: Some(message),
        ..Default::default()
    }
}

/// Kills the child's process group when dropped, unless already done.
struct GroupGuard {
    pid: Option<u32>,
}

impl GroupGuard {
    fn terminate(&mut self) {
        terminate_tree(self.pid.take());
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        self.terminate();
    }
}

#[derive(Debug, Default)]
struct Captured {
    bytes: Vec<u8>,
    truncated: bool,
}

/// A reader task plus the buffer it fills, readable even if the task is aborted.
struct CaptureTask {
    handle: JoinHandle<()>,
    captured: Arc<Mutex<Captured>>,
}

fn spawn_capture<R: AsyncRead + Unpin + Send + 'static>(reader: R, limit: usize) -> CaptureTask {
    let captured = Arc::new(Mutex::new(Captured::default()));
    let handle = tokio::spawn(capture(reader, limit, Arc::clone(&captured)));
    CaptureTask { handle, captured }
}

/// Read a stream to EOF, keeping the first `limit` bytes.
async fn capture<R: AsyncRead + Unpin>(mut reader: R, limit: usize, sink: Arc<Mutex<Captured>>) {
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let mut captured = sink.lock().unwrap_or_else(|e| e.into_inner());
                let room = limit.saturating_sub(captured.bytes.len());
                if n > room {
                    captured.bytes.extend_from_slice(&chunk[..room]);
                    captured.truncated = true;
                } else {
                    captured.bytes.extend_from_slice(&chunk[..n]);
                }
            }
        }
    }
}

async fn join_capture(task: Option<CaptureTask>) -> (Vec<u8>, bool) {
    let Some(CaptureTask { mut handle, captured }) = task else {
        return (Vec::new(), false);
    };
    let drained = tokio::time::timeout(DRAIN_GRACE, &mut handle).await.is_ok();
    if !drained {
        // A descendant outside the process group still holds the pipe open.
        handle.abort();
    }
    let mut captured = captured.lock().unwrap_or_else(|e| e.into_inner());
    let bytes = std::mem::take(&mut captured.bytes);
    (bytes, captured.truncated || !drained)
}

#[cfg(unix)]
fn configure_sandbox(cmd: &mut Command, memory_limit_mb: Option<u64>) {
    cmd.process_group(0);
    if let Some(mb) = memory_limit_mb {
        let bytes = mb.saturating_mul(1024 * 1024);
        // SAFETY: only an async-signal-safe setrlimit call runs between fork and exec.
        unsafe {
            cmd.pre_exec(move || {
                nix::sys::resource::setrlimit(nix::sys::resource::Resource::RLIMIT_AS, bytes, bytes)
                    .map_err(std::io::Error::from)
            });
        }
    }
}

#[cfg(not(unix))]
fn configure_sandbox(_cmd: &mut Command, memory_limit_mb: Option<u64>) {
    if memory_limit_mb.is_some() {
        warn!("Memory limits are only enforced on Unix");
    }
}

/// SIGKILL the process group led by `pid`.
#[cfg(unix)]
fn terminate_tree(pid: Option<u32>) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid else { return };
    if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        if e != nix::errno::Errno::ESRCH {
            warn!(pid = pid, error = %e, "Failed to kill process group");
        }
    }
}

#[cfg(not(unix))]
fn terminate_tree(_pid: Option<u32>) {}

#[cfg(unix)]
fn exit_signal(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}
