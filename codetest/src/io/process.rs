//! Helpers for running child processes with timeouts, cancellation and bounded output.
//!
//! Every spawned child leads its own process group and is owned by a
//! [`ChildGuard`]. Timeouts and cancellation kill the whole group, and dropping
//! the guard kills and reaps whatever is still running, so no error path
//! leaves a process behind.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

use crate::core::types::ExecutionResult;
use crate::error::Cancelled;

/// How often a waiting runner checks for cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// How long output readers may lag behind the exit of the process group.
const OUTPUT_GRACE: Duration = Duration::from_secs(1);

/// Cooperative cancellation flag shared between a run and the watch controller.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Return `Err(Cancelled)` once cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Cancelled.into());
        }
        Ok(())
    }
}

/// Owns a running child and its process group; kills and reaps on drop unless
/// already reaped.
#[derive(Debug)]
pub struct ChildGuard {
    child: Option<Child>,
    group: u32,
}

impl ChildGuard {
    /// Spawn `cmd` as the leader of a new process group.
    pub fn spawn(cmd: &mut Command) -> Result<Self> {
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        debug!("spawning child process");
        match cmd.spawn() {
            Ok(child) => {
                let group = child.id();
                Ok(Self {
                    child: Some(child),
                    group,
                })
            }
            Err(e) => {
                error!(err = %e, "failed to spawn command");
                Err(e).context("spawn command")
            }
        }
    }

    fn child_mut(&mut self) -> Result<&mut Child> {
        self.child
            .as_mut()
            .ok_or_else(|| anyhow!("child process already reaped"))
    }

    /// Wait up to `timeout`; `Some(status)` once the child has exited.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Result<Option<ExitStatus>> {
        let status = self
            .child_mut()?
            .wait_timeout(timeout)
            .context("wait for command")?;
        if status.is_some() {
            self.child = None;
        }
        Ok(status)
    }

    /// Kill every process still in the child's group, e.g. background jobs
    /// left behind by a leader that already exited.
    pub fn kill_group(&self) {
        kill_process_group(self.group);
    }

    /// Kill the whole group and block until the child has exited.
    pub fn kill_and_reap(&mut self) -> Result<ExitStatus> {
        kill_process_group(self.group);
        let child = self.child_mut()?;
        if let Err(err) = child.kill() {
            // Already exited between the last wait and the kill.
            debug!(err = %err, "kill failed");
        }
        let status = child.wait().context("wait command after kill")?;
        self.child = None;
        Ok(status)
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            warn!(pid = self.group, "reaping abandoned child process");
            kill_process_group(self.group);
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

#[cfg(unix)]
fn kill_process_group(group: u32) {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(group) else {
        return;
    };
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(err) => debug!(group, err = %err, "killpg failed"),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_group: u32) {}

/// How a waited-on child ended.
#[derive(Debug)]
enum Waited {
    Exited(ExitStatus),
    TimedOut(ExitStatus),
}

/// Poll the child in [`POLL_INTERVAL`] slices until it exits, `limit` has
/// passed since `started`, or `cancel` fires. Timeouts and cancellation kill
/// and reap the whole group; a normal exit still kills leftover descendants.
fn wait_for_exit(
    guard: &mut ChildGuard,
    started: Instant,
    limit: Option<Duration>,
    cancel: &CancelToken,
) -> Result<Waited> {
    loop {
        let slice = match limit {
            Some(limit) => {
                let elapsed = started.elapsed();
                if elapsed >= limit {
                    warn!(
                        timeout_ms = limit.as_millis() as u64,
                        "timed out, killing process group"
                    );
                    return Ok(Waited::TimedOut(guard.kill_and_reap()?));
                }
                (limit - elapsed).min(POLL_INTERVAL)
            }
            None => POLL_INTERVAL,
        };
        if let Some(status) = guard.wait_timeout(slice)? {
            guard.kill_group();
            return Ok(Waited::Exited(status));
        }
        if cancel.is_cancelled() {
            debug!("cancellation requested, killing process group");
            guard.kill_and_reap()?;
            return Err(Cancelled.into());
        }
    }
}

type Captured = Result<(Vec<u8>, usize)>;

fn spawn_reader<R: Read + Send + 'static>(stream: R, limit: usize) -> Receiver<Captured> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(read_stream_limited(stream, limit));
    });
    rx
}

/// Output gathered by a reader thread. A pipe still held open by a process
/// that escaped the group is abandoned after [`OUTPUT_GRACE`].
fn collect_output(rx: &Receiver<Captured>, stream: &str) -> Captured {
    match rx.recv_timeout(OUTPUT_GRACE) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => {
            warn!(stream, "pipe still open after exit, discarding its output");
            Ok((Vec::new(), 0))
        }
        Err(RecvTimeoutError::Disconnected) => Err(anyhow!("{stream} reader thread panicked")),
    }
}

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
    /// Stderr followed by stdout, lossily decoded, with truncation notices.
    pub fn combined_text(&self) -> String {
        let mut buf = String::from_utf8_lossy(&self.stderr).into_owned();
        if self.stderr_truncated > 0 {
            buf.push_str(&format!(
                "\n[stderr truncated {} bytes]\n",
                self.stderr_truncated
            ));
        }
        buf.push_str(&String::from_utf8_lossy(&self.stdout));
        if self.stdout_truncated > 0 {
            buf.push_str(&format!(
                "\n[stdout truncated {} bytes]\n",
                self.stdout_truncated
            ));
        }
        buf
    }
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. `output_limit_bytes` bounds the amount of
/// stdout/stderr stored in memory (bytes beyond this are discarded while still draining the pipe).
/// When `cancel` fires, the process group is killed and `Err(Cancelled)` is returned.
#[instrument(skip_all, fields(timeout_ms = timeout.as_millis() as u64, output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
    cancel: &CancelToken,
) -> Result<CommandOutput> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    let started = Instant::now();
    let mut guard = ChildGuard::spawn(&mut cmd)?;
    let child = guard.child_mut()?;

    if let Some(input) = stdin {
        let mut child_stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        child_stdin.write_all(input).context("write stdin")?;
    }

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_rx = spawn_reader(stdout, output_limit_bytes);
    let stderr_rx = spawn_reader(stderr, output_limit_bytes);

    let (status, timed_out) = match wait_for_exit(&mut guard, started, Some(timeout), cancel)? {
        Waited::Exited(status) => (status, false),
        Waited::TimedOut(status) => (status, true),
    };

    let (stdout, stdout_truncated) = collect_output(&stdout_rx, "stdout")?;
    let (stderr, stderr_truncated) = collect_output(&stderr_rx, "stderr")?;

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

/// Parameters for one program invocation against a case input.
#[derive(Debug, Clone)]
pub struct ProgramRequest<'a> {
    pub executable: &'a Path,
    /// Bound to the program's stdin.
    pub input: &'a Path,
    /// Truncated and bound to the program's stdout.
    pub output: &'a Path,
    /// Wall-clock limit; `None` waits until exit or cancellation.
    pub timeout: Option<Duration>,
    pub stderr_limit_bytes: usize,
}

/// Run a compiled program with file-backed stdin/stdout.
///
/// The returned result describes how the process ended (including timeouts);
/// interpreting it as a failure is up to the caller. When `cancel` fires, the
/// process group is killed and reaped and `Err(Cancelled)` is returned.
#[instrument(skip_all, fields(executable = %request.executable.display()))]
pub fn run_program(request: &ProgramRequest<'_>, cancel: &CancelToken) -> Result<ExecutionResult> {
    let stdin = File::open(request.input)
        .with_context(|| format!("open input {}", request.input.display()))?;
    let stdout = File::create(request.output)
        .with_context(|| format!("create output {}", request.output.display()))?;

    let mut cmd = Command::new(request.executable);
    cmd.stdin(Stdio::from(stdin))
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::piped());

    let started = Instant::now();
    let mut guard = ChildGuard::spawn(&mut cmd)?;
    // The parent's copies of the stdin/stdout handles were moved into `cmd`;
    // drop it so the output file is closed once the child exits.
    drop(cmd);

    let stderr = guard
        .child_mut()?
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let stderr_rx = spawn_reader(stderr, request.stderr_limit_bytes);

    let (status, timed_out) = match wait_for_exit(&mut guard, started, request.timeout, cancel)? {
        Waited::Exited(status) => (status, false),
        Waited::TimedOut(status) => (status, true),
    };
    let elapsed = started.elapsed();

    let (stderr, stderr_truncated) = collect_output(&stderr_rx, "stderr")?;
    if stderr_truncated > 0 {
        debug!(stderr_truncated, "program stderr truncated");
    }

    let signal = exit_signal(&status);
    debug!(exit_code = ?status.code(), ?signal, timed_out, elapsed_ms = elapsed.as_millis() as u64, "program finished");
    Ok(ExecutionResult {
        exit_code: status.code(),
        signal: if timed_out { None } else { signal },
        elapsed,
        timed_out,
        stderr,
    })
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

/// Human-readable name for a terminating signal, e.g. `SIGSEGV (segmentation fault)`.
pub fn describe_signal(signal: i32) -> String {
    let known = match signal {
        1 => Some(("SIGHUP", "hangup")),
        2 => Some(("SIGINT", "interrupt")),
        3 => Some(("SIGQUIT", "quit")),
        4 => Some(("SIGILL", "illegal instruction")),
        5 => Some(("SIGTRAP", "trace/breakpoint trap")),
        6 => Some(("SIGABRT", "aborted")),
        7 => Some(("SIGBUS", "bus error")),
        8 => Some(("SIGFPE", "floating point exception")),
        9 => Some(("SIGKILL", "killed")),
        11 => Some(("SIGSEGV", "segmentation fault")),
        13 => Some(("SIGPIPE", "broken pipe")),
        14 => Some(("SIGALRM", "alarm clock")),
        15 => Some(("SIGTERM", "terminated")),
        24 => Some(("SIGXCPU", "CPU time limit exceeded")),
        25 => Some(("SIGXFSZ", "file size limit exceeded")),
        _ => None,
    };
    match known {
        Some((name, text)) => format!("{name} ({text})"),
        None => format!("signal {signal}"),
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Captured {
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
