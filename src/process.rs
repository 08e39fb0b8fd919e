//! External command execution with output capture, timeouts, and
//! cancellation-aware supervision.

use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Output, Stdio};
use std::sync::mpsc::Receiver;
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{PmError, PmResult};
use crate::orchestrator::CancellationToken;

/// How often the supervisor loop polls the child and its abort conditions.
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// How long to wait for the drain threads after the child has exited.
const DRAIN_GRACE: Duration = Duration::from_millis(100);

#[must_use]
pub fn command_exists(program: &str) -> bool {
    which::which(program).is_ok()
}

pub fn run_command(program: &str, args: &[String], cwd: Option<&Path>) -> PmResult<Output> {
    run_command_with_timeout(program, args, cwd, None)
}

/// Run a command to completion, killing it once `timeout` elapses.
pub fn run_command_with_timeout(
    program: &str,
    args: &[String],
    cwd: Option<&Path>,
    timeout: Option<Duration>,
) -> PmResult<Output> {
    let started_at = Instant::now();
    supervise(program, args, cwd, move || match timeout {
        Some(limit) if started_at.elapsed() >= limit => Some(Abort::TimedOut(limit)),
        _ => None,
    })
}

/// Run a command under a session cancellation token.
///
/// Each poll tick consults `token.checkpoint()`; a tripped checkpoint kills
/// the child and propagates the typed error. `hard_timeout` stays in force
/// as a safety net even when the token carries no deadline.
pub(crate) fn run_command_cancellable(
    program: &str,
    args: &[String],
    cwd: Option<&Path>,
    token: &CancellationToken,
    hard_timeout: Option<Duration>,
) -> PmResult<Output> {
    let started_at = Instant::now();
    supervise(program, args, cwd, move || {
        if let Err(err) = token.checkpoint() {
            return Some(Abort::Cancelled(err));
        }
        match hard_timeout {
            Some(limit) if started_at.elapsed() >= limit => Some(Abort::TimedOut(limit)),
            _ => None,
        }
    })
}

/// Why a supervised child was killed before it exited.
enum Abort {
    TimedOut(Duration),
    Cancelled(PmError),
}

/// Spawn `program` and poll it until exit, killing it if `check_abort`
/// reports a reason to stop early.
fn supervise(
    program: &str,
    args: &[String],
    cwd: Option<&Path>,
    mut check_abort: impl FnMut() -> Option<Abort>,
) -> PmResult<Output> {
    if !command_exists(program) {
        return Err(PmError::CommandMissing {
            command: program.to_owned(),
        });
    }

    let rendered = format!("{} {}", program, args.join(" "));
    let mut command = Command::new(program);
    command
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }

    let mut child = command.spawn()?;
    let stdout_rx = drain_pipe(child.stdout.take());
    let stderr_rx = drain_pipe(child.stderr.take());

    loop {
        if let Some(status) = child.try_wait()? {
            let output = Output {
                status,
                stdout: collect_drained(&stdout_rx),
                stderr: collect_drained(&stderr_rx),
            };
            return validate_command_output(&rendered, output);
        }

        if let Some(abort) = check_abort() {
            kill_and_reap(&mut child);
            return Err(match abort {
                Abort::Cancelled(err) => err,
                Abort::TimedOut(limit) => {
                    let drained = collect_drained(&stderr_rx);
                    PmError::from_command_timeout(
                        rendered,
                        saturating_duration_ms(limit),
                        String::from_utf8_lossy(&drained).into_owned(),
                    )
                }
            });
        }

        thread::sleep(POLL_INTERVAL);
    }
}

/// Read a child pipe to EOF on a helper thread, handing the bytes back over
/// a channel. Keeps the child from blocking on a full pipe while we poll.
fn drain_pipe<R: Read + Send + 'static>(pipe: Option<R>) -> Receiver<Vec<u8>> {
    let (tx, rx) = std::sync::mpsc::channel();
    if let Some(mut pipe) = pipe {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            let _ = tx.send(buf);
        });
    }
    rx
}

fn collect_drained(rx: &Receiver<Vec<u8>>) -> Vec<u8> {
    rx.recv_timeout(DRAIN_GRACE).unwrap_or_default()
}

fn kill_and_reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

fn validate_command_output(rendered: &str, output: Output) -> PmResult<Output> {
    if output.status.success() {
        return Ok(output);
    }

    let status = output.status.code().unwrap_or(-1);
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    Err(PmError::from_command_failure(
        rendered.to_owned(),
        status,
        stderr,
    ))
}

fn saturating_duration_ms(duration: Duration) -> u64 {
    duration.as_millis().try_into().unwrap_or(u64::MAX)
}
