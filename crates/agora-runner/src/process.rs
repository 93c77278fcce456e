//! One-shot agent process execution.
//!
//! Each turn is a fresh process. Output is read from both pipes as it
//! arrives; any output resets the idle timer while the total timer keeps
//! running. Cancellation kills the process immediately.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

use crate::error::TimeoutKind;

const READ_CHUNK: usize = 4096;

/// What to run.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    /// Give the process a closed stdin instead of inheriting ours.
    pub close_stdin: bool,
}

impl ProcessSpec {
    /// Builds a spec from a full argv. Returns `None` for an empty argv.
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
            cwd: None,
            env: Vec::new(),
            close_stdin: false,
        })
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }

    pub fn with_close_stdin(mut self, close: bool) -> Self {
        self.close_stdin = close;
        self
    }
}

/// Idle and total limits for one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnLimits {
    pub idle: Duration,
    pub total: Duration,
}

impl TurnLimits {
    pub fn new(idle: Duration, total: Duration) -> Self {
        Self { idle, total }
    }
}

/// Captured output of a finished process.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code, `None` when killed by a signal.
    pub code: Option<i32>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Why a process did not run to completion.
#[derive(Debug)]
pub enum ProcessFailure {
    Spawn(std::io::Error),
    Io(std::io::Error),
    Timeout {
        kind: TimeoutKind,
        /// Output captured before the kill.
        partial: ProcessOutput,
    },
    Cancelled,
}

/// Resolves once the channel holds `true`. Never resolves if the sender is gone.
pub(crate) async fn signalled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

async fn read_some<R: AsyncRead + Unpin>(
    stream: &mut Option<R>,
    buf: &mut [u8],
) -> std::io::Result<usize> {
    match stream {
        Some(stream) => stream.read(buf).await,
        None => Ok(0),
    }
}

fn partial_output(out: &[u8], err: &[u8]) -> ProcessOutput {
    ProcessOutput {
        stdout: String::from_utf8_lossy(out).into_owned(),
        stderr: String::from_utf8_lossy(err).into_owned(),
        code: None,
    }
}

async fn terminate(child: &mut Child) {
    if let Err(e) = child.kill().await {
        debug!(error = %e, "kill failed, process probably already exited");
    }
}

/// Runs the process to completion.
///
/// `cancel` and `kill` are both abort signals: the first comes from the
/// caller, the second from the runner's process registry.
pub async fn run_process(
    spec: &ProcessSpec,
    limits: TurnLimits,
    cancel: &mut watch::Receiver<bool>,
    kill: &mut watch::Receiver<bool>,
) -> Result<ProcessOutput, ProcessFailure> {
    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(if spec.close_stdin {
            Stdio::null()
        } else {
            Stdio::inherit()
        })
        .kill_on_drop(true);
    if let Some(cwd) = &spec.cwd {
        command.current_dir(cwd);
    }

    let mut child = command.spawn().map_err(ProcessFailure::Spawn)?;
    debug!(program = %spec.program, pid = ?child.id(), "spawned agent process");

    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();
    let mut out_buf: Vec<u8> = Vec::new();
    let mut err_buf: Vec<u8> = Vec::new();
    let mut out_chunk = [0u8; READ_CHUNK];
    let mut err_chunk = [0u8; READ_CHUNK];
    let mut out_open = stdout.is_some();
    let mut err_open = stderr.is_some();

    let started = Instant::now();
    let total_deadline = started + limits.total;
    let mut idle_deadline = started + limits.idle;

    while out_open || err_open {
        tokio::select! {
            read = read_some(&mut stdout, &mut out_chunk), if out_open => match read {
                Ok(0) => out_open = false,
                Ok(n) => {
                    out_buf.extend_from_slice(&out_chunk[..n]);
                    idle_deadline = Instant::now() + limits.idle;
                }
                Err(e) => {
                    terminate(&mut child).await;
                    return Err(ProcessFailure::Io(e));
                }
            },
            read = read_some(&mut stderr, &mut err_chunk), if err_open => match read {
                Ok(0) => err_open = false,
                Ok(n) => {
                    err_buf.extend_from_slice(&err_chunk[..n]);
                    idle_deadline = Instant::now() + limits.idle;
                }
                Err(e) => {
                    terminate(&mut child).await;
                    return Err(ProcessFailure::Io(e));
                }
            },
            _ = sleep_until(idle_deadline) => {
                warn!(program = %spec.program, idle_secs = limits.idle.as_secs(), "agent process idle timeout");
                terminate(&mut child).await;
                return Err(ProcessFailure::Timeout { kind: TimeoutKind::Idle, partial: partial_output(&out_buf, &err_buf) });
            }
            _ = sleep_until(total_deadline) => {
                warn!(program = %spec.program, total_secs = limits.total.as_secs(), "agent process total timeout");
                terminate(&mut child).await;
                return Err(ProcessFailure::Timeout { kind: TimeoutKind::Total, partial: partial_output(&out_buf, &err_buf) });
            }
            _ = signalled(cancel) => {
                terminate(&mut child).await;
                return Err(ProcessFailure::Cancelled);
            }
            _ = signalled(kill) => {
                terminate(&mut child).await;
                return Err(ProcessFailure::Cancelled);
            }
        }
    }

    // Pipes are closed; the process is exiting or has detached them.
    let status = tokio::select! {
        status = child.wait() => status.map_err(ProcessFailure::Io)?,
        _ = sleep_until(total_deadline) => {
            terminate(&mut child).await;
            return Err(ProcessFailure::Timeout { kind: TimeoutKind::Total, partial: partial_output(&out_buf, &err_buf) });
        }
        _ = signalled(cancel) => {
            terminate(&mut child).await;
            return Err(ProcessFailure::Cancelled);
        }
        _ = signalled(kill) => {
            terminate(&mut child).await;
            return Err(ProcessFailure::Cancelled);
        }
    };

    debug!(
        program = %spec.program,
        code = ?status.code(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "agent process finished"
    );

    Ok(ProcessOutput {
        stdout: String::from_utf8_lossy(&out_buf).into_owned(),
        stderr: String::from_utf8_lossy(&err_buf).into_owned(),
        code: status.code(),
    })
}
