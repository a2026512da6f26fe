//! Process supervision: spawning external commands and streaming output.
//!
//! The supervisor runs one external command at a time, captures stdout and
//! stderr line by line, and hands complete lines to the caller over an
//! in-memory channel. A line is only dispatched once its terminating
//! newline is observed; a trailing partial line at stream end is flushed
//! once, after the pipe closes.
//!
//! The line channel is unbounded so that a slow observer-facing stream
//! write never blocks the reader tasks draining the child's pipes.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::warn;

/// Maximum dispatched line length (64 KiB). Longer lines are truncated.
const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Which pipe a line arrived on.
///
/// The classifier treats the two differently: stderr is fatal only on
/// severity keywords, because many CLI tools route informational output
/// there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSource {
    Stdout,
    Stderr,
}

/// One complete output line from the supervised child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub source: StreamSource,
    pub text: String,
}

/// Description of an external command to supervise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    /// Extra environment entries layered over the inherited environment.
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: PathBuf::from("."),
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// Errors raised by the supervisor.
#[derive(Error, Debug)]
pub enum SuperviseError {
    /// The command could not be spawned (missing binary, bad permissions).
    #[error("Failed to spawn command '{command}': {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    /// A stdio pipe was unexpectedly unavailable after spawn.
    #[error("Failed to capture {stream} of command '{command}'")]
    Pipe {
        command: String,
        stream: &'static str,
    },

    /// Waiting for the child's exit status failed.
    #[error("Failed to wait for command '{command}': {source}")]
    Wait {
        command: String,
        source: std::io::Error,
    },
}

/// The supervisor. Stateless; each [`spawn`](Supervisor::spawn) produces an
/// independent [`RunningCommand`].
pub struct Supervisor;

impl Supervisor {
    /// Spawn `spec` and begin streaming its output.
    ///
    /// Returns a [`RunningCommand`] whose line channel yields stdout and
    /// stderr lines in the order each pipe produced them, and closes once
    /// both pipes reach EOF.
    pub fn spawn(spec: &CommandSpec) -> Result<RunningCommand, SuperviseError> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(&spec.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|source| SuperviseError::Spawn {
            command: spec.program.clone(),
            source,
        })?;

        let stdout = child.stdout.take().ok_or(SuperviseError::Pipe {
            command: spec.program.clone(),
            stream: "stdout",
        })?;
        let stderr = child.stderr.take().ok_or(SuperviseError::Pipe {
            command: spec.program.clone(),
            stream: "stderr",
        })?;

        let (lines_tx, lines_rx) = mpsc::unbounded_channel();
        tokio::spawn(read_lines(stdout, StreamSource::Stdout, lines_tx.clone()));
        tokio::spawn(read_lines(stderr, StreamSource::Stderr, lines_tx));

        Ok(RunningCommand {
            command: spec.program.clone(),
            lines: lines_rx,
            child,
        })
    }
}

/// Read one pipe line by line until EOF, sending complete lines.
///
/// `read_line` returns any trailing bytes without a newline exactly once
/// at EOF, which gives the required flush-partial-line-at-end behavior.
async fn read_lines(
    pipe: impl AsyncRead + Unpin,
    source: StreamSource,
    tx: mpsc::UnboundedSender<OutputLine>,
) {
    let mut reader = BufReader::new(pipe);
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break, // EOF
            Ok(_) => {
                while line.ends_with('\n') || line.ends_with('\r') {
                    line.pop();
                }
                if line.len() > MAX_LINE_LENGTH {
                    // The cap may fall inside a multibyte character; back
                    // up to the nearest char boundary before truncating.
                    let mut cut = MAX_LINE_LENGTH;
                    while !line.is_char_boundary(cut) {
                        cut -= 1;
                    }
                    line.truncate(cut);
                    line.push_str("... [truncated]");
                }
                if tx.send(OutputLine {
                    source,
                    text: line.clone(),
                })
                .is_err()
                {
                    break; // Receiver gone; stop draining.
                }
            }
            Err(e) => {
                warn!(?source, error = %e, "error reading child output");
                break;
            }
        }
    }
}

/// Handle to a spawned child: line channel, exit status, termination.
#[derive(Debug)]
pub struct RunningCommand {
    command: String,
    lines: mpsc::UnboundedReceiver<OutputLine>,
    child: Child,
}

impl RunningCommand {
    /// Next complete output line, or `None` once both pipes are closed.
    pub async fn next_line(&mut self) -> Option<OutputLine> {
        self.lines.recv().await
    }

    /// Wait for the child to exit and return its exit code.
    ///
    /// A child killed by a signal has no code; `-1` is reported, matching
    /// the non-zero failure path.
    pub async fn wait(mut self) -> Result<i32, SuperviseError> {
        let status = self
            .child
            .wait()
            .await
            .map_err(|source| SuperviseError::Wait {
                command: self.command.clone(),
                source,
            })?;
        Ok(status.code().unwrap_or(-1))
    }

    /// Gracefully terminate the child: SIGTERM, wait up to `grace`, then
    /// SIGKILL. The child is always reaped before returning.
    #[cfg(unix)]
    pub async fn terminate(&mut self, grace: Duration) {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.child.id() else {
            let _ = self.child.wait().await;
            return;
        };

        if let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            if e != nix::errno::Errno::ESRCH {
                warn!(pid, error = ?e, "SIGTERM failed");
            }
        }

        let deadline = tokio::time::Instant::now() + grace;
        while tokio::time::Instant::now() < deadline {
            if self.child.try_wait().ok().flatten().is_some() {
                return; // Exited gracefully.
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        if let Err(e) = self.child.kill().await {
            warn!(pid, error = %e, "SIGKILL failed");
        }
        let _ = self.child.wait().await;
    }

    /// Non-Unix fallback: no graceful signal available, kill directly.
    #[cfg(not(unix))]
    pub async fn terminate(&mut self, _grace: Duration) {
        let _ = self.child.kill().await;
        let _ = self.child.wait().await;
    }
}
