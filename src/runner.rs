//! Command Runner
//!
//! Spawns one shell command and turns its stdout and stderr into a stream of
//! line events followed by exactly one `Exited` event. Each pipe is read by its
//! own tokio task; nothing here touches the session.

use std::fmt;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

/// How long output may keep arriving after the process has exited
const PIPE_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => write!(f, "stdout"),
            Self::Stderr => write!(f, "stderr"),
        }
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("could not start: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("could not capture {0}")]
    Pipe(Stream),

    #[error("could not wait for exit: {0}")]
    Wait(#[source] std::io::Error),

    #[error("exited with status {0}")]
    ExitCode(i32),

    #[error("terminated by a signal")]
    Signalled,
}

#[derive(Debug)]
pub enum RunnerEvent {
    /// One line, without its terminator
    Line { stream: Stream, text: String },
    /// Always the last event of a run
    Exited(Result<(), RunError>),
}

/// Runs a command line, reporting progress on the returned channel.
///
/// Must not block the caller. Lines of one stream keep their order; the two
/// streams interleave in arrival order.
pub trait CommandRunner: Send + Sync {
    fn run(&self, command_line: &str) -> UnboundedReceiver<RunnerEvent>;
}

/// Runs command lines through `<shell> -c`.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: String,
}

impl ShellRunner {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

impl CommandRunner for ShellRunner {
    fn run(&self, command_line: &str) -> UnboundedReceiver<RunnerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut command = Command::new(&self.shell);
        command
            .arg("-c")
            .arg(command_line)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let command_line = command_line.to_string();
        tokio::spawn(async move {
            let result = drive(command, &tx).await;
            match &result {
                Ok(()) => debug!(command = %command_line, "Command succeeded"),
                Err(e) => warn!(command = %command_line, error = %e, "Command failed"),
            }
            let _ = tx.send(RunnerEvent::Exited(result));
        });

        rx
    }
}

async fn drive(mut command: Command, tx: &UnboundedSender<RunnerEvent>) -> Result<(), RunError> {
    let mut child = command.spawn().map_err(RunError::Spawn)?;
    let stdout = child.stdout.take().ok_or(RunError::Pipe(Stream::Stdout))?;
    let stderr = child.stderr.take().ok_or(RunError::Pipe(Stream::Stderr))?;

    let mut stdout_task = tokio::spawn(forward_lines(stdout, Stream::Stdout, tx.clone()));
    let mut stderr_task = tokio::spawn(forward_lines(stderr, Stream::Stderr, tx.clone()));

    let status = child.wait().await.map_err(RunError::Wait)?;

    // Lines already written are delivered before the exit event. A background
    // grandchild can hold the pipes open forever, so the drain is bounded.
    let drained = tokio::time::timeout(PIPE_DRAIN_TIMEOUT, async {
        let _ = (&mut stdout_task).await;
        let _ = (&mut stderr_task).await;
    })
    .await;
    if drained.is_err() {
        debug!("Output pipes still open after exit, detaching readers");
        stdout_task.abort();
        stderr_task.abort();
    }

    if status.success() {
        Ok(())
    } else {
        Err(status.code().map_or(RunError::Signalled, RunError::ExitCode))
    }
}

async fn forward_lines<R>(reader: R, stream: Stream, tx: UnboundedSender<RunnerEvent>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&buf)
                    .trim_end_matches(['\n', '\r'])
                    .to_string();
                if tx.send(RunnerEvent::Line { stream, text }).is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!(%stream, error = %e, "Failed reading command output");
                break;
            }
        }
    }
}

/// Reports what would run without running anything.
#[derive(Debug, Clone, Default)]
pub struct DryRunRunner;

impl CommandRunner for DryRunRunner {
    fn run(&self, command_line: &str) -> UnboundedReceiver<RunnerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(RunnerEvent::Line {
            stream: Stream::Stdout,
            text: format!("[dry-run] {command_line}"),
        });
        let _ = tx.send(RunnerEvent::Exited(Ok(())));
        rx
    }
}
