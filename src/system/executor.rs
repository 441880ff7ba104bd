// src/system/executor.rs

use crate::{CancellationToken, models::ExitInfo, system::shell};
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// How often a running process checks the cancellation flag.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long output is still read once the process has exited. Background
/// processes it started may hold the pipes open for much longer.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// How many trailing stderr lines are kept in a `NonZeroExitStatus` error.
const STDERR_TAIL_LINES: usize = 20;

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Working directory '{0}' does not exist.")]
    MissingWorkingDir(String),
    #[error("Command '{0}' could not be executed: {1}")]
    CommandFailed(String, #[source] std::io::Error),
    #[error("Could not prepare the script file for '{label}': {source}")]
    ScriptFile {
        label: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Command '{command}' exited with code {code:?}: {stderr}")]
    NonZeroExitStatus {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("Operation was cancelled by the user.")]
    Cancelled,
}

/// Everything needed to run one opaque command line.
#[derive(Debug, Clone, Copy)]
pub struct Invocation<'a> {
    /// Shown in front of echoed output lines.
    pub label: &'a str,
    pub command: &'a str,
    pub cwd: &'a Path,
    /// Shell used to interpret the command (`sh`, `bash`, ...).
    pub shell: &'a str,
    /// Echo the command and output to the operator's terminal.
    pub visible: bool,
    /// Hand the command to the shell as a script file instead of `-c`.
    pub use_script_file: bool,
}

/// Runs a command line through the shell and waits for it, honouring the
/// cancellation token.
///
/// A non-zero exit is *not* an error here: it is reported through
/// `ExitInfo::code` so callers can classify it. Errors are reserved for
/// processes that never ran (spawn failures) or were cancelled. An empty
/// command is a successful no-op.
pub async fn run_shell(
    invocation: Invocation<'_>,
    cancellation_token: &CancellationToken,
) -> Result<ExitInfo, ExecutionError> {
    let trimmed_command = invocation.command.trim();
    if trimmed_command.is_empty() {
        return Ok(ExitInfo {
            code: Some(0),
            ..Default::default()
        });
    }
    if cancellation_token.load(Ordering::SeqCst) {
        return Err(ExecutionError::Cancelled);
    }

    let clean_cwd = dunce::simplified(invocation.cwd);
    if !clean_cwd.is_dir() {
        return Err(ExecutionError::MissingWorkingDir(
            clean_cwd.display().to_string(),
        ));
    }

    let mut command = Command::new(invocation.shell);
    // The script must outlive the child process, so the guard is held until we return.
    let _script_guard = if invocation.use_script_file {
        let script = shell::write_script_file(trimmed_command).map_err(|source| {
            ExecutionError::ScriptFile {
                label: invocation.label.to_string(),
                source,
            }
        })?;
        command.arg(script.as_os_str());
        Some(script)
    } else {
        command.arg(shell::inline_flag(invocation.shell)).arg(trimmed_command);
        None
    };

    if invocation.visible {
        if invocation.use_script_file {
            shell::announce(invocation.label, "(script)");
        } else {
            shell::announce(invocation.label, trimmed_command);
        }
    }

    command
        .current_dir(clean_cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .map_err(|e| ExecutionError::CommandFailed(describe(invocation), e))?;
    log::debug!(
        "[{}] spawned '{}' (PID: {:?})",
        invocation.label,
        describe(invocation),
        child.id()
    );

    let label = invocation.label.to_string();
    let stdout_reader = child
        .stdout
        .take()
        .map(|out| spawn_line_reader(out, label.clone(), invocation.visible));
    let stderr_reader = child
        .stderr
        .take()
        .map(|err| spawn_line_reader(err, label.clone(), invocation.visible));

    let status = tokio::select! {
        status = child.wait() => status
            .map_err(|e| ExecutionError::CommandFailed(describe(invocation), e))?,
        _ = wait_for_cancellation(cancellation_token) => {
            log::debug!("[{}] cancellation requested, killing child process (PID: {:?})...", label, child.id());
            if let Err(e) = child.kill().await {
                log::warn!("[{}] failed to kill child process: {}", label, e);
            }
            // Grandchildren may still hold the pipes open; stop reading them.
            for reader in [stdout_reader, stderr_reader].into_iter().flatten() {
                reader.abort();
            }
            return Err(ExecutionError::Cancelled);
        }
    };

    let deadline = Instant::now() + OUTPUT_DRAIN_TIMEOUT;
    let stdout = collect_lines(stdout_reader, deadline, cancellation_token).await;
    let stderr = collect_lines(stderr_reader, deadline, cancellation_token).await;
    log::debug!("[{}] finished with status {:?}", label, status.code());

    Ok(ExitInfo {
        code: status.code(),
        stdout,
        stderr,
    })
}

/// Runs a short query command silently and returns its standard output.
/// A non-zero exit becomes `NonZeroExitStatus` carrying the tail of stderr.
pub async fn capture_output(
    command_line: &str,
    cwd: &Path,
    shell: &str,
    cancellation_token: &CancellationToken,
) -> Result<String, ExecutionError> {
    let invocation = Invocation {
        label: "query",
        command: command_line,
        cwd,
        shell,
        visible: false,
        use_script_file: false,
    };
    let exit = run_shell(invocation, cancellation_token).await?;
    if !exit.success() {
        return Err(ExecutionError::NonZeroExitStatus {
            command: command_line.trim().to_string(),
            code: exit.code,
            stderr: stderr_tail(&exit.stderr),
        });
    }
    Ok(exit.stdout)
}

/// The last lines of a captured stderr stream, for error messages.
pub fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines.get(start..).unwrap_or_default().join("\n")
}

fn describe(invocation: Invocation<'_>) -> String {
    if invocation.use_script_file {
        format!("<script for {}>", invocation.label)
    } else {
        invocation.command.trim().to_string()
    }
}

/// A task copying one output stream into a shared buffer, so whatever was
/// read survives an aborted reader.
struct LineReader {
    handle: JoinHandle<()>,
    captured: Arc<Mutex<String>>,
}

impl LineReader {
    fn abort(&self) {
        self.handle.abort();
    }
}

fn spawn_line_reader<R>(stream: R, label: String, echo: bool) -> LineReader
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let captured = Arc::new(Mutex::new(String::new()));
    let sink = Arc::clone(&captured);
    let handle = tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if echo {
                        shell::echo_line(&label, &line);
                    }
                    let mut captured = sink.lock().unwrap_or_else(PoisonError::into_inner);
                    captured.push_str(&line);
                    captured.push('\n');
                }
                Ok(None) => break,
                Err(e) => {
                    log::trace!("[{}] output stream ended with error: {}", label, e);
                    break;
                }
            }
        }
    });
    LineReader { handle, captured }
}

/// Waits for a reader to reach end of stream, but no later than `deadline`
/// and never past cancellation.
async fn collect_lines(
    reader: Option<LineReader>,
    deadline: Instant,
    cancellation_token: &CancellationToken,
) -> String {
    let Some(mut reader) = reader else {
        return String::new();
    };
    let drained = tokio::select! {
        _ = &mut reader.handle => true,
        _ = tokio::time::sleep_until(deadline) => {
            log::debug!("Output pipe still open after the process exited; no longer reading it.");
            false
        }
        _ = wait_for_cancellation(cancellation_token) => false,
    };
    if !drained {
        reader.abort();
    }
    let mut captured = reader.captured.lock().unwrap_or_else(PoisonError::into_inner);
    std::mem::take(&mut *captured)
}

/// Resolves once the token is set. Polled, like the rest of the cancellation plumbing.
pub async fn wait_for_cancellation(cancellation_token: &CancellationToken) {
    while !cancellation_token.load(Ordering::SeqCst) {
        tokio::time::sleep(CANCEL_POLL_INTERVAL).await;
    }
}
