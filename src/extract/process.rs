//! Ownership of the external processes a session spawns.

use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::extract::error::ExtractError;

/// Pipes taken from a freshly spawned process.
#[derive(Debug)]
pub(crate) struct ProcessPipes {
    pub(crate) stdin: Option<ChildStdin>,
    pub(crate) stdout: ChildStdout,
    pub(crate) stderr: ChildStderr,
}

/// A spawned external process, owned by one session.
///
/// Only the session terminates a handle. Helpers may observe its exit
/// through [`ExitWatch`].
#[derive(Debug)]
pub(crate) struct ProcessHandle {
    tool: &'static str,
    child: Arc<Mutex<Child>>,
}

/// Read-only view used to await a process's exit.
#[derive(Debug, Clone)]
pub(crate) struct ExitWatch {
    child: Arc<Mutex<Child>>,
}

impl ExitWatch {
    pub(crate) async fn wait(&self) -> std::io::Result<ExitStatus> {
        self.child.lock().await.wait().await
    }
}

impl ProcessHandle {
    /// Spawns `command` with piped stdout/stderr, and piped stdin when
    /// `with_stdin` is set.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::ToolUnavailable`] when the executable cannot be
    /// started (missing binary, permission denied).
    pub(crate) fn spawn(
        tool: &'static str,
        mut command: Command,
        with_stdin: bool,
    ) -> Result<(Self, ProcessPipes), ExtractError> {
        command
            .stdin(if with_stdin {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|source| ExtractError::ToolUnavailable { tool, source })?;
        info!(tool, pid = ?child.id(), "spawned process");

        let stdin = child.stdin.take();
        let pipes = match (child.stdout.take(), child.stderr.take()) {
            (Some(stdout), Some(stderr)) if stdin.is_some() || !with_stdin => ProcessPipes {
                stdin,
                stdout,
                stderr,
            },
            _ => {
                let _ = child.start_kill();
                return Err(ExtractError::MissingPipe {
                    tool,
                    pipe: "stdio",
                });
            }
        };

        Ok((
            Self {
                tool,
                child: Arc::new(Mutex::new(child)),
            },
            pipes,
        ))
    }

    pub(crate) fn tool(&self) -> &'static str {
        self.tool
    }

    pub(crate) fn exit_watch(&self) -> ExitWatch {
        ExitWatch {
            child: self.child.clone(),
        }
    }

    /// Waits up to `limit` for the process to exit on its own.
    pub(crate) async fn wait_timeout(&self, limit: Duration) -> Option<ExitStatus> {
        let mut child = self.child.lock().await;
        match tokio::time::timeout(limit, child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => {
                warn!(tool = self.tool, error = %e, "waiting for process failed");
                None
            }
            Err(_) => None,
        }
    }

    /// Sends a kill signal, tolerating a process that already exited.
    pub(crate) async fn signal(&self) {
        if let Err(e) = self.child.lock().await.start_kill() {
            debug!(tool = self.tool, error = %e, "kill skipped, process already gone");
        }
    }

    /// Waits for the process to terminate so no zombie remains.
    pub(crate) async fn reap(&self) -> Option<ExitStatus> {
        match self.child.lock().await.wait().await {
            Ok(status) => {
                debug!(tool = self.tool, %status, "process reaped");
                Some(status)
            }
            Err(e) => {
                warn!(tool = self.tool, error = %e, "failed to reap process");
                None
            }
        }
    }

    /// Kills and reaps the process.
    pub(crate) async fn terminate(&self) -> Option<ExitStatus> {
        self.signal().await;
        self.reap().await
    }

    /// Synchronous variant of [`terminate`](Self::terminate) for `Drop`:
    /// signals now and reaps on a detached task when a runtime is available.
    pub(crate) fn abandon(self) {
        if let Ok(mut child) = self.child.try_lock() {
            let _ = child.start_kill();
        }
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                self.terminate().await;
            });
        }
        // Without a runtime, `kill_on_drop` still signals the child.
    }
}
