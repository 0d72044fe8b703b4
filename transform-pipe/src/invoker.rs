//! Starting and terminating the transform tool subprocess.

use crate::error::PipeError;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::time::timeout;

/// A running tool with its three channels.
///
/// Each channel is taken exactly once by the coordinator. The child is killed
/// if the handle is dropped before it has been reaped.
#[derive(Debug)]
pub struct ProcessHandle {
    pub(crate) child: Child,
    /// Write-only payload channel.
    pub stdin: Option<ChildStdin>,
    /// Read-only result channel.
    pub stdout: Option<ChildStdout>,
    /// Read-only diagnostic channel.
    pub stderr: Option<ChildStderr>,
    tool: PathBuf,
}

/// Spawns `tool` with `args`, all three channels piped. No bytes move yet.
///
/// # Errors
///
/// Returns `PipeError::Spawn` if the tool cannot be found or started.
pub fn spawn_tool(tool: &Path, args: &[OsString]) -> Result<ProcessHandle, PipeError> {
    let mut cmd = Command::new(tool);
    cmd.args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| PipeError::Spawn {
        tool: tool.to_path_buf(),
        source: e,
    })?;

    tracing::debug!(tool = %tool.display(), pid = ?child.id(), "spawned transform tool");

    Ok(ProcessHandle {
        stdin: child.stdin.take(),
        stdout: child.stdout.take(),
        stderr: child.stderr.take(),
        child,
        tool: tool.to_path_buf(),
    })
}

impl ProcessHandle {
    /// The tool this handle runs.
    #[must_use]
    pub fn tool(&self) -> &Path {
        &self.tool
    }

    /// OS process id, `None` once the child has been reaped.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Waits for the exit status.
    ///
    /// # Errors
    ///
    /// Returns `PipeError::Stream` if waiting on the child fails.
    pub async fn wait(&mut self) -> Result<std::process::ExitStatus, PipeError> {
        self.child.wait().await.map_err(|e| PipeError::Stream {
            stage: "wait for tool",
            source: e,
        })
    }

    /// Stops the tool and reaps it: SIGTERM, then SIGKILL after `grace`.
    ///
    /// A tool that has already exited is only reaped.
    ///
    /// # Errors
    ///
    /// Returns `PipeError::Stream` if the child cannot be killed or reaped.
    pub async fn terminate(&mut self, grace: Duration) -> Result<(), PipeError> {
        if matches!(self.child.try_wait(), Ok(Some(_))) {
            return Ok(());
        }
        self.request_stop();

        match timeout(grace, self.child.wait()).await {
            Ok(Ok(_status)) => Ok(()),
            Ok(Err(e)) => Err(PipeError::Stream {
                stage: "terminate wait",
                source: e,
            }),
            Err(_) => {
                tracing::warn!(tool = %self.tool.display(), "tool ignored SIGTERM, killing");
                self.child.kill().await.map_err(|e| PipeError::Stream {
                    stage: "SIGKILL",
                    source: e,
                })
            }
        }
    }

    #[cfg(unix)]
    fn request_stop(&mut self) {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;

        let Some(raw_pid) = self.child.id().and_then(|pid| i32::try_from(pid).ok()) else {
            return;
        };
        if let Err(e) = signal::kill(Pid::from_raw(raw_pid), Signal::SIGTERM) {
            tracing::warn!(pid = raw_pid, error = %e, "failed to send SIGTERM");
        }
    }

    /// Windows: no graceful stop for console processes; go straight to kill.
    #[cfg(windows)]
    fn request_stop(&mut self) {
        if let Err(e) = self.child.start_kill() {
            tracing::warn!(error = %e, "failed to terminate tool");
        }
    }
}
