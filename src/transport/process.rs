//! Low-level process spawning for transport commands.
//!
//! Two shapes of invocation exist: [`ProcessRunner::launch`] for the tunnel
//! itself, which must outlive the hook process, and
//! [`ProcessRunner::run_quiet`] for short control commands that are waited on
//! with a hard timeout and killed if they overrun.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::command::TransportCommand;

/// Result of [`ProcessRunner::launch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchOutcome {
    /// Spawned and not waited on.
    Detached { pid: Option<u32> },
    /// The foreground process exited successfully within the wait window,
    /// leaving the tunnel running in the background.
    Backgrounded,
    /// Still running when the wait window closed. Left alone.
    Pending { pid: Option<u32> },
}

/// Errors from running a transport process.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ExecError {
    /// The binary could not be started (e.g. not found, permission denied).
    #[error("Failed to spawn process: {0}")]
    SpawnFailed(String),
    /// The child process started but `wait()` failed.
    #[error("Process error: {0}")]
    ProcessFailed(String),
    /// The process exited unsuccessfully (`-1` when killed by a signal).
    #[error("Process exited with status {0}")]
    Exited(i32),
    /// The command exceeded its timeout and was killed.
    #[error("Command timed out")]
    Timeout,
}

/// Spawns transport commands. Swapped out in tests.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Start a long-lived transport process.
    ///
    /// With `wait = None` this returns as soon as the process is spawned.
    /// Otherwise it waits up to `wait` for the process to exit; a non-zero
    /// exit within the window is an error.
    async fn launch(
        &self,
        command: &TransportCommand,
        wait: Option<Duration>,
    ) -> Result<LaunchOutcome, ExecError>;

    /// Run a command with all stdio discarded and return its exit code.
    async fn run_quiet(&self, command: &TransportCommand, timeout: Duration)
        -> Result<i32, ExecError>;
}

/// Runs commands as real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

#[async_trait]
impl ProcessRunner for SystemRunner {
    async fn launch(
        &self,
        command: &TransportCommand,
        wait: Option<Duration>,
    ) -> Result<LaunchOutcome, ExecError> {
        let mut cmd = command.to_command();
        // stderr stays attached so authentication failures reach the user.
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .kill_on_drop(false);
        // SAFETY: setpgid is async-signal-safe per POSIX.
        unsafe {
            cmd.pre_exec(|| {
                libc::setpgid(0, 0);
                Ok(())
            });
        }
        let mut child = cmd
            .spawn()
            .map_err(|e| ExecError::SpawnFailed(e.to_string()))?;
        let pid = child.id();
        debug!("Transport spawned (pid {pid:?})");

        let Some(wait) = wait else {
            return Ok(LaunchOutcome::Detached { pid });
        };

        match tokio::time::timeout(wait, child.wait()).await {
            Ok(Ok(status)) if status.success() => Ok(LaunchOutcome::Backgrounded),
            Ok(Ok(status)) => Err(ExecError::Exited(status.code().unwrap_or(-1))),
            Ok(Err(e)) => Err(ExecError::ProcessFailed(e.to_string())),
            Err(_) => {
                warn!(
                    "Transport (pid {pid:?}) still in foreground after {}ms, leaving it running",
                    wait.as_millis()
                );
                Ok(LaunchOutcome::Pending { pid })
            }
        }
    }

    async fn run_quiet(
        &self,
        command: &TransportCommand,
        timeout: Duration,
    ) -> Result<i32, ExecError> {
        let mut child = command
            .to_command()
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExecError::SpawnFailed(e.to_string()))?;

        // On timeout the child is dropped here and killed.
        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => Ok(status.code().unwrap_or(-1)),
            Ok(Err(e)) => Err(ExecError::ProcessFailed(e.to_string())),
            Err(_) => Err(ExecError::Timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportConfig;

    fn command(line: &str) -> TransportCommand {
        TransportCommand::new(&TransportConfig {
            ssh_cmd: line.to_string(),
            ..TransportConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_run_quiet_exit_codes() {
        let runner = SystemRunner;
        let ok = runner
            .run_quiet(&command("sh -c 'echo noise; exit 0'"), Duration::from_secs(5))
            .await;
        assert_eq!(ok, Ok(0));
        let failed = runner
            .run_quiet(&command("sh -c 'exit 3'"), Duration::from_secs(5))
            .await;
        assert_eq!(failed, Ok(3));
    }

    #[tokio::test]
    async fn test_run_quiet_timeout() {
        let result = SystemRunner
            .run_quiet(&command("sleep 5"), Duration::from_millis(100))
            .await;
        assert_eq!(result, Err(ExecError::Timeout));
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let result = SystemRunner
            .launch(&command("/nonexistent/stunnel-transport"), None)
            .await;
        assert!(matches!(result, Err(ExecError::SpawnFailed(_))));
    }

    #[tokio::test]
    async fn test_launch_wait_policies() {
        let runner = SystemRunner;
        let detached = runner.launch(&command("true"), None).await.unwrap();
        assert!(matches!(detached, LaunchOutcome::Detached { pid: Some(_) }));

        let backgrounded = runner
            .launch(&command("true"), Some(Duration::from_secs(5)))
            .await;
        assert_eq!(backgrounded, Ok(LaunchOutcome::Backgrounded));

        let failed = runner
            .launch(&command("false"), Some(Duration::from_secs(5)))
            .await;
        assert_eq!(failed, Err(ExecError::Exited(1)));

        let pending = runner
            .launch(&command("sleep 1"), Some(Duration::from_millis(50)))
            .await
            .unwrap();
        assert!(matches!(pending, LaunchOutcome::Pending { .. }));
    }
}
