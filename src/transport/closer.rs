//! Tearing the tunnel down through its control handle.
//!
//! Teardown never fails the hook chain. Every problem is logged and reported
//! through [`CloseOutcome`] so the job can finish regardless.

use tracing::{debug, error};

use super::command::TransportCommand;
use super::process::ProcessRunner;
use crate::config::Config;
use crate::error::TunnelError;
use crate::session::ControlHandle;

/// What a close attempt did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseOutcome {
    /// This process never built a handle.
    NothingRecorded,
    /// A handle was built but no tunnel holds it any more.
    AlreadyGone,
    /// The control-exit command ran and returned this status.
    Closed(i32),
    /// The control-exit command could not be built, spawned or finished.
    Failed(String),
}

impl CloseOutcome {
    /// `false` only when a live tunnel may have been left behind.
    pub fn is_success(&self) -> bool {
        match self {
            CloseOutcome::NothingRecorded | CloseOutcome::AlreadyGone => true,
            CloseOutcome::Closed(status) => *status == 0,
            CloseOutcome::Failed(_) => false,
        }
    }
}

/// Build `ssh_cmd ssh_args <host> -S <handle> -O exit`.
pub fn close_command(
    config: &Config,
    handle: &ControlHandle,
    host: &str,
) -> Result<TransportCommand, TunnelError> {
    let command = TransportCommand::new(&config.transport)?
        .host(host)?
        .path_arg("-S", handle.path())?
        .args(["-O", "exit"]);
    Ok(command)
}

/// Ask the control master behind `handle` on `host` to exit.
pub async fn close<R: ProcessRunner + ?Sized>(
    runner: &R,
    config: &Config,
    handle: Option<&ControlHandle>,
    host: &str,
) -> CloseOutcome {
    let Some(handle) = handle else {
        debug!("Control file is empty, nothing to do");
        return CloseOutcome::NothingRecorded;
    };
    debug!("Control file is {handle}");
    debug!("Tunnel host is {host}");

    if !handle.exists() {
        error!("Control file {handle} does not exist");
        return CloseOutcome::AlreadyGone;
    }

    let command = match close_command(config, handle, host) {
        Ok(command) => command,
        Err(e) => {
            error!("Error while creating kill cmd: {e}");
            return CloseOutcome::Failed(e.to_string());
        }
    };
    debug!("ssh_cmd: {command}");

    match runner
        .run_quiet(&command, config.session.teardown_timeout())
        .await
    {
        Ok(status) => {
            if status != 0 {
                error!("Kill cmd {command} exited with status {status}");
            }
            CloseOutcome::Closed(status)
        }
        Err(e) => {
            error!("Unable to exec kill cmd {command}: {e}");
            CloseOutcome::Failed(e.to_string())
        }
    }
}
