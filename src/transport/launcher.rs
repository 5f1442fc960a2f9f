//! Starting the background tunnel.

use tracing::{debug, error, info};

use super::command::TransportCommand;
use super::process::{LaunchOutcome, ProcessRunner};
use crate::config::Config;
use crate::error::TunnelError;
use crate::forward::ForwardSet;
use crate::session::TunnelSession;

/// Flags that background the transport and make it the control master.
const MASTER_FLAGS: [&str; 3] = ["-f", "-N", "-M"];

/// Build the launch invocation:
/// `ssh_cmd ssh_args <host> <forwards> -f -N -M -S <handle> helpertask_args`.
pub fn launch_command(
    config: &Config,
    session: &TunnelSession,
    forwards: &ForwardSet,
) -> Result<TransportCommand, TunnelError> {
    let command = TransportCommand::new(&config.transport)?
        .host(&session.remote_host)?
        .args(forwards.args())
        .args(MASTER_FLAGS)
        .path_arg("-S", session.handle.path())?
        .args(config.transport.helpertask_words()?);
    Ok(command)
}

/// Launch the tunnel for `session`.
///
/// Refuses to run when the control handle already exists: either a tunnel
/// for this job is already up, or a previous one was not torn down. Success
/// only means the transport was started, not that the forwards are serving.
pub async fn connect<R: ProcessRunner + ?Sized>(
    runner: &R,
    config: &Config,
    session: &TunnelSession,
    forwards: &ForwardSet,
) -> Result<LaunchOutcome, TunnelError> {
    info!("Connecting node {}", session.remote_host);

    if session.handle.exists() {
        error!(
            "ssh control file {} already exists. Either you already have a tunnel in place, \
             or one did not terminate correctly. Please remove this file.",
            session.handle
        );
        return Err(TunnelError::HandleExists(session.handle.path().to_path_buf()));
    }

    let command = launch_command(config, session, forwards)?;
    debug!("ssh_cmd: {command}");

    runner
        .launch(&command, config.session.connect_wait())
        .await
        .map_err(|source| {
            error!(
                "Unable to connect node {} with command {command}: {source}",
                session.remote_host
            );
            TunnelError::Launch {
                host: session.remote_host.clone(),
                source,
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::ExecutionContext;
    use crate::session::ControlHandle;
    use crate::transport::process::ExecError;
    use crate::transport::testing::RecordingRunner;

    fn fixture(dir: &std::path::Path) -> (Config, TunnelSession, ForwardSet) {
        let mut config = Config::default();
        config.transport.ssh_args = "-o BatchMode=yes".to_string();
        config.transport.helpertask_args = "-o ExitOnForwardFailure=yes".to_string();
        let handle = ControlHandle::for_job(dir, 1000, 42).unwrap();
        let forwards =
            ForwardSet::parse_with("9000:9001,R9100:db:9101", ExecutionContext::Local, |_| true)
                .unwrap();
        (config, TunnelSession::new(handle, "node01"), forwards)
    }

    #[test]
    fn test_launch_command_layout() {
        let dir = tempfile::tempdir().unwrap();
        let (config, session, forwards) = fixture(dir.path());
        let command = launch_command(&config, &session, &forwards).unwrap();
        let handle = session.handle.path().to_str().unwrap();
        assert_eq!(command.program(), "ssh");
        assert_eq!(
            command.argv(),
            &[
                "-o",
                "BatchMode=yes",
                "node01",
                "-L9000:localhost:9001",
                "-R9100:db:9101",
                "-f",
                "-N",
                "-M",
                "-S",
                handle,
                "-o",
                "ExitOnForwardFailure=yes",
            ]
        );
    }

    #[tokio::test]
    async fn test_connect_spawns_once() {
        let dir = tempfile::tempdir().unwrap();
        let (config, session, forwards) = fixture(dir.path());
        let runner = RecordingRunner::default();
        let outcome = connect(&runner, &config, &session, &forwards).await.unwrap();
        assert_eq!(outcome, LaunchOutcome::Detached { pid: None });
        assert_eq!(runner.launches().len(), 1);
    }

    #[tokio::test]
    async fn test_existing_handle_refused() {
        let dir = tempfile::tempdir().unwrap();
        let (config, session, forwards) = fixture(dir.path());
        std::fs::write(session.handle.path(), b"").unwrap();
        let runner = RecordingRunner::default();
        let err = connect(&runner, &config, &session, &forwards)
            .await
            .unwrap_err();
        assert!(matches!(err, TunnelError::HandleExists(ref p) if p == session.handle.path()));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_spawn_failure_reported() {
        let dir = tempfile::tempdir().unwrap();
        let (config, session, forwards) = fixture(dir.path());
        let runner = RecordingRunner {
            fail_spawn: true,
            ..RecordingRunner::default()
        };
        let err = connect(&runner, &config, &session, &forwards)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TunnelError::Launch {
                source: ExecError::SpawnFailed(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_invalid_host_never_spawns() {
        let dir = tempfile::tempdir().unwrap();
        let (config, mut session, forwards) = fixture(dir.path());
        session.remote_host = "-oProxyCommand=id".to_string();
        let runner = RecordingRunner::default();
        let err = connect(&runner, &config, &session, &forwards)
            .await
            .unwrap_err();
        assert!(matches!(err, TunnelError::Command(_)));
        assert!(runner.calls().is_empty());
    }
}
