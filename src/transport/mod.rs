//! SSH transport invocation.
//!
//! - [`command`] — argv builder with per-argument validation
//! - [`process`] — spawning with launch/timeout policies
//! - [`launcher`] — `-f -N -M -S <handle>` control-master launch
//! - [`closer`] — `-S <handle> -O exit` teardown

pub mod closer;
pub mod command;
pub mod launcher;
pub mod process;

pub use closer::{close, CloseOutcome};
pub use command::TransportCommand;
pub use launcher::connect;
pub use process::{ExecError, LaunchOutcome, ProcessRunner, SystemRunner};

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::{ExecError, LaunchOutcome, ProcessRunner, TransportCommand};

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        Launch(TransportCommand),
        RunQuiet(TransportCommand),
    }

    /// Records every invocation instead of spawning anything.
    #[derive(Default)]
    pub struct RecordingRunner {
        pub calls: Mutex<Vec<Call>>,
        pub fail_spawn: bool,
        pub quiet_status: i32,
    }

    impl RecordingRunner {
        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        pub fn launches(&self) -> Vec<TransportCommand> {
            self.calls()
                .into_iter()
                .filter_map(|c| match c {
                    Call::Launch(cmd) => Some(cmd),
                    Call::RunQuiet(_) => None,
                })
                .collect()
        }

        pub fn closes(&self) -> Vec<TransportCommand> {
            self.calls()
                .into_iter()
                .filter_map(|c| match c {
                    Call::RunQuiet(cmd) => Some(cmd),
                    Call::Launch(_) => None,
                })
                .collect()
        }
    }

    #[async_trait]
    impl ProcessRunner for RecordingRunner {
        async fn launch(
            &self,
            command: &TransportCommand,
            _wait: Option<Duration>,
        ) -> Result<LaunchOutcome, ExecError> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Launch(command.clone()));
            if self.fail_spawn {
                return Err(ExecError::SpawnFailed("No such file or directory".into()));
            }
            Ok(LaunchOutcome::Detached { pid: None })
        }

        async fn run_quiet(
            &self,
            command: &TransportCommand,
            _timeout: Duration,
        ) -> Result<i32, ExecError> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::RunQuiet(command.clone()));
            if self.fail_spawn {
                return Err(ExecError::SpawnFailed("No such file or directory".into()));
            }
            Ok(self.quiet_status)
        }
    }
}
