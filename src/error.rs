//! Errors returned by hooks.
//!
//! Any `Err` from a hook is fatal for the job: the driver logs it and exits
//! non-zero. Teardown problems are not errors, see
//! [`CloseOutcome`](crate::transport::closer::CloseOutcome).

use std::path::PathBuf;

use crate::config::ConfigError;
use crate::forward::ForwardError;
use crate::job::JobError;
use crate::session::{BuildHandleError, HandleError};
use crate::transport::command::CommandError;
use crate::transport::process::ExecError;

#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    #[error(transparent)]
    Forward(#[from] ForwardError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Job(#[from] JobError),
    #[error(transparent)]
    Handle(#[from] HandleError),
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error("ssh control file {} already exists; remove it if no tunnel is running", .0.display())]
    HandleExists(PathBuf),
    #[error("unable to connect node {host}: {source}")]
    Launch { host: String, source: ExecError },
    #[error("cannot retrieve submission host name (SLURM_SUBMIT_HOST)")]
    MissingSubmitHost,
    #[error("job has no allocated nodes defined (node list {0:?})")]
    NoAllocatedNodes(String),
}

impl From<BuildHandleError> for TunnelError {
    fn from(e: BuildHandleError) -> Self {
        match e {
            BuildHandleError::Job(e) => TunnelError::Job(e),
            BuildHandleError::Handle(e) => TunnelError::Handle(e),
        }
    }
}
