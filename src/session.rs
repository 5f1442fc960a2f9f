//! Session identity and the SSH control handle.
//!
//! The control handle is the socket OpenSSH creates for a `-M -S <path>`
//! master. Its path is derived from `(uid, job id)` alone, so every process of
//! the same job resolves the same handle, and its presence on disk is the only
//! record that a tunnel is up. Nothing here creates or removes the file; the
//! transport does both.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::job::{JobContext, JobError};

/// Job environment variable exporting the control handle path.
pub const CONTROL_FILE_ENV: &str = "STUNNEL_CONTROL_FILE";

/// Directory holding control handles unless configured otherwise.
pub const DEFAULT_CONTROL_DIR: &str = "/tmp";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HandleError {
    #[error("control directory {0} must be an absolute path")]
    RelativeDirectory(PathBuf),
}

/// Path of the control handle for one job of one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlHandle {
    uid: u32,
    job_id: u32,
    path: PathBuf,
}

impl ControlHandle {
    pub fn for_job(dir: &Path, uid: u32, job_id: u32) -> Result<Self, HandleError> {
        if !dir.is_absolute() {
            return Err(HandleError::RelativeDirectory(dir.to_path_buf()));
        }
        Ok(Self {
            uid,
            job_id,
            path: dir.join(format!("{uid}-{job_id}-control.tunnel")),
        })
    }

    pub fn uid(&self) -> u32 {
        self.uid
    }

    pub fn job_id(&self) -> u32 {
        self.job_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a tunnel currently owns this handle.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }
}

impl fmt::Display for ControlHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// Error from [`build_control_handle`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BuildHandleError {
    #[error(transparent)]
    Job(#[from] JobError),
    #[error(transparent)]
    Handle(#[from] HandleError),
}

/// Resolve the handle for the current job.
pub fn build_control_handle(
    job: &impl JobContext,
    dir: &Path,
) -> Result<ControlHandle, BuildHandleError> {
    let uid = job.uid()?;
    let job_id = job.job_id()?;
    let handle = ControlHandle::for_job(dir, uid, job_id)?;
    debug!("Control file {handle}");
    Ok(handle)
}

/// A handle together with the host the tunnel was opened to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelSession {
    pub handle: ControlHandle,
    pub remote_host: String,
}

impl TunnelSession {
    pub fn new(handle: ControlHandle, remote_host: impl Into<String>) -> Self {
        Self {
            handle,
            remote_host: remote_host.into(),
        }
    }
}
