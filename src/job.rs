//! Job metadata and job-environment access.
//!
//! The scheduler owns job identity, the allocation and the job environment.
//! Hooks only see them through [`JobContext`]. [`EnvJob`] is the implementation
//! used by the `stunnel` binary: it reads the variables Slurm exports into
//! every job step and collects writes in an overlay that is handed to the
//! wrapped command.

use std::collections::{BTreeMap, HashMap};

use tracing::warn;

use crate::mode::ExecutionContext;

/// Capabilities the hooks need from the scheduler.
pub trait JobContext {
    /// Which side of the job this process represents.
    fn context(&self) -> ExecutionContext;
    /// Uid of the job owner.
    fn uid(&self) -> Result<u32, JobError>;
    /// Numeric job id.
    fn job_id(&self) -> Result<u32, JobError>;
    /// Compressed hostlist of the job allocation, e.g. `node[01-04]`.
    fn node_list(&self) -> Result<String, JobError>;
    /// Read a variable from the job environment.
    fn getenv(&self, name: &str) -> Option<String>;
    /// Set a variable in the job environment.
    fn setenv(&mut self, name: &str, value: &str) -> Result<(), JobError>;
}

/// Failure to obtain job identity or to update the job environment.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum JobError {
    #[error("cannot get {0} from the job environment")]
    Missing(&'static str),
    #[error("invalid {name} {value:?} in the job environment")]
    Invalid { name: &'static str, value: String },
    #[error("cannot set {0} in the job environment")]
    Setenv(String),
}

const JOB_UID_VARS: &[&str] = &["SLURM_JOB_UID"];
const JOB_ID_VARS: &[&str] = &["SLURM_JOB_ID", "SLURM_JOBID"];
const NODE_LIST_VARS: &[&str] = &["SLURM_JOB_NODELIST", "SLURM_NODELIST"];

/// [`JobContext`] backed by a snapshot of the process environment.
#[derive(Debug, Clone)]
pub struct EnvJob {
    context: ExecutionContext,
    base: HashMap<String, String>,
    overlay: BTreeMap<String, String>,
}

impl EnvJob {
    /// Snapshot the current process environment.
    pub fn from_env(context: ExecutionContext) -> Self {
        Self::from_vars(context, std::env::vars())
    }

    pub fn from_vars<K, V>(context: ExecutionContext, vars: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            context,
            base: vars
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            overlay: BTreeMap::new(),
        }
    }

    /// Variables written by hooks, to be exported to the job's processes.
    pub fn exports(&self) -> &BTreeMap<String, String> {
        &self.overlay
    }

    fn first_of(&self, names: &[&str]) -> Option<String> {
        names
            .iter()
            .find_map(|name| self.getenv(name))
            .filter(|v| !v.is_empty())
    }

    fn numeric(&self, names: &[&'static str]) -> Result<Option<u32>, JobError> {
        let Some(value) = self.first_of(names) else {
            return Ok(None);
        };
        value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| JobError::Invalid {
                name: names[0],
                value,
            })
    }
}

impl JobContext for EnvJob {
    fn context(&self) -> ExecutionContext {
        self.context
    }

    fn uid(&self) -> Result<u32, JobError> {
        if let Some(uid) = self.numeric(JOB_UID_VARS)? {
            return Ok(uid);
        }
        // Compute-node hooks may run as root; only the submitting process
        // is known to run as the job owner.
        if self.context.is_remote() {
            return Err(JobError::Missing("uid"));
        }
        // SAFETY: getuid has no preconditions and cannot fail.
        let uid = unsafe { libc::getuid() };
        warn!("SLURM_JOB_UID not set, using process uid {uid}");
        Ok(uid)
    }

    fn job_id(&self) -> Result<u32, JobError> {
        self.numeric(JOB_ID_VARS)?
            .ok_or(JobError::Missing("job id"))
    }

    fn node_list(&self) -> Result<String, JobError> {
        self.first_of(NODE_LIST_VARS)
            .ok_or(JobError::Missing("node list"))
    }

    fn getenv(&self, name: &str) -> Option<String> {
        self.overlay
            .get(name)
            .or_else(|| self.base.get(name))
            .cloned()
    }

    fn setenv(&mut self, name: &str, value: &str) -> Result<(), JobError> {
        if name.is_empty() || name.contains('=') || name.contains('\0') || value.contains('\0') {
            return Err(JobError::Setenv(name.to_string()));
        }
        self.overlay.insert(name.to_string(), value.to_string());
        Ok(())
    }
}
