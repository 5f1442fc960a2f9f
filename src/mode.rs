//! Execution context and the cross-process tunnel mode marker.
//!
//! Every hook of a job runs in a separate process, so the decision of which
//! side opens the tunnel is carried in the job environment under
//! [`MODE_ENV`]:
//!
//! | Marker | Mode                | Who connects                       |
//! |--------|---------------------|------------------------------------|
//! | `0`    | [`TunnelMode::LocalInitiated`]  | submit host, to first node   |
//! | `1`    | [`TunnelMode::RemoteInitiated`] | first node, to submit host   |
//! | unset  | —                   | nobody, no `--tunnel` was given    |

use std::fmt;
use std::str::FromStr;

use tracing::{debug, warn};

use crate::job::{JobContext, JobError};

/// Job environment variable holding the tunnel mode marker.
pub const MODE_ENV: &str = "STUNNEL_MODE";

/// Job environment variable naming the host that submitted the job.
pub const SUBMIT_HOST_ENV: &str = "SLURM_SUBMIT_HOST";

/// Which side of the job the current process represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionContext {
    /// `srun` on the submission host.
    Local,
    /// `slurmstepd` on an allocated compute node.
    Remote,
    /// `sbatch` / `salloc` on the submission host.
    Allocator,
}

impl ExecutionContext {
    pub fn is_remote(self) -> bool {
        self == ExecutionContext::Remote
    }
}

impl FromStr for ExecutionContext {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(ExecutionContext::Local),
            "remote" => Ok(ExecutionContext::Remote),
            "allocator" => Ok(ExecutionContext::Allocator),
            other => Err(format!(
                "unknown context {other:?} (expected local, remote or allocator)"
            )),
        }
    }
}

impl fmt::Display for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExecutionContext::Local => "local",
            ExecutionContext::Remote => "remote",
            ExecutionContext::Allocator => "allocator",
        })
    }
}

/// Which side actually opens the tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelMode {
    LocalInitiated,
    RemoteInitiated,
}

impl TunnelMode {
    pub fn as_marker(self) -> &'static str {
        match self {
            TunnelMode::LocalInitiated => "0",
            TunnelMode::RemoteInitiated => "1",
        }
    }

    pub fn from_marker(marker: &str) -> Option<Self> {
        match marker.trim() {
            "0" => Some(TunnelMode::LocalInitiated),
            "1" => Some(TunnelMode::RemoteInitiated),
            _ => None,
        }
    }

    /// Mode recorded when `--tunnel` is parsed in `context`.
    ///
    /// Compute nodes never decide; they inherit the marker set on the submit
    /// side. `sbatch`/`salloc` have no local connect hook, so the first node
    /// must open the tunnel.
    pub fn for_option(context: ExecutionContext) -> Option<Self> {
        match context {
            ExecutionContext::Local => Some(TunnelMode::LocalInitiated),
            ExecutionContext::Allocator => Some(TunnelMode::RemoteInitiated),
            ExecutionContext::Remote => None,
        }
    }
}

/// Read the mode marker from the job environment.
///
/// An unrecognised marker is treated like a missing one.
pub fn read_mode(job: &impl JobContext) -> Option<TunnelMode> {
    let marker = job.getenv(MODE_ENV)?;
    debug!("Tunnel mode marker: {marker}");
    let mode = TunnelMode::from_marker(&marker);
    if mode.is_none() {
        warn!("Ignoring unrecognised {MODE_ENV} value {marker:?}");
    }
    mode
}

/// Write the mode marker into the job environment.
pub fn record_mode(job: &mut impl JobContext, mode: TunnelMode) -> Result<(), JobError> {
    debug!("Recording tunnel mode {mode:?}");
    job.setenv(MODE_ENV, mode.as_marker())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::EnvJob;

    #[test]
    fn test_marker_round_trip() {
        for mode in [TunnelMode::LocalInitiated, TunnelMode::RemoteInitiated] {
            assert_eq!(TunnelMode::from_marker(mode.as_marker()), Some(mode));
        }
        assert_eq!(TunnelMode::from_marker("yes"), None);
    }

    #[test]
    fn test_mode_for_option() {
        assert_eq!(
            TunnelMode::for_option(ExecutionContext::Local),
            Some(TunnelMode::LocalInitiated)
        );
        assert_eq!(
            TunnelMode::for_option(ExecutionContext::Allocator),
            Some(TunnelMode::RemoteInitiated)
        );
        assert_eq!(TunnelMode::for_option(ExecutionContext::Remote), None);
    }

    #[test]
    fn test_record_then_read() {
        let mut job = EnvJob::from_vars(ExecutionContext::Local, Vec::<(String, String)>::new());
        assert_eq!(read_mode(&job), None);
        record_mode(&mut job, TunnelMode::LocalInitiated).unwrap();
        assert_eq!(read_mode(&job), Some(TunnelMode::LocalInitiated));
    }

    #[test]
    fn test_garbage_marker_reads_as_absent() {
        let job = EnvJob::from_vars(ExecutionContext::Remote, [(MODE_ENV, "maybe")]);
        assert_eq!(read_mode(&job), None);
    }

    #[test]
    fn test_context_from_str() {
        assert_eq!("Remote".parse::<ExecutionContext>(), Ok(ExecutionContext::Remote));
        assert!("cluster".parse::<ExecutionContext>().is_err());
    }
}
