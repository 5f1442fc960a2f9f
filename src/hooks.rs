//! Lifecycle hooks.
//!
//! The scheduler calls these in order for every job step:
//!
//! ```text
//! init → option (per --tunnel) → post_option → local_user_init | task_init
//!                                             → exit            | task_exit
//! ```
//!
//! Submission-host processes run `local_user_init`/`exit`, compute-node
//! processes run `task_init`/`task_exit`. Each process builds its own
//! [`Plugin`]; the only state shared between processes is the mode marker in
//! the job environment and the control handle on disk.

use std::path::Path;

use tracing::{debug, error, info};

use crate::config::Config;
use crate::error::TunnelError;
use crate::forward::{ForwardError, ForwardSet};
use crate::hostlist::first_host;
use crate::job::JobContext;
use crate::mode::{read_mode, record_mode, ExecutionContext, TunnelMode, SUBMIT_HOST_ENV};
use crate::session::{build_control_handle, ControlHandle, TunnelSession, CONTROL_FILE_ENV};
use crate::transport::{self, CloseOutcome, ProcessRunner};

/// Name of the user option.
pub const OPTION_NAME: &str = "tunnel";
/// Help text of the user option.
pub const OPTION_USAGE: &str = "<submit port:exec port[,submit port:exec port,...]>";

/// Where this process is in the tunnel lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No `--tunnel` seen; every hook is a no-op.
    Unconfigured,
    /// Forwards parsed. The mode marker is recorded where the context
    /// decides it and inherited elsewhere.
    Configured,
    /// Launch refused because the control handle already existed. The
    /// handle belongs to someone else and is never closed from here.
    Refused,
    /// Launcher succeeded in this process.
    Connected,
    /// Closer ran in this process.
    Closed,
}

/// Per-process tunnel state.
#[derive(Debug, Clone)]
pub struct TunnelState {
    forwards: Option<ForwardSet>,
    handle: Option<ControlHandle>,
    tunnel_host: Option<String>,
    phase: Phase,
}

impl TunnelState {
    fn new() -> Self {
        Self {
            forwards: None,
            handle: None,
            tunnel_host: None,
            phase: Phase::Unconfigured,
        }
    }

    pub fn forwards(&self) -> Option<&ForwardSet> {
        self.forwards.as_ref()
    }

    pub fn handle(&self) -> Option<&ControlHandle> {
        self.handle.as_ref()
    }

    pub fn tunnel_host(&self) -> Option<&str> {
        self.tunnel_host.as_deref()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }
}

/// Hook dispatcher for one process.
pub struct Plugin<R> {
    config: Config,
    runner: R,
    state: TunnelState,
}

impl<R: ProcessRunner> Plugin<R> {
    pub fn new(config: Config, runner: R) -> Self {
        Self {
            config,
            runner,
            state: TunnelState::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> &TunnelState {
        &self.state
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// `init`: apply the plugstack directives.
    pub fn init<S: AsRef<str>>(&mut self, plugin_args: &[S]) -> Result<(), TunnelError> {
        debug!("Parsing plugin configuration");
        self.config.apply_plugin_args(plugin_args);
        self.config.validate()?;
        Ok(())
    }

    /// `option`: one `--tunnel` occurrence.
    ///
    /// A later occurrence replaces the forwards of an earlier one.
    pub fn option(
        &mut self,
        job: &mut impl JobContext,
        optarg: Option<&str>,
    ) -> Result<(), TunnelError> {
        let context = job.context();
        debug!("Option called in {context} context");
        let optarg = optarg.ok_or(ForwardError::Empty)?;
        let forwards = ForwardSet::parse(optarg, context)?;
        self.accept_forwards(job, forwards)
    }

    /// Record already-validated forwards as if they came from `--tunnel`.
    pub fn accept_forwards(
        &mut self,
        job: &mut impl JobContext,
        forwards: ForwardSet,
    ) -> Result<(), TunnelError> {
        debug!("Full args: {}", forwards.args().join(" "));
        if let Some(mode) = TunnelMode::for_option(job.context()) {
            record_mode(job, mode)?;
        }
        self.state.forwards = Some(forwards);
        self.state.phase = Phase::Configured;
        Ok(())
    }

    /// `init_post_op`: on compute nodes, build the handle now so that
    /// `task_exit` has it even if `task_init` never ran.
    pub fn post_option(&mut self, job: &mut impl JobContext) -> Result<(), TunnelError> {
        if !job.context().is_remote() || self.state.phase != Phase::Configured {
            return Ok(());
        }
        self.build_handle(job)?;
        Ok(())
    }

    /// `local_user_init`: submit-host connect to the first allocated node.
    pub async fn local_user_init(&mut self, job: &mut impl JobContext) -> Result<(), TunnelError> {
        if job.context().is_remote() || self.state.phase != Phase::Configured {
            return Ok(());
        }
        if read_mode(job) != Some(TunnelMode::LocalInitiated) {
            debug!("Tunnels are started from the first compute node, skip");
            return Ok(());
        }

        let handle = self.build_handle(job)?;
        let node_list = job.node_list()?;
        let host =
            first_host(&node_list).ok_or_else(|| TunnelError::NoAllocatedNodes(node_list.clone()))?;
        self.connect(TunnelSession::new(handle, host)).await
    }

    /// `task_init`: compute-node connect back to the submit host.
    pub async fn task_init(&mut self, job: &mut impl JobContext) -> Result<(), TunnelError> {
        if !job.context().is_remote() || self.state.phase != Phase::Configured {
            return Ok(());
        }
        if read_mode(job) != Some(TunnelMode::RemoteInitiated) {
            debug!("Tunnels are started locally from submission host, skip");
            return Ok(());
        }

        let host = submit_host(job)?;
        let handle = match self.state.handle.clone() {
            Some(handle) => handle,
            None => self.build_handle(job)?,
        };
        self.connect(TunnelSession::new(handle, host)).await
    }

    /// `task_exit`: compute-node teardown.
    ///
    /// Runs whenever a handle was built, since `task_init` may have run in
    /// another process. A launch refused in this process closes nothing.
    pub async fn task_exit(
        &mut self,
        job: &mut impl JobContext,
    ) -> Result<CloseOutcome, TunnelError> {
        if !job.context().is_remote() {
            return Ok(CloseOutcome::NothingRecorded);
        }
        if read_mode(job) != Some(TunnelMode::RemoteInitiated) {
            debug!("Tunnels are started locally from submission host, skip");
            return Ok(CloseOutcome::NothingRecorded);
        }
        match self.state.phase {
            Phase::Configured | Phase::Connected => {}
            Phase::Refused => {
                debug!("Launch was refused, leaving the existing control file alone");
                return Ok(CloseOutcome::NothingRecorded);
            }
            Phase::Unconfigured | Phase::Closed => return Ok(CloseOutcome::NothingRecorded),
        }
        if self.state.handle.is_none() {
            debug!("Control file is empty, nothing to do");
            return Ok(CloseOutcome::NothingRecorded);
        }
        let host = submit_host(job)?;
        Ok(self.close(&host).await)
    }

    /// `exit`: submit-host teardown.
    pub async fn exit(&mut self, job: &mut impl JobContext) -> Result<CloseOutcome, TunnelError> {
        if job.context().is_remote() || self.state.phase != Phase::Connected {
            return Ok(CloseOutcome::NothingRecorded);
        }
        let Some(host) = self.state.tunnel_host.clone() else {
            debug!("No tunnel was started from this process, nothing to do");
            return Ok(CloseOutcome::NothingRecorded);
        };
        Ok(self.close(&host).await)
    }

    fn build_handle(&mut self, job: &mut impl JobContext) -> Result<ControlHandle, TunnelError> {
        let handle = build_control_handle(job, self.control_dir())?;
        let path = handle.path().to_string_lossy();
        job.setenv(CONTROL_FILE_ENV, &path)?;
        self.state.handle = Some(handle.clone());
        Ok(handle)
    }

    fn control_dir(&self) -> &Path {
        self.config.session.control_dir()
    }

    async fn connect(&mut self, session: TunnelSession) -> Result<(), TunnelError> {
        let Some(forwards) = self.state.forwards.as_ref() else {
            return Ok(());
        };
        let result = transport::connect(&self.runner, &self.config, &session, forwards).await;
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e @ TunnelError::HandleExists(_)) => {
                self.state.handle = None;
                self.state.phase = Phase::Refused;
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        info!(
            "Tunnel to {} started ({outcome:?}), control file {}",
            session.remote_host, session.handle
        );
        self.state.tunnel_host = Some(session.remote_host);
        self.state.phase = Phase::Connected;
        Ok(())
    }

    async fn close(&mut self, host: &str) -> CloseOutcome {
        let outcome =
            transport::close(&self.runner, &self.config, self.state.handle.as_ref(), host).await;
        if outcome.is_success() {
            info!("Tunnel teardown: {outcome:?}");
        } else {
            error!("Tunnel teardown incomplete: {outcome:?}");
        }
        self.state.phase = Phase::Closed;
        outcome
    }
}

fn submit_host(job: &impl JobContext) -> Result<String, TunnelError> {
    match job.getenv(SUBMIT_HOST_ENV).filter(|h| !h.is_empty()) {
        Some(host) => {
            debug!("Submit host {host}");
            Ok(host)
        }
        None => {
            error!("Cannot retrieve submission host name");
            Err(TunnelError::MissingSubmitHost)
        }
    }
}

/// The connect hook for `context`, as run by the `stunnel run` driver.
pub async fn connect_hook<R: ProcessRunner>(
    plugin: &mut Plugin<R>,
    job: &mut impl JobContext,
) -> Result<(), TunnelError> {
    match job.context() {
        ExecutionContext::Local => plugin.local_user_init(job).await,
        ExecutionContext::Remote => plugin.task_init(job).await,
        ExecutionContext::Allocator => Ok(()),
    }
}

/// The teardown hook for `context`.
pub async fn close_hook<R: ProcessRunner>(
    plugin: &mut Plugin<R>,
    job: &mut impl JobContext,
) -> Result<CloseOutcome, TunnelError> {
    match job.context() {
        ExecutionContext::Remote => plugin.task_exit(job).await,
        ExecutionContext::Local | ExecutionContext::Allocator => plugin.exit(job).await,
    }
}
