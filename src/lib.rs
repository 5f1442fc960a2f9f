#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

//! SSH port forwarding for Slurm jobs.
//!
//! A job asks for tunnels with `--tunnel 8888:9999[,...]`. Depending on where
//! the job was launched from, either the submitting process opens an SSH
//! control master to the first allocated node, or the first compute task opens
//! one back to the submit host. Teardown goes through the same control socket.
//!
//! ## Architecture
//!
//! ```text
//! forward.rs       — `--tunnel` parsing and port validation
//! probe.rs         — local port availability check
//! mode.rs          — execution context, STUNNEL_MODE marker
//! job.rs           — JobContext trait, environment-backed EnvJob
//! hostlist.rs      — first host of a compressed Slurm hostlist
//! session.rs       — control handle path per (uid, job id)
//! config.rs        — TOML + env + plugstack configuration
//! hooks.rs         — lifecycle hook dispatcher
//! error.rs         — TunnelError
//! transport/
//!   command.rs     — validated ssh argv builder
//!   process.rs     — ProcessRunner, detached launch, bounded quiet run
//!   launcher.rs    — control-master launch
//!   closer.rs      — `-O exit` teardown
//! ```

pub mod config;
pub mod error;
pub mod forward;
pub mod hooks;
pub mod hostlist;
pub mod job;
pub mod mode;
pub mod probe;
pub mod session;
pub mod transport;

pub use config::Config;
pub use error::TunnelError;
pub use forward::{Direction, ForwardSet, PortForwardSpec};
pub use hooks::{close_hook, connect_hook, Phase, Plugin};
pub use job::{EnvJob, JobContext};
pub use mode::{ExecutionContext, TunnelMode};
pub use session::{ControlHandle, TunnelSession};
