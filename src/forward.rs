//! `--tunnel` option parsing.
//!
//! The option value is a comma-separated list of forwards:
//!
//! ```text
//! [D]port:[host:]port          e.g. 8888:9999, R8888:gpu01:9999
//! [D]bind:port:host:port       e.g. L127.0.0.1:8888:localhost:9999
//! ```
//!
//! `D` is `L` or `R`. Without it the direction follows the execution context:
//! `R` on a compute node, `L` everywhere else. The whole option is rejected on
//! the first bad token; no partial set is ever returned.

use std::fmt;

use tracing::debug;

use crate::mode::ExecutionContext;
use crate::probe::port_available;
use crate::transport::command::is_safe_host;

/// Lowest port a user may forward. Privileged ports are refused.
pub const MIN_PORT: u16 = 1024;

/// Host used when a token only carries two ports.
pub const DEFAULT_FORWARD_HOST: &str = "localhost";

/// Which side of the SSH connection listens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// `-L`: the initiating side listens on `local_port`.
    Local,
    /// `-R`: the far side listens on `local_port`.
    Remote,
}

impl Direction {
    /// Direction used for tokens without an explicit `L`/`R` prefix.
    pub fn default_for(context: ExecutionContext) -> Self {
        match context {
            ExecutionContext::Remote => Direction::Remote,
            ExecutionContext::Local | ExecutionContext::Allocator => Direction::Local,
        }
    }

    fn flag(self) -> char {
        match self {
            Direction::Local => 'L',
            Direction::Remote => 'R',
        }
    }
}

/// One validated forward directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortForwardSpec {
    pub direction: Direction,
    /// Optional bind address of the listening side.
    pub local_host: Option<String>,
    pub local_port: u16,
    pub remote_host: String,
    pub remote_port: u16,
}

impl PortForwardSpec {
    /// The port that must be free on this host for the forward to work.
    pub fn probed_port(&self) -> u16 {
        match self.direction {
            Direction::Local => self.local_port,
            Direction::Remote => self.remote_port,
        }
    }

    /// Render as a single transport argument, e.g. `-L9000:localhost:9001`.
    pub fn to_arg(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for PortForwardSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "-{}", self.direction.flag())?;
        if let Some(bind) = &self.local_host {
            write!(f, "{bind}:")?;
        }
        write!(
            f,
            "{}:{}:{}",
            self.local_port, self.remote_host, self.remote_port
        )
    }
}

/// Errors raised while parsing a `--tunnel` value. All are fatal for the job.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ForwardError {
    #[error("--tunnel requires an argument, e.g. 8888:8888")]
    Empty,
    #[error("--tunnel parameter {0:?} needs two numeric ports separated by a colon")]
    MissingPort(String),
    #[error("--tunnel parameter {0:?} has too many fields")]
    TooManyFields(String),
    #[error("--tunnel parameter requires numeric ports, got {0:?}")]
    InvalidPort(String),
    #[error("--tunnel cannot be used for privileged ports (< 1024), got {0}")]
    PrivilegedPort(u16),
    #[error("--tunnel host {0:?} is not a valid host name")]
    InvalidHost(String),
    #[error("port {0} is in use or unavailable")]
    PortUnavailable(u16),
}

/// The full, validated set of forwards from one `--tunnel` option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardSet {
    specs: Vec<PortForwardSpec>,
}

impl ForwardSet {
    /// Parse and validate, probing ports on this host.
    pub fn parse(input: &str, context: ExecutionContext) -> Result<Self, ForwardError> {
        Self::parse_with(input, context, port_available)
    }

    /// Parse and validate with a caller-supplied availability check.
    pub fn parse_with(
        input: &str,
        context: ExecutionContext,
        probe: impl Fn(u16) -> bool,
    ) -> Result<Self, ForwardError> {
        let mut specs = Vec::new();
        for token in input.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let spec = parse_token(token, context)?;
            if !probe(spec.probed_port()) {
                return Err(ForwardError::PortUnavailable(spec.probed_port()));
            }
            debug!("Adding tunnel arg: {spec}");
            specs.push(spec);
        }
        if specs.is_empty() {
            return Err(ForwardError::Empty);
        }
        debug!("{} tunnel pairs specified", specs.len());
        Ok(Self { specs })
    }

    pub fn specs(&self) -> &[PortForwardSpec] {
        &self.specs
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// One transport argument per forward.
    pub fn args(&self) -> Vec<String> {
        self.specs.iter().map(PortForwardSpec::to_arg).collect()
    }
}

fn parse_token(token: &str, context: ExecutionContext) -> Result<PortForwardSpec, ForwardError> {
    let (direction, rest) = match token.as_bytes().first() {
        Some(b'L') => (Direction::Local, &token[1..]),
        Some(b'R') => (Direction::Remote, &token[1..]),
        _ => (Direction::default_for(context), token),
    };

    let fields: Vec<&str> = rest.split(':').collect();
    let (local_host, first, host, second) = match fields.as_slice() {
        [first, second] => (None, *first, DEFAULT_FORWARD_HOST, *second),
        [first, host, second] => (None, *first, *host, *second),
        [bind, first, host, second] => (Some(*bind), *first, *host, *second),
        [_] => return Err(ForwardError::MissingPort(token.to_string())),
        _ => return Err(ForwardError::TooManyFields(token.to_string())),
    };
    if second.is_empty() {
        return Err(ForwardError::MissingPort(token.to_string()));
    }

    let local_port = parse_port(first)?;
    let remote_port = parse_port(second)?;

    if !is_safe_host(host) {
        return Err(ForwardError::InvalidHost(host.to_string()));
    }
    if let Some(bind) = local_host {
        if !is_safe_host(bind) {
            return Err(ForwardError::InvalidHost(bind.to_string()));
        }
    }

    Ok(PortForwardSpec {
        direction,
        local_host: local_host.map(ToString::to_string),
        local_port,
        remote_host: host.to_string(),
        remote_port,
    })
}

fn parse_port(field: &str) -> Result<u16, ForwardError> {
    let port: u16 = field
        .parse()
        .map_err(|_| ForwardError::InvalidPort(field.to_string()))?;
    if port == 0 {
        return Err(ForwardError::InvalidPort(field.to_string()));
    }
    if port < MIN_PORT {
        return Err(ForwardError::PrivilegedPort(port));
    }
    Ok(port)
}
