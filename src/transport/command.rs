//! Structured SSH command lines.
//!
//! Every argument is a separate argv entry and the program is executed
//! directly, never through a shell. Host names are still validated so a
//! value like `-oProxyCommand=…` can't be smuggled in as an option.

use std::fmt;
use std::path::{Path, PathBuf};

use tokio::process::Command;

use crate::config::{ConfigError, TransportConfig};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("invalid target host {0:?}")]
    InvalidHost(String),
    #[error("control path {0} is not valid UTF-8")]
    NonUtf8Path(PathBuf),
}

/// Whether `host` is a plain host name or IPv4 address.
///
/// Accepts ASCII letters, digits, `.`, `-` and `_`, and rejects a leading
/// `-` so the value can never be parsed as an option.
pub fn is_safe_host(host: &str) -> bool {
    !host.is_empty()
        && !host.starts_with('-')
        && host
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'-' | b'_'))
}

/// A program plus its argument vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportCommand {
    program: String,
    args: Vec<String>,
}

impl TransportCommand {
    /// Start from `ssh_cmd` and `ssh_args`.
    pub fn new(config: &TransportConfig) -> Result<Self, ConfigError> {
        let mut words = config.base_words()?.into_iter();
        let program = words.next().ok_or(ConfigError::Empty { key: "ssh_cmd" })?;
        Ok(Self {
            program,
            args: words.collect(),
        })
    }

    pub fn host(mut self, host: &str) -> Result<Self, CommandError> {
        if !is_safe_host(host) {
            return Err(CommandError::InvalidHost(host.to_string()));
        }
        self.args.push(host.to_string());
        Ok(self)
    }

    /// Append `flag <path>`.
    pub fn path_arg(mut self, flag: &str, path: &Path) -> Result<Self, CommandError> {
        let path = path
            .to_str()
            .ok_or_else(|| CommandError::NonUtf8Path(path.to_path_buf()))?;
        self.args.push(flag.to_string());
        self.args.push(path.to_string());
        Ok(self)
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn argv(&self) -> &[String] {
        &self.args
    }

    /// A fresh `tokio` command; stdio and process options are up to the caller.
    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }
}

impl fmt::Display for TransportCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let words = std::iter::once(self.program.as_str()).chain(self.args.iter().map(String::as_str));
        match shlex::try_join(words) {
            Ok(line) => f.write_str(&line),
            Err(_) => write!(f, "{} {:?}", self.program, self.args),
        }
    }
}
