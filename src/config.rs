//! Configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **Plugstack directives** — `ssh_cmd=`, `ssh_args=`, `helpertask_args=`,
//!    `control_dir=` passed to the `init` hook. A `|` stands for a space,
//!    since plugstack lines cannot carry literal spaces.
//! 2. **Environment variables** — `STUNNEL_SSH_CMD`, `STUNNEL_SSH_ARGS`,
//!    `STUNNEL_HELPERTASK_ARGS`, `STUNNEL_CONTROL_DIR`
//! 3. **Config file** — path via `--config <path>`, or `stunnel.toml` in CWD
//! 4. **Compiled defaults** — see each field's default value below
//!
//! The TOML file mirrors the struct hierarchy:
//!
//! ```toml
//! [transport]
//! ssh_cmd = "ssh"
//! ssh_args = "-o BatchMode=yes"
//! helpertask_args = ""
//!
//! [session]
//! control_dir = "/tmp"
//! connect_wait_ms = 0          # 0 = do not wait for the tunnel to background
//! teardown_timeout_ms = 10000
//!
//! [logging]
//! level = "info"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// How the SSH transport is invoked.
#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    /// Transport command, possibly with leading options (default `ssh`).
    #[serde(default = "default_ssh_cmd")]
    pub ssh_cmd: String,
    /// Options placed before the target host on every invocation.
    #[serde(default)]
    pub ssh_args: String,
    /// Options appended after the control-master flags when launching.
    #[serde(default)]
    pub helpertask_args: String,
}

/// Control handle placement and process wait policy.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Absolute directory for control handles (default `/tmp`).
    #[serde(default = "default_control_dir")]
    pub control_dir: String,
    /// How long to wait for the launched transport to background itself.
    /// `0` (default) returns as soon as the process is spawned.
    #[serde(default)]
    pub connect_wait_ms: u64,
    /// Upper bound for the control-exit command (default 10 000).
    #[serde(default = "default_teardown_timeout_ms")]
    pub teardown_timeout_ms: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG` env var.
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("{key} has unbalanced quotes: {value:?}")]
    Unparseable { key: &'static str, value: String },
    #[error("{key} must not be empty")]
    Empty { key: &'static str },
}

fn default_ssh_cmd() -> String {
    "ssh".to_string()
}
fn default_control_dir() -> String {
    crate::session::DEFAULT_CONTROL_DIR.to_string()
}
fn default_teardown_timeout_ms() -> u64 {
    10_000
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            ssh_cmd: default_ssh_cmd(),
            ssh_args: String::new(),
            helpertask_args: String::new(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            control_dir: default_control_dir(),
            connect_wait_ms: 0,
            teardown_timeout_ms: default_teardown_timeout_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl TransportConfig {
    /// `ssh_cmd` followed by `ssh_args`, split into argv words.
    pub fn base_words(&self) -> Result<Vec<String>, ConfigError> {
        let mut words = split_words("ssh_cmd", &self.ssh_cmd)?;
        if words.is_empty() {
            return Err(ConfigError::Empty { key: "ssh_cmd" });
        }
        words.extend(split_words("ssh_args", &self.ssh_args)?);
        Ok(words)
    }

    pub fn helpertask_words(&self) -> Result<Vec<String>, ConfigError> {
        split_words("helpertask_args", &self.helpertask_args)
    }
}

impl SessionConfig {
    pub fn control_dir(&self) -> &Path {
        Path::new(&self.control_dir)
    }

    /// `None` means do not wait at all.
    pub fn connect_wait(&self) -> Option<Duration> {
        (self.connect_wait_ms > 0).then(|| Duration::from_millis(self.connect_wait_ms))
    }

    pub fn teardown_timeout(&self) -> Duration {
        Duration::from_millis(self.teardown_timeout_ms)
    }
}

impl Config {
    /// Load configuration with the precedence chain: env vars > file > defaults.
    ///
    /// If `path` is `Some`, reads that file. Otherwise looks for
    /// `stunnel.toml` in the current directory, falling back to compiled
    /// defaults.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(Path::new(p))?,
            None if Path::new("stunnel.toml").exists() => {
                Self::from_file(Path::new("stunnel.toml"))?
            }
            None => Config::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Apply `STUNNEL_*` overrides looked up through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("STUNNEL_SSH_CMD") {
            self.transport.ssh_cmd = v;
        }
        if let Some(v) = lookup("STUNNEL_SSH_ARGS") {
            self.transport.ssh_args = v;
        }
        if let Some(v) = lookup("STUNNEL_HELPERTASK_ARGS") {
            self.transport.helpertask_args = v;
        }
        if let Some(v) = lookup("STUNNEL_CONTROL_DIR") {
            self.session.control_dir = v;
        }
    }

    /// Apply `key=value` directives from the plugstack line.
    ///
    /// Unknown directives are logged and ignored.
    pub fn apply_plugin_args<S: AsRef<str>>(&mut self, args: &[S]) {
        for arg in args {
            let arg = arg.as_ref();
            let Some((key, value)) = arg.split_once('=') else {
                warn!("Ignoring plugin argument {arg:?}");
                continue;
            };
            let value = value.replace('|', " ");
            match key {
                "ssh_cmd" => self.transport.ssh_cmd = value,
                "ssh_args" => self.transport.ssh_args = value,
                "helpertask_args" => self.transport.helpertask_args = value,
                "control_dir" => self.session.control_dir = value,
                _ => warn!("Ignoring unknown plugin argument {key:?}"),
            }
        }
        debug!("ssh_cmd: {}", self.transport.ssh_cmd);
        debug!("ssh_args: {}", self.transport.ssh_args);
        debug!("helpertask_args: {}", self.transport.helpertask_args);
    }

    /// Reject values that would only fail later, at connect time.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.transport.base_words()?;
        self.transport.helpertask_words()?;
        if self.session.control_dir.is_empty() {
            return Err(ConfigError::Empty { key: "control_dir" });
        }
        Ok(())
    }
}

fn split_words(key: &'static str, value: &str) -> Result<Vec<String>, ConfigError> {
    shlex::split(value).ok_or_else(|| ConfigError::Unparseable {
        key,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.transport.base_words().unwrap(), vec!["ssh"]);
        assert!(config.transport.helpertask_words().unwrap().is_empty());
        assert_eq!(config.session.control_dir(), Path::new("/tmp"));
        assert_eq!(config.session.connect_wait(), None);
        assert_eq!(config.session.teardown_timeout(), Duration::from_secs(10));
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_toml_partial() {
        let config: Config = toml::from_str(
            r#"
            [transport]
            ssh_args = "-o BatchMode=yes -p 2222"

            [session]
            connect_wait_ms = 1500
            "#,
        )
        .unwrap();
        assert_eq!(
            config.transport.base_words().unwrap(),
            vec!["ssh", "-o", "BatchMode=yes", "-p", "2222"]
        );
        assert_eq!(config.session.control_dir, "/tmp");
        assert_eq!(
            config.session.connect_wait(),
            Some(Duration::from_millis(1500))
        );
    }

    #[test]
    fn test_plugin_args_replace_pipes() {
        let mut config = Config::default();
        config.apply_plugin_args(&[
            "ssh_cmd=/usr/bin/ssh|-q",
            "ssh_args=-o|StrictHostKeyChecking=no",
            "helpertask_args=-o|ExitOnForwardFailure=yes",
            "control_dir=/run/stunnel",
            "bogus",
            "other=1",
        ]);
        assert_eq!(
            config.transport.base_words().unwrap(),
            vec!["/usr/bin/ssh", "-q", "-o", "StrictHostKeyChecking=no"]
        );
        assert_eq!(
            config.transport.helpertask_words().unwrap(),
            vec!["-o", "ExitOnForwardFailure=yes"]
        );
        assert_eq!(config.session.control_dir, "/run/stunnel");
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env(|key| match key {
            "STUNNEL_SSH_CMD" => Some("autossh".to_string()),
            "STUNNEL_CONTROL_DIR" => Some("/var/run".to_string()),
            _ => None,
        });
        assert_eq!(config.transport.ssh_cmd, "autossh");
        assert_eq!(config.session.control_dir, "/var/run");
        assert_eq!(config.transport.ssh_args, "");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.transport.ssh_cmd = "   ".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Empty { key: "ssh_cmd" })
        ));

        let mut config = Config::default();
        config.transport.ssh_args = "-o 'unterminated".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Unparseable { key: "ssh_args", .. })
        ));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stunnel.toml");
        std::fs::write(&path, "[logging]\nlevel = \"debug\"\n").unwrap();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.logging.level, "debug");

        std::fs::write(&path, "[logging\n").unwrap();
        assert!(matches!(
            Config::from_file(&path),
            Err(ConfigError::Parse { .. })
        ));
    }
}
