#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # stunnel
//!
//! Driver for the Slurm tunnel hooks.
//!
//! ## Subcommands
//!
//! - `stunnel run` — run one side's hooks around a wrapped command
//! - `stunnel check` — validate a `--tunnel` value and print the ssh flags
//! - `stunnel handle` — print the control file of a job
//! - `stunnel close` — tear a tunnel down by hand

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use spank_stunnel::config::Config;
use spank_stunnel::hooks::{close_hook, connect_hook, Plugin};
use spank_stunnel::job::EnvJob;
use spank_stunnel::mode::ExecutionContext;
use spank_stunnel::session::ControlHandle;
use spank_stunnel::transport::{self, SystemRunner};
use spank_stunnel::ForwardSet;

/// SSH port forwarding for Slurm jobs.
#[derive(Parser)]
#[command(name = "stunnel", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the hook sequence of one side around a command.
    Run {
        /// Path to TOML config file.
        #[arg(long)]
        config: Option<String>,
        /// Where this process runs: local, remote or allocator.
        #[arg(long, default_value = "local")]
        context: ExecutionContext,
        /// Forwards, as for `--tunnel`. May be repeated; the last one wins.
        #[arg(long = "tunnel", env = "STUNNEL_TUNNEL")]
        tunnels: Vec<String>,
        /// Plugstack directive (`ssh_args=-o|BatchMode=yes`). May be repeated.
        #[arg(long = "plugin-arg")]
        plugin_args: Vec<String>,
        /// Command to run while the tunnel is up.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command: Vec<String>,
    },
    /// Validate a `--tunnel` value and print the resulting ssh flags.
    Check {
        #[arg(long)]
        tunnel: String,
        #[arg(long, default_value = "local")]
        context: ExecutionContext,
    },
    /// Print the control file path of a job.
    Handle {
        #[arg(long)]
        config: Option<String>,
        /// Job owner; defaults to the current user.
        #[arg(long)]
        uid: Option<u32>,
        #[arg(long)]
        job_id: u32,
    },
    /// Close the tunnel held by a job's control file.
    Close {
        #[arg(long)]
        config: Option<String>,
        #[arg(long)]
        uid: Option<u32>,
        #[arg(long)]
        job_id: u32,
        /// Host the tunnel was opened to.
        #[arg(long)]
        host: String,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            context,
            tunnels,
            plugin_args,
            command,
        } => match load_config(config.as_deref()) {
            Some(config) => run(config, context, &tunnels, &plugin_args, &command).await,
            None => ExitCode::FAILURE,
        },
        Commands::Check { tunnel, context } => {
            init_tracing("info".to_string());
            match ForwardSet::parse(&tunnel, context) {
                Ok(forwards) => {
                    println!("{}", forwards.args().join(" "));
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    error!("Invalid tunnel {tunnel:?}: {e}");
                    ExitCode::FAILURE
                }
            }
        }
        Commands::Handle {
            config,
            uid,
            job_id,
        } => {
            let Some(config) = load_config(config.as_deref()) else {
                return ExitCode::FAILURE;
            };
            match ControlHandle::for_job(config.session.control_dir(), uid_or_current(uid), job_id)
            {
                Ok(handle) => {
                    println!("{handle}");
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    error!("{e}");
                    ExitCode::FAILURE
                }
            }
        }
        Commands::Close {
            config,
            uid,
            job_id,
            host,
        } => {
            let Some(config) = load_config(config.as_deref()) else {
                return ExitCode::FAILURE;
            };
            let handle = match ControlHandle::for_job(
                config.session.control_dir(),
                uid_or_current(uid),
                job_id,
            ) {
                Ok(handle) => handle,
                Err(e) => {
                    error!("{e}");
                    return ExitCode::FAILURE;
                }
            };
            let outcome = transport::close(&SystemRunner, &config, Some(&handle), &host).await;
            info!("Teardown of {handle}: {outcome:?}");
            if outcome.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

/// Load the config and install the tracing subscriber it asks for.
fn load_config(path: Option<&str>) -> Option<Config> {
    let loaded = Config::load(path);
    let level = loaded
        .as_ref()
        .map_or_else(|_| "info".to_string(), |c| c.logging.level.clone());

    init_tracing(level);

    match loaded {
        Ok(config) => Some(config),
        Err(e) => {
            error!("Failed to load config: {e}");
            None
        }
    }
}

/// Log to stderr, filtered by `RUST_LOG` or else `level`.
fn init_tracing(level: String) {
    let log_filter = std::env::var("RUST_LOG").unwrap_or(level);
    tracing_subscriber::fmt()
        .with_env_filter(log_filter)
        .with_writer(std::io::stderr)
        .init();
}

fn uid_or_current(uid: Option<u32>) -> u32 {
    // SAFETY: getuid has no preconditions and cannot fail.
    uid.unwrap_or_else(|| unsafe { libc::getuid() })
}

async fn run(
    config: Config,
    context: ExecutionContext,
    tunnels: &[String],
    plugin_args: &[String],
    command: &[String],
) -> ExitCode {
    info!("stunnel v{} starting in {context} context", env!("CARGO_PKG_VERSION"));

    let mut job = EnvJob::from_env(context);
    let mut plugin = Plugin::new(config, SystemRunner);

    if let Err(e) = plugin.init(plugin_args) {
        error!("init: {e}");
        return ExitCode::FAILURE;
    }
    for tunnel in tunnels {
        if let Err(e) = plugin.option(&mut job, Some(tunnel)) {
            error!("Invalid tunnel {tunnel:?}: {e}");
            return ExitCode::FAILURE;
        }
    }
    if let Err(e) = plugin.post_option(&mut job) {
        error!("init_post_op: {e}");
        return ExitCode::FAILURE;
    }
    if let Err(e) = connect_hook(&mut plugin, &mut job).await {
        error!("{e}");
        teardown(&mut plugin, &mut job).await;
        return ExitCode::FAILURE;
    }

    let status = run_wrapped(command, &job).await;
    teardown(&mut plugin, &mut job).await;
    status
}

async fn run_wrapped(command: &[String], job: &EnvJob) -> ExitCode {
    let Some((program, args)) = command.split_first() else {
        return ExitCode::SUCCESS;
    };
    debug!("Running {program} with {} exported variables", job.exports().len());

    let mut child = match Command::new(program)
        .args(args)
        .envs(job.exports())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            error!("Failed to start {program}: {e}");
            return ExitCode::from(127);
        }
    };

    tokio::select! {
        status = child.wait() => match status {
            Ok(status) => {
                let code = status.code().unwrap_or(1);
                debug!("{program} exited with {code}");
                ExitCode::from(u8::try_from(code).unwrap_or(1))
            }
            Err(e) => {
                error!("Failed to wait for {program}: {e}");
                ExitCode::FAILURE
            }
        },
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, stopping {program}");
            if let Err(e) = child.kill().await {
                warn!("Failed to stop {program}: {e}");
            }
            ExitCode::from(130)
        }
    }
}

async fn teardown(plugin: &mut Plugin<SystemRunner>, job: &mut EnvJob) {
    if let Err(e) = close_hook(plugin, job).await {
        error!("{e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_arguments() {
        let cli = Cli::try_parse_from([
            "stunnel", "check", "--tunnel", "R8888:db:9999", "--context", "remote",
        ])
        .unwrap();
        match cli.command {
            Commands::Check { tunnel, context } => {
                assert_eq!(tunnel, "R8888:db:9999");
                assert_eq!(context, ExecutionContext::Remote);
            }
            _ => panic!("expected check"),
        }
        let bad_context = ["stunnel", "check", "--context", "nowhere", "--tunnel", "1:2"];
        assert!(Cli::try_parse_from(bad_context).is_err());
    }

    #[test]
    fn test_run_collects_repeated_tunnels_and_command() {
        let cli = Cli::try_parse_from([
            "stunnel", "run", "--tunnel", "9000:9001", "--tunnel", "9100:9101", "--", "sh", "-c",
            "exit 3",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                tunnels, command, context, ..
            } => {
                assert_eq!(tunnels, ["9000:9001", "9100:9101"]);
                assert_eq!(command, ["sh", "-c", "exit 3"]);
                assert_eq!(context, ExecutionContext::Local);
            }
            _ => panic!("expected run"),
        }
    }

    #[tokio::test]
    async fn test_run_wrapped_reports_exit_status() {
        let job = EnvJob::from_vars(ExecutionContext::Local, [("SLURM_JOB_ID", "42")]);
        let command = ["sh".to_string(), "-c".to_string(), "exit 3".to_string()];
        let status = run_wrapped(&command, &job).await;
        assert_eq!(format!("{status:?}"), format!("{:?}", ExitCode::from(3)));
        let missing = ["/nonexistent/stunnel-wrapped".to_string()];
        let status = run_wrapped(&missing, &job).await;
        assert_eq!(format!("{status:?}"), format!("{:?}", ExitCode::from(127)));
    }
}
