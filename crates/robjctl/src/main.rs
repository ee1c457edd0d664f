//! robjctl - Remote Objects CLI
//!
//! Serve a shared map as root object, call methods on a remote root and run
//! the counter benchmark.

#![deny(static_mut_refs)]
#![deny(unused_must_use)]
#![deny(clippy::unwrap_used)]

mod commands;
mod completion;
mod error;
mod output;
mod values;

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};
use remote_objects::ConnectionConfig;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::commands::{BenchArgs, CallArgs, ServeArgs};
use crate::error::CliError;

#[derive(Parser)]
#[command(name = "robjctl")]
#[command(about = "Remote Objects CLI - Serve, call and benchmark remote objects")]
#[command(version)]
#[command(long_about = "
robjctl talks to processes exporting objects over the remote objects protocol.
It can export a shared map as root object, call methods on a remote root
(optionally passing a block that prints what the method yields) and run the
counter benchmark against a server.

Use --json flag for machine-readable output suitable for scripting.
")]
struct Cli {
    /// Output format (human-readable or JSON)
    #[arg(
        long,
        global = true,
        help = "Output in JSON format for machine parsing"
    )]
    json: bool,

    /// Verbose logging
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Connection settings file (JSON)
    #[arg(long, global = true, env = "ROBJCTL_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export a shared map as root object and serve until interrupted
    Serve(ServeArgs),

    /// Call a method on the remote root object
    Call(CallArgs),

    /// Increment a remote counter and report the elapsed time
    Bench(BenchArgs),

    /// Generate shell completion scripts
    Completion {
        /// Shell to generate completion for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("robjctl={log_level},remote_objects={log_level}").into()
            }),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    match execute_command(&cli) {
        Ok(()) => Ok(()),
        Err(e) => {
            if cli.json {
                output::print_error_json(&e);
            } else {
                output::print_error_human(&e);
            }

            let exit_code = match e.downcast_ref::<CliError>() {
                Some(CliError::NotFound(_)) => 2,
                Some(CliError::Remote(_)) => 3,
                Some(CliError::InvalidArgument(_))
                | Some(CliError::InvalidConfiguration(_))
                | Some(CliError::JsonError(_)) => 4,
                Some(CliError::ServiceUnavailable(_)) => 5,
                Some(CliError::PermissionDenied(_)) => 6,
                _ => 1,
            };

            std::process::exit(exit_code);
        }
    }
}

/// Load connection settings, falling back to the defaults.
fn load_config(path: Option<&Path>) -> Result<ConnectionConfig, CliError> {
    let Some(path) = path else {
        return Ok(ConnectionConfig::default());
    };
    debug!("Loading connection settings from {}", path.display());
    let text = std::fs::read_to_string(path)?;
    Ok(ConnectionConfig::from_json(&text)?)
}

fn execute_command(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Serve(args) => {
            commands::serve::execute(args, load_config(cli.config.as_deref())?, cli.json)
        }
        Commands::Call(args) => {
            commands::call::execute(args, load_config(cli.config.as_deref())?, cli.json)
        }
        Commands::Bench(args) => {
            commands::bench::execute(args, load_config(cli.config.as_deref())?, cli.json)
        }
        Commands::Completion { shell } => {
            completion::generate_completion(*shell);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn parse_call_defaults() -> TestResult {
        let cli = Cli::try_parse_from(["robjctl", "call", "size"])?;
        assert!(!cli.json);
        assert_eq!(cli.verbose, 0);
        assert!(cli.config.is_none());
        match &cli.command {
            Commands::Call(args) => {
                assert_eq!(args.method, "size");
                assert!(args.args.is_empty());
                assert!(!args.by_ref);
                assert!(!args.block);
            }
            _ => return Err("expected Call command".into()),
        }
        Ok(())
    }

    #[test]
    fn parse_call_arguments_keep_negative_numbers() -> TestResult {
        let cli = Cli::try_parse_from(["robjctl", "call", "increment", ":counter", "-5"])?;
        match &cli.command {
            Commands::Call(args) => assert_eq!(args.args, vec![":counter", "-5"]),
            _ => return Err("expected Call command".into()),
        }
        Ok(())
    }

    #[test]
    fn parse_global_flags_before_subcommand() -> TestResult {
        let cli = Cli::try_parse_from(["robjctl", "--json", "-vv", "call", "size"])?;
        assert!(cli.json);
        assert_eq!(cli.verbose, 2);
        Ok(())
    }

    #[test]
    fn parse_serve_options() -> TestResult {
        let cli = Cli::try_parse_from([
            "robjctl",
            "serve",
            "--listen",
            "127.0.0.1:0",
            "--set",
            "counter=1",
            "--deny",
            "clear",
        ])?;
        match &cli.command {
            Commands::Serve(args) => {
                assert_eq!(args.listen, "127.0.0.1:0");
                assert_eq!(args.entries, vec!["counter=1"]);
                assert_eq!(args.deny, vec!["clear"]);
            }
            _ => return Err("expected Serve command".into()),
        }
        Ok(())
    }

    #[test]
    fn parse_bench_defaults() -> TestResult {
        let cli = Cli::try_parse_from(["robjctl", "bench"])?;
        match &cli.command {
            Commands::Bench(args) => {
                assert_eq!(args.iterations, 10_000);
                assert_eq!(args.key, "counter");
                assert_eq!(args.threads, 1);
            }
            _ => return Err("expected Bench command".into()),
        }
        Ok(())
    }

    #[test]
    fn missing_config_file_is_io_error() {
        let result = load_config(Some(Path::new("/nonexistent/robjctl.json")));
        assert!(matches!(result, Err(CliError::IoError(_))));
    }

    #[test]
    fn no_config_file_means_defaults() -> TestResult {
        assert_eq!(load_config(None)?, ConnectionConfig::default());
        Ok(())
    }
}
