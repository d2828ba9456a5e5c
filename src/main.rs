//! # Capture Relay CLI (`capture-relay`)
//!
//! Runs one relay pass: scan the capture directory, update the ledger and
//! dispatch changed notes to every enabled consumer.
//!
//! ## Usage
//!
//! ```bash
//! capture-relay [--config PATH] [--consumer NAME]... [--list-consumers] [--log-level LEVEL]
//! ```
//!
//! ## Exit codes
//!
//! | Code | Meaning |
//! |------|---------|
//! | 0 | Every record handled (or nothing to do) |
//! | 1 | A consumer failed on some record, or a fatal error occurred |
//! | 2 | `--consumer` filters matched no enabled consumer |

use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::builder::PossibleValuesParser;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use capture_relay::config::{self, default_config_path};
use capture_relay::consumer::ConsumerRegistry;
use capture_relay::run;

/// Fan out changed capture notes to automation consumers.
#[derive(Parser)]
#[command(name = "capture-relay", version, about)]
struct Cli {
    /// Path to the TOML config.
    ///
    /// Defaults to `~/.config/para-organize/automations.toml`. A missing
    /// file means built-in defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Limit the run to the named consumers (repeatable, case-insensitive).
    #[arg(long = "consumer", value_name = "NAME")]
    consumers: Vec<String>,

    /// Print the enabled consumers and exit.
    #[arg(long)]
    list_consumers: bool,

    /// Override the log level from the config.
    #[arg(
        long,
        value_name = "LEVEL",
        ignore_case = true,
        value_parser = PossibleValuesParser::new(["DEBUG", "INFO", "WARNING", "WARN", "ERROR"])
    )]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let config = match config::load_config(Some(&config_path)) {
        Ok(config) => config,
        Err(e) => {
            init_tracing(cli.log_level.as_deref(), "INFO");
            tracing::error!(path = %config_path.display(), error = %format!("{:#}", e), "failed to load config");
            return ExitCode::from(1);
        }
    };
    init_tracing(cli.log_level.as_deref(), &config.log_level);

    let registry = ConsumerRegistry::with_builtins();

    if cli.list_consumers {
        return match run::list_consumers(&config, &registry) {
            Ok(names) => {
                for name in names {
                    println!("{}", name);
                }
                ExitCode::SUCCESS
            }
            Err(e) => {
                tracing::error!(error = %format!("{:#}", e), "invalid consumer configuration");
                ExitCode::from(1)
            }
        };
    }

    match run::run(&config, &registry, &cli.consumers).await {
        Ok(outcome) => ExitCode::from(outcome.exit_code()),
        Err(e) => {
            tracing::error!(error = %format!("{:#}", e), "run aborted");
            capture_relay::runtime::log_command_output(&e);
            ExitCode::from(1)
        }
    }
}

/// `--log-level` wins, then `RUST_LOG`, then the config level.
fn init_tracing(flag: Option<&str>, config_level: &str) {
    let filter = match flag {
        Some(level) => EnvFilter::new(directive(level)),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(directive(config_level))),
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(false)
        .try_init();
}

fn directive(level: &str) -> &'static str {
    match level.to_ascii_uppercase().as_str() {
        "DEBUG" => "debug",
        "WARNING" | "WARN" => "warn",
        "ERROR" => "error",
        _ => "info",
    }
}
