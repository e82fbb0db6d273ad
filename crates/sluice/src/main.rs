//! Sluice - Telemetry pipeline engine
//!
//! # Usage
//!
//! ```bash
//! # Run the pipeline (default)
//! sluice
//! sluice --config configs/sluice.toml
//!
//! # Check a configuration without starting anything
//! sluice validate --config configs/sluice.toml
//! ```

mod cmd;

use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};
use sluice_config::{LogConfig, LogFormat, LogOutput};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Sluice - Telemetry pipeline engine
#[derive(Parser, Debug)]
#[command(name = "sluice")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file (error if specified but not found)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Log level (trace, debug, info, warn, error). Overrides config file.
    #[arg(short, long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the pipeline until SIGINT or SIGTERM
    Serve,
    /// Parse the configuration and build every plugin without starting
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let loaded = cmd::load_config(cli.config.as_deref())?;

    let directives = loaded.config.log.filter_directives(cli.log_level.as_deref());
    init_logging(&directives, &loaded.config.log)?;

    match cli.command {
        Some(Command::Validate) => cmd::validate::run(loaded).await,
        // No subcommand = serve
        Some(Command::Serve) | None => cmd::serve::run(loaded).await,
    }
}

/// Initialize the tracing subscriber for logging
///
/// `directives` is the base level (CLI flag > config file) plus the
/// per-target overrides from `[log.targets]`.
fn init_logging(directives: &str, log: &LogConfig) -> Result<()> {
    let filter = EnvFilter::try_new(directives)
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| anyhow!("invalid log filter: {e}"))?;

    let writer = match log.output {
        LogOutput::Stdout => BoxMakeWriter::new(std::io::stdout),
        LogOutput::Stderr => BoxMakeWriter::new(std::io::stderr),
    };

    let registry = tracing_subscriber::registry().with(filter);
    match log.format {
        LogFormat::Console => registry
            .with(fmt::layer().with_target(true).with_writer(writer))
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_target(true).with_writer(writer))
            .init(),
    }

    Ok(())
}
