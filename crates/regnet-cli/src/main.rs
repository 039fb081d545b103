//! regnet entry point.
//!
//! ## Commands
//!
//! - **up** `<codebase> [-w TICKER,address,rpcuser,rpcpass[,ipv4]]... [--image IMAGE]`:
//!   build the chain image, start the environment and bootstrap it
//! - **down** `<codebase>`: stop the environment and restore the codebase
//!
//! Any failure exits with status 1.

mod codebase;
mod commands;
mod config;

use clap::{Parser, Subcommand};
use commands::UpArgs;
use config::RegnetConfig;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "regnet", version, about = "Ephemeral blockchain test networks")]
struct Cli {
    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create a new test environment from the local codebase
    Up(UpArgs),
    /// Stop the local test environment
    Down {
        /// Path to the chain codebase
        codebase: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = RegnetConfig::from_env();

    if let Err(e) = init_tracing(cli.verbose || config.debug) {
        eprintln!("failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    match run(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(debug: bool) -> anyhow::Result<()> {
    // Logs go to stderr
    let directive = if debug { "regnet=debug" } else { "regnet=info" };
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(directive.parse()?))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()?;
    Ok(())
}

async fn run(cli: Cli, config: RegnetConfig) -> anyhow::Result<()> {
    tracing::debug!(?config, "Configuration loaded");
    config.validate_warn();

    // Interrupts stop new work; in-flight calls finish.
    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after in-flight work...");
            interrupt.cancel();
        }
    });

    match cli.command {
        Command::Up(args) => commands::up(&config, args, &cancel).await,
        Command::Down { codebase } => commands::down(&config, codebase, &cancel).await,
    }
}
