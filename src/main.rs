//! plz controller - remote command execution daemon
//!
//! Builds snapshot images, leases Docker containers or cloud VMs, runs
//! commands on them, and streams logs and outputs back over HTTP.

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

mod cmd;

#[derive(Parser)]
#[command(name = "plz-controller")]
#[command(about = "plz remote command execution controller")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<cmd::Commands>,

    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("plz_controller={}", log_level).into()),
        )
        .init();

    info!("starting plz controller v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Some(cmd::Commands::Diagnostics) => {
            cmd::diagnostics::run(&cli.config).await?;
        }
        None => {
            if let Err(e) = cmd::root::run(&cli.config).await {
                error!("controller error: {}", e);
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
