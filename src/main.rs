//! Nimbus Daemon - self-hosted serverless function platform
//!
//! Registers user handler functions, builds per-function container images,
//! executes invocations inside isolated containers (standard OCI runtime or
//! user-space kernel sandbox), and records per-invocation telemetry.

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

mod cmd;

#[derive(Parser)]
#[command(name = "nimbus-daemon")]
#[command(about = "Self-hosted serverless function platform daemon")]
#[command(version)]
struct Cli {
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

    // Initialize logging
    let log_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("nimbus_daemon={}", log_level).into()),
        )
        .init();

    info!("Starting Nimbus Daemon v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = cmd::root::run(&cli.config).await {
        error!("Daemon error: {}", e);
        std::process::exit(1);
    }

    Ok(())
}
