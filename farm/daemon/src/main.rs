//! Farm Daemon - OpenAI-compatible Load Balancer
//!
//! Entry point for the farm router. Callers talk to it as if it were a
//! single OpenAI-compatible server; it spreads their requests over the
//! configured farm nodes.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (~/.config/neural-farm/farm.toml if present)
//! farm-daemon
//!
//! # Custom port and config file
//! farm-daemon --port 9000 --config /etc/neural-farm/farm.toml
//!
//! # Verbose logging
//! RUST_LOG=debug farm-daemon
//! ```
//!
//! # Signals
//!
//! - `SIGTERM` / `SIGINT`: Graceful shutdown

mod server;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use farm_core::{load_config_from_path, ConfigOverrides, FarmConfig};
use server::FarmServer;

/// Farm Daemon - load balancer for a local LLM farm
#[derive(Parser, Debug)]
#[command(name = "farm-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Listening port
    #[arg(short = 'p', long, value_name = "PORT")]
    port: Option<u16>,

    /// Configuration file path
    #[arg(short = 'c', long, env = "FARM_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "FARM_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

/// Initialize logging with the specified level
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("farm_daemon={level},farm_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

/// Resolve the configuration from file, environment and flags
fn resolve_config(args: &Args) -> Result<FarmConfig> {
    let path = args.config.clone().or_else(farm_core::default_config_path);
    let mut config = load_config_from_path(path).context("Failed to load configuration")?;

    let mut overrides = ConfigOverrides::new();
    if let Some(port) = args.port {
        overrides = overrides.with_port(port);
    }
    overrides.apply(&mut config);

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    info!("Farm daemon starting");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = resolve_config(&args)?;
    info!(source = %config.source(), nodes = config.nodes.len(), "Configuration resolved");
    if let Some(ref path) = config.config_file_path {
        info!(config_path = ?path, "Config file");
    }

    let result = FarmServer::new(config)?.run().await;

    match result {
        Ok(()) => {
            info!("Farm daemon stopped cleanly");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Daemon stopped with error");
            Err(e)
        }
    }
}
