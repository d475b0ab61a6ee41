//! Emission Compliance Service
//!
//! Loads configuration, registers the configured entities, runs the tick and
//! sweep schedulers and shuts down gracefully on Ctrl+C or SIGTERM.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use compliance_service::{
    config::validate_config, graceful_shutdown, initialize_logging_with_config,
    install_metrics_exporter, load_configuration, setup_signal_handlers, wait_for_shutdown,
    ServiceState,
};

#[derive(Parser)]
#[command(name = "compliance-service")]
#[command(about = "Emission compliance scheduler and ledger reconciliation")]
#[command(version)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured log level
    #[arg(long)]
    log_level: Option<String>,

    /// Override the configured log format (json, pretty, compact)
    #[arg(long)]
    log_format: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = load_configuration(cli.config.as_deref())?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }
    validate_config(&config).context("Invalid command line overrides")?;

    initialize_logging_with_config(&config.logging.level, &config.logging.format)?;
    info!("Starting Emission Compliance Service v{}", env!("CARGO_PKG_VERSION"));

    if config.metrics.enabled {
        install_metrics_exporter(&config.metrics)?;
    }

    let service_state = Arc::new(ServiceState::new(config)?);
    service_state.register_seeded_entities().await?;

    let shutdown_signal = setup_signal_handlers()?;
    info!("Signal handlers configured");

    service_state.start_monitor()?;
    info!("Emission Compliance Service is running. Press Ctrl+C to shutdown gracefully.");

    if wait_for_shutdown(shutdown_signal).await {
        info!("Shutdown signal received. Initiating graceful shutdown...");
    }
    graceful_shutdown(service_state).await?;

    info!("Emission Compliance Service shutdown complete");
    Ok(())
}
