//! Emission Compliance Service Library
//!
//! Configuration loading, component wiring, logging, metrics export and
//! graceful shutdown for the process that runs the compliance monitor.

use anyhow::{Context, Result};
use std::path::Path;

pub mod config;
pub mod logging;
pub mod service;
pub mod signals;

pub use config::{EntitySeed, LedgerMode, ServiceConfig};
pub use logging::initialize_logging_with_config;
pub use service::{install_metrics_exporter, ServiceHealth, ServiceState};
pub use signals::{graceful_shutdown, setup_signal_handlers, wait_for_shutdown};

/// Load configuration from an optional file, `.env` and environment variables
pub fn load_configuration(path: Option<&Path>) -> Result<ServiceConfig> {
    config::load_config(path).context("Failed to load service configuration")
}
