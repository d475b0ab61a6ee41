//! Service configuration management

use anyhow::{anyhow, Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;

use compliance_clock::ClockConfig;
use compliance_engine::EngineConfig;
use ledger_gateway::{GatewayConfig, RpcConfig};

/// Prefix for environment overrides, e.g. `COMPLIANCE__CLOCK__TICK_INTERVAL_SECS`
pub const ENV_PREFIX: &str = "COMPLIANCE";

/// Config file looked up in the working directory when none is given
pub const DEFAULT_CONFIG_NAME: &str = "compliance";

/// Main service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Tick and sweep scheduler configuration
    pub clock: ClockConfig,

    /// Evaluation window, grace period and policies
    pub engine: EngineConfig,

    /// Confirmation waits
    pub gateway: GatewayConfig,

    /// Which ledger to talk to
    pub ledger: LedgerSettings,

    /// Service-level configuration
    pub service: ServiceSettings,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Metrics configuration
    pub metrics: MetricsConfig,

    /// Entities loaded into the in-memory store and registered at startup
    pub entities: Vec<EntitySeed>,
}

/// Ledger backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerMode {
    /// JSON-RPC node
    Rpc,
    /// In-process ledger for development
    #[default]
    Simulated,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerSettings {
    pub mode: LedgerMode,
    pub rpc: RpcConfig,
}

/// Service-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty, compact)
    pub format: String,
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Serve Prometheus metrics over HTTP
    pub enabled: bool,

    /// Listen address for the exporter
    pub listen_addr: String,
}

/// Entity record seeded into the store at startup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySeed {
    pub id: u64,
    pub ledger_account: String,
    /// Emission cap per window, in tons
    #[serde(default)]
    pub cap: Option<Decimal>,
    /// Opening balance; only applied to the simulated ledger
    #[serde(default)]
    pub opening_balance: Option<Decimal>,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self { shutdown_timeout_secs: 10 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: "pretty".to_string() }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: false, listen_addr: "0.0.0.0:9090".to_string() }
    }
}

impl ServiceSettings {
    pub fn shutdown_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl MetricsConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.listen_addr
            .parse()
            .with_context(|| format!("Invalid metrics listen address: {}", self.listen_addr))
    }
}

/// Load configuration from an optional TOML file, `.env` and the environment
pub fn load_config(path: Option<&Path>) -> Result<ServiceConfig> {
    dotenv::dotenv().ok();
    let config = build_config(path, ENV_PREFIX)?;
    validate_config(&config)?;
    Ok(config)
}

/// Layer sources: defaults, then the file, then `<prefix>__SECTION__KEY` variables
fn build_config(path: Option<&Path>, env_prefix: &str) -> Result<ServiceConfig> {
    let file = match path {
        Some(path) => {
            tracing::debug!("Loading configuration from file: {:?}", path);
            config::File::from(path).required(true)
        }
        None => config::File::with_name(DEFAULT_CONFIG_NAME).required(false),
    };

    let settings = config::Config::builder()
        .add_source(file)
        .add_source(
            config::Environment::with_prefix(env_prefix)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("Failed to read configuration sources")?;

    settings.try_deserialize().context("Failed to parse configuration")
}

/// Validate configuration
pub fn validate_config(config: &ServiceConfig) -> Result<()> {
    match config.logging.level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        _ => return Err(anyhow!("Invalid log level: {}", config.logging.level)),
    }

    match config.logging.format.as_str() {
        "json" | "pretty" | "compact" => {}
        _ => return Err(anyhow!("Invalid log format: {}", config.logging.format)),
    }

    config.clock.validate().map_err(|e| anyhow!("Invalid clock configuration: {e}"))?;
    config.engine.validate().map_err(|e| anyhow!("Invalid engine configuration: {e}"))?;

    if config.gateway.confirmation_timeout_ms == 0 || config.gateway.confirmation_poll_ms == 0 {
        return Err(anyhow!("Gateway confirmation timeout and poll interval must be positive"));
    }

    if config.ledger.mode == LedgerMode::Rpc && config.ledger.rpc.endpoint.is_empty() {
        return Err(anyhow!("Ledger mode is rpc but no endpoint is configured"));
    }

    if config.metrics.enabled {
        config.metrics.socket_addr()?;
    }

    if config.service.shutdown_timeout_secs == 0 {
        return Err(anyhow!("shutdown_timeout_secs must be positive"));
    }

    let mut seen = HashSet::new();
    for entity in &config.entities {
        if !seen.insert(entity.id) {
            return Err(anyhow!("Duplicate entity id in configuration: {}", entity.id));
        }
        if entity.ledger_account.trim().is_empty() {
            return Err(anyhow!("Entity {} has no ledger account", entity.id));
        }
        if entity.cap.is_some_and(|cap| cap.is_sign_negative()) {
            return Err(anyhow!("Entity {} has a negative cap", entity.id));
        }
    }

    Ok(())
}

/// Save configuration to a TOML file
pub fn save_config(config: &ServiceConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config).context("Failed to serialize configuration")?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write configuration to {:?}", path))
}
