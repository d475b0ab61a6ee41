//! Configuration for ComplianceClock

use crate::{
    DEFAULT_MAX_CONCURRENT_ENTITIES, DEFAULT_METRICS_HISTORY, DEFAULT_SWEEP_INTERVAL_SECS,
    DEFAULT_TICK_INTERVAL_SECS,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the tick and sweep schedulers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    /// Compliance tick interval in seconds (default: 300)
    pub tick_interval_secs: u64,

    /// BuyTimer sweep interval in seconds (default: 5)
    pub sweep_interval_secs: u64,

    /// Maximum number of entities evaluated concurrently within a tick
    pub max_concurrent_entities: usize,

    /// Number of tick durations kept for statistics
    pub metrics_history: usize,

    /// How long shutdown waits for in-flight ticks, in milliseconds
    pub shutdown_timeout_ms: u64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: DEFAULT_TICK_INTERVAL_SECS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            max_concurrent_entities: DEFAULT_MAX_CONCURRENT_ENTITIES,
            metrics_history: DEFAULT_METRICS_HISTORY,
            shutdown_timeout_ms: 30_000,
        }
    }
}

impl ClockConfig {
    /// Get tick interval as Duration
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    /// Get sweep interval as Duration
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.tick_interval_secs == 0 {
            return Err("tick_interval_secs must be positive".to_string());
        }
        if self.sweep_interval_secs == 0 {
            return Err("sweep_interval_secs must be positive".to_string());
        }
        if self.max_concurrent_entities == 0 {
            return Err("max_concurrent_entities must be positive".to_string());
        }
        if self.metrics_history == 0 {
            return Err("metrics_history must be positive".to_string());
        }
        Ok(())
    }

    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: ClockConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file(&self, path: &str) -> Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
