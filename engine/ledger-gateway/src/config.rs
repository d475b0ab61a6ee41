//! Configuration for the ledger gateway

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Gateway-level settings: how long and how often to wait for confirmations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Upper bound on waiting for a mutation to confirm
    pub confirmation_timeout_ms: u64,

    /// Receipt polling interval
    pub confirmation_poll_ms: u64,

    /// Confirmations required before a mutation counts as applied
    pub required_confirmations: u64,
}

/// JSON-RPC endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    pub endpoint: String,

    /// Per-request HTTP timeout
    pub request_timeout_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self { confirmation_timeout_ms: 60_000, confirmation_poll_ms: 500, required_confirmations: 1 }
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self { endpoint: "http://127.0.0.1:8545".to_string(), request_timeout_ms: 10_000 }
    }
}

impl GatewayConfig {
    /// Get confirmation timeout as Duration
    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_millis(self.confirmation_timeout_ms)
    }

    /// Get confirmation poll interval as Duration
    pub fn confirmation_poll(&self) -> Duration {
        Duration::from_millis(self.confirmation_poll_ms)
    }
}

impl RpcConfig {
    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_config_default() {
        let config = GatewayConfig::default();
        assert_eq!(config.confirmation_timeout(), Duration::from_secs(60));
        assert_eq!(config.confirmation_poll(), Duration::from_millis(500));
        assert_eq!(config.required_confirmations, 1);
    }
}
