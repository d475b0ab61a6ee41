//! Configuration for the compliance engine

use serde::{Deserialize, Serialize};

/// What to do when no sample falls inside the trailing window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoDataPolicy {
    /// Treat the window as having no data: no ledger call, no audit record
    #[default]
    Skip,
    /// Evaluate the single most recent sample instead
    LatestSample,
}

/// How ticks treat an entity that is FLAGGED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlaggedPolicy {
    /// Skip the entity until an operator clears the flag
    #[default]
    Frozen,
    /// Keep evaluating; a later settled cycle moves it out of FLAGGED
    Reevaluate,
}

/// Configuration for evaluation and the shortfall grace period
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Trailing window emissions are summed over, in seconds
    pub window_secs: u64,

    /// BuyTimer grace period, in seconds
    pub grace_period_secs: u64,

    pub no_data_policy: NoDataPolicy,

    pub flagged_policy: FlaggedPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            window_secs: 300,
            grace_period_secs: 120,
            no_data_policy: NoDataPolicy::Skip,
            flagged_policy: FlaggedPolicy::Frozen,
        }
    }
}

impl EngineConfig {
    /// Get window as chrono Duration
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.window_secs as i64)
    }

    /// Get grace period as chrono Duration
    pub fn grace_period(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.grace_period_secs as i64)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.window_secs == 0 {
            return Err("window_secs must be positive".to_string());
        }
        if self.grace_period_secs == 0 {
            return Err("grace_period_secs must be positive".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_default() {
        let config = EngineConfig::default();
        assert_eq!(config.window(), chrono::Duration::minutes(5));
        assert_eq!(config.grace_period(), chrono::Duration::minutes(2));
        assert_eq!(config.no_data_policy, NoDataPolicy::Skip);
        assert_eq!(config.flagged_policy, FlaggedPolicy::Frozen);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_policies_deserialize_snake_case() {
        let config: EngineConfig = serde_json::from_str(
            r#"{"no_data_policy":"latest_sample","flagged_policy":"reevaluate"}"#,
        )
        .unwrap();
        assert_eq!(config.no_data_policy, NoDataPolicy::LatestSample);
        assert_eq!(config.flagged_policy, FlaggedPolicy::Reevaluate);
        assert_eq!(config.window_secs, 300);
    }

    #[test]
    fn test_zero_window_rejected() {
        let config = EngineConfig { window_secs: 0, ..Default::default() };
        assert!(config.validate().is_err());
    }
}
