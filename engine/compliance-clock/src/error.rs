//! Error types for ComplianceClock

use compliance_engine::ComplianceError;
use thiserror::Error;

/// Result type alias for clock operations
pub type Result<T> = std::result::Result<T, ClockError>;

/// Errors that can occur in the ComplianceClock
#[derive(Error, Debug)]
pub enum ClockError {
    #[error("Compliance error: {0}")]
    Compliance(#[from] ComplianceError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Scheduler {name} is already running")]
    AlreadyRunning { name: &'static str },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ClockError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
