//! Error types for the ledger gateway

use std::time::Duration;

use thiserror::Error;

/// Result type alias for ledger operations
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Errors returned by ledger clients and the gateway
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    /// Network or HTTP failure reaching the ledger endpoint
    #[error("Ledger transport error: {0}")]
    Transport(String),

    /// Server-side RPC failure not attributable to the request
    #[error("Ledger RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// The submitted mutation did not reach the required confirmations in time
    #[error("Transaction {tx_ref} not confirmed within {waited:?}")]
    ConfirmationTimeout { tx_ref: String, waited: Duration },

    /// The account is already registered on the ledger
    #[error("Account {account} is already registered")]
    AlreadyRegistered { account: String },

    /// The ledger refused the request
    #[error("Ledger rejected request ({code}): {message}")]
    Rejected { code: i64, message: String },

    /// The transaction was mined but reverted
    #[error("Transaction {tx_ref} reverted")]
    Reverted { tx_ref: String },

    /// Amount cannot be represented in the ledger's fixed-point format
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Response did not have the expected shape
    #[error("Invalid ledger response: {0}")]
    InvalidResponse(String),
}

impl LedgerError {
    /// Create a new transport error
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }

    /// Create a new invalid response error
    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    /// Transient failures are left to the next tick, which re-reads all state
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LedgerError::Transport(_)
                | LedgerError::Rpc { .. }
                | LedgerError::ConfirmationTimeout { .. }
        )
    }
}
