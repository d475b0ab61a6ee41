//! Error types for the compliance engine

use emission_store::{EntityId, StoreError};
use ledger_gateway::LedgerError;
use thiserror::Error;

/// Result type alias for compliance operations
pub type Result<T> = std::result::Result<T, ComplianceError>;

/// Errors that abort a single entity's cycle
#[derive(Error, Debug)]
pub enum ComplianceError {
    /// RPC, network or confirmation-timeout failure; the next tick retries naturally
    #[error("Transient ledger error: {0}")]
    TransientLedger(LedgerError),

    /// The ledger refused the operation
    #[error("Ledger error: {0}")]
    Ledger(LedgerError),

    /// Required data is absent from the store
    #[error("Missing configuration for entity {entity_id}: {what}")]
    MissingConfiguration { entity_id: EntityId, what: &'static str },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl From<LedgerError> for ComplianceError {
    fn from(err: LedgerError) -> Self {
        if err.is_transient() {
            ComplianceError::TransientLedger(err)
        } else {
            ComplianceError::Ledger(err)
        }
    }
}

impl ComplianceError {
    pub fn missing_entity(entity_id: EntityId) -> Self {
        Self::MissingConfiguration { entity_id, what: "entity record" }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ComplianceError::TransientLedger(_))
    }

    /// Short label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            ComplianceError::TransientLedger(_) => "transient_ledger",
            ComplianceError::Ledger(_) => "ledger",
            ComplianceError::MissingConfiguration { .. } => "missing_configuration",
            ComplianceError::Store(_) => "store",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_ledger_errors_split_by_transience() {
        let timeout: ComplianceError = LedgerError::ConfirmationTimeout {
            tx_ref: "0x01".into(),
            waited: Duration::from_secs(60),
        }
        .into();
        assert!(timeout.is_transient());
        assert_eq!(timeout.kind(), "transient_ledger");

        let reverted: ComplianceError = LedgerError::Reverted { tx_ref: "0x01".into() }.into();
        assert!(!reverted.is_transient());
        assert_eq!(reverted.kind(), "ledger");
    }
}
