//! Wire-level ledger client trait and receipt types

use serde::{Deserialize, Serialize};

use crate::amount::CreditAmount;
use crate::error::Result;

/// Transaction hash as returned by the ledger
pub type TxHash = String;

/// Events emitted by the credit contract, decoded from receipts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum LedgerEvent {
    #[serde(rename_all = "camelCase")]
    EntityRegistered { account: String },
    #[serde(rename_all = "camelCase")]
    CreditsMinted { account: String, amount: CreditAmount },
    #[serde(rename_all = "camelCase")]
    CreditsDeducted {
        account: String,
        amount: CreditAmount,
        success: bool,
        has_sufficient_balance: bool,
    },
}

/// Receipt of a mined transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    pub tx_hash: TxHash,
    pub block_number: u64,
    /// Blocks on top of (and including) the inclusion block
    pub confirmations: u64,
    /// `false` when execution reverted
    pub status: bool,
    #[serde(default)]
    pub events: Vec<LedgerEvent>,
}

impl TransactionReceipt {
    /// Deduction result carried by this receipt, as `(success, has_sufficient_balance)`
    pub fn deduction_result(&self) -> Option<(bool, bool)> {
        self.events.iter().find_map(|event| match event {
            LedgerEvent::CreditsDeducted { success, has_sufficient_balance, .. } => {
                Some((*success, *has_sufficient_balance))
            }
            _ => None,
        })
    }
}

/// Abstract trait for the external ledger, amounts in 18-decimal base units.
///
/// Mutating calls return as soon as the transaction is submitted; callers
/// poll [`LedgerClient::transaction_receipt`] for confirmation.
#[async_trait::async_trait]
pub trait LedgerClient: Send + Sync {
    /// Register an account. Fails with `AlreadyRegistered` on repeats.
    async fn register_entity(&self, account: &str) -> Result<TxHash>;

    /// Mint credits to an account
    async fn mint(
        &self,
        account: &str,
        amount: CreditAmount,
        emission_value: CreditAmount,
        emission_cap: CreditAmount,
    ) -> Result<TxHash>;

    /// Deduct credits from an account. Insufficient balance is reported in
    /// the receipt's `CreditsDeducted` event, not as an error.
    async fn deduct(
        &self,
        account: &str,
        amount: CreditAmount,
        emission_value: CreditAmount,
        emission_cap: CreditAmount,
    ) -> Result<TxHash>;

    /// Receipt for a submitted transaction, `None` while still pending
    async fn transaction_receipt(&self, tx_hash: &str) -> Result<Option<TransactionReceipt>>;

    /// Current balance of an account
    async fn balance_of(&self, account: &str) -> Result<CreditAmount>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receipt_decodes_deduction_event() {
        let json = r#"{
            "txHash": "0x01",
            "blockNumber": 12,
            "confirmations": 1,
            "status": true,
            "events": [{
                "event": "creditsDeducted",
                "account": "0xabc",
                "amount": "20000000000000000000",
                "success": false,
                "hasSufficientBalance": false
            }]
        }"#;

        let receipt: TransactionReceipt = serde_json::from_str(json).unwrap();
        assert_eq!(receipt.block_number, 12);
        assert_eq!(receipt.deduction_result(), Some((false, false)));
    }

    #[test]
    fn test_receipt_without_events() {
        let json = r#"{"txHash":"0x02","blockNumber":3,"confirmations":0,"status":true}"#;
        let receipt: TransactionReceipt = serde_json::from_str(json).unwrap();
        assert!(receipt.events.is_empty());
        assert_eq!(receipt.deduction_result(), None);
    }
}
