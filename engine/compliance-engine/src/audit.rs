//! Append-only audit trail of ledger mutations and flag decisions

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use emission_store::{EmissionStore, EntityId, LedgerTransaction, TransactionType};
use ledger_gateway::{DeductOutcome, MintOutcome};
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};

use crate::error::Result;

/// SHA-256 fingerprint over the fields that identify an audit record.
///
/// Amounts are normalized so `20` and `20.00` hash the same.
pub fn verification_hash(
    entity_id: EntityId,
    kind: TransactionType,
    amount: Decimal,
    ledger_tx_ref: Option<&str>,
    timestamp: DateTime<Utc>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(entity_id.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(kind.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(amount.normalize().to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(ledger_tx_ref.unwrap_or("").as_bytes());
    hasher.update(b"|");
    hasher.update(timestamp.to_rfc3339_opts(SecondsFormat::Micros, true).as_bytes());
    hex::encode(hasher.finalize())
}

/// Recompute a record's fingerprint and compare
pub fn verify(record: &LedgerTransaction) -> bool {
    verification_hash(
        record.entity_id,
        record.kind,
        record.amount,
        record.ledger_tx_ref.as_deref(),
        record.timestamp,
    ) == record.verification_hash
}

struct RecordDraft {
    entity_id: EntityId,
    kind: TransactionType,
    amount: Decimal,
    ledger_tx_ref: Option<String>,
    block_ref: Option<u64>,
    balance_after: Option<Decimal>,
    settled: bool,
    timestamp: DateTime<Utc>,
}

impl RecordDraft {
    fn seal(self) -> LedgerTransaction {
        let verification_hash = verification_hash(
            self.entity_id,
            self.kind,
            self.amount,
            self.ledger_tx_ref.as_deref(),
            self.timestamp,
        );
        LedgerTransaction {
            id: uuid::Uuid::new_v4(),
            entity_id: self.entity_id,
            kind: self.kind,
            amount: self.amount,
            ledger_tx_ref: self.ledger_tx_ref,
            block_ref: self.block_ref,
            balance_after: self.balance_after,
            settled: self.settled,
            verification_hash,
            timestamp: self.timestamp,
        }
    }
}

/// Writes audit records and mirrors the ledger balance into the store cache
pub struct AuditRecorder {
    store: Arc<dyn EmissionStore>,
}

impl AuditRecorder {
    pub fn new(store: Arc<dyn EmissionStore>) -> Self {
        Self { store }
    }

    /// Record a confirmed mint
    pub async fn record_mint(
        &self,
        entity_id: EntityId,
        amount: Decimal,
        outcome: &MintOutcome,
        at: DateTime<Utc>,
    ) -> Result<LedgerTransaction> {
        self.append(RecordDraft {
            entity_id,
            kind: TransactionType::Mint,
            amount,
            ledger_tx_ref: Some(outcome.tx_ref.clone()),
            block_ref: Some(outcome.block_ref),
            balance_after: outcome.balance_after,
            settled: true,
            timestamp: at,
        })
        .await
    }

    /// Record a confirmed deduction, settled or not
    pub async fn record_deduct(
        &self,
        entity_id: EntityId,
        amount: Decimal,
        outcome: &DeductOutcome,
        at: DateTime<Utc>,
    ) -> Result<LedgerTransaction> {
        let block_ref = match outcome {
            DeductOutcome::Settled { block_ref, .. }
            | DeductOutcome::InsufficientBalance { block_ref, .. } => *block_ref,
        };
        self.append(RecordDraft {
            entity_id,
            kind: TransactionType::Deduct,
            amount,
            ledger_tx_ref: Some(outcome.tx_ref().to_string()),
            block_ref: Some(block_ref),
            balance_after: outcome.balance_after(),
            settled: outcome.is_settled(),
            timestamp: at,
        })
        .await
    }

    /// Record an expired shortfall. No ledger transaction backs a flag.
    pub async fn record_flag(
        &self,
        entity_id: EntityId,
        required_amount: Decimal,
        balance: Decimal,
        at: DateTime<Utc>,
    ) -> Result<LedgerTransaction> {
        self.append(RecordDraft {
            entity_id,
            kind: TransactionType::Flag,
            amount: required_amount,
            ledger_tx_ref: None,
            block_ref: None,
            balance_after: Some(balance),
            settled: false,
            timestamp: at,
        })
        .await
    }

    /// Update the cached balance without writing a record
    pub async fn mirror_balance(&self, entity_id: EntityId, balance: Decimal) -> Result<()> {
        self.store.update_cached_balance(entity_id, balance).await?;
        Ok(())
    }

    async fn append(&self, draft: RecordDraft) -> Result<LedgerTransaction> {
        let record = draft.seal();
        self.store.write_audit_record(record.clone()).await?;
        if let Some(balance) = record.balance_after {
            self.store.update_cached_balance(record.entity_id, balance).await?;
        }

        tracing::info!(
            entity_id = %record.entity_id,
            kind = %record.kind,
            amount = %record.amount,
            tx_ref = record.ledger_tx_ref.as_deref().unwrap_or("-"),
            "Audit record written"
        );
        metrics::counter!("audit_records_total", 1, "kind" => record.kind.as_str());
        Ok(record)
    }
}
