//! Core records shared by the compliance engine and its collaborators

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Identifier of a monitored entity (company)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u64);

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Compliance state of an entity as seen by the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComplianceStatus {
    /// Within cap on the last evaluation, or never evaluated
    #[default]
    Compliant,
    /// Over cap and the overage was deducted from the balance
    OverCapSettled,
    /// Over cap without enough balance; a BuyTimer is running
    OverCapShortfall,
    /// Shortfall not remediated before the timer expired
    Flagged,
}

impl ComplianceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComplianceStatus::Compliant => "COMPLIANT",
            ComplianceStatus::OverCapSettled => "OVER_CAP_SETTLED",
            ComplianceStatus::OverCapShortfall => "OVER_CAP_SHORTFALL",
            ComplianceStatus::Flagged => "FLAGGED",
        }
    }
}

impl std::fmt::Display for ComplianceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A company tracked for emission compliance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoredEntity {
    pub id: EntityId,
    /// Account address on the external ledger
    pub ledger_account: String,
    /// Cap per evaluation window, in tons. `None` means not configured yet.
    pub emission_cap_per_window: Option<Decimal>,
    /// Last balance mirrored from the ledger. Stale by up to one tick.
    pub cached_balance: Decimal,
    pub compliance_status: ComplianceStatus,
}

impl MonitoredEntity {
    /// Create a new entity record with no cap and a zero cached balance
    pub fn new(id: EntityId, ledger_account: impl Into<String>) -> Self {
        Self {
            id,
            ledger_account: ledger_account.into(),
            emission_cap_per_window: None,
            cached_balance: Decimal::ZERO,
            compliance_status: ComplianceStatus::Compliant,
        }
    }

    /// Builder-style cap setter
    pub fn with_cap(mut self, cap: Decimal) -> Self {
        self.emission_cap_per_window = Some(cap);
        self
    }
}

/// One emission measurement produced by external ingestion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmissionSample {
    pub entity_id: EntityId,
    /// Emitted amount in tons
    pub value: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl EmissionSample {
    pub fn new(entity_id: EntityId, value: Decimal, timestamp: DateTime<Utc>) -> Self {
        Self { entity_id, value, timestamp }
    }
}

/// Kind of audit record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Mint,
    Deduct,
    Flag,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Mint => "MINT",
            TransactionType::Deduct => "DEDUCT",
            TransactionType::Flag => "FLAG",
        }
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable audit record of a ledger mutation or a flag decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub id: uuid::Uuid,
    pub entity_id: EntityId,
    pub kind: TransactionType,
    /// Credits moved (or required, for FLAG records)
    pub amount: Decimal,
    /// Ledger transaction hash; absent for FLAG records
    pub ledger_tx_ref: Option<String>,
    /// Block the transaction was included in
    pub block_ref: Option<u64>,
    /// Ledger balance after the record; `None` when it could not be read
    pub balance_after: Option<Decimal>,
    /// `false` only for a DEDUCT the ledger rejected for insufficient balance
    pub settled: bool,
    pub verification_hash: String,
    pub timestamp: DateTime<Utc>,
}
