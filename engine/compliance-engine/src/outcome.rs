//! Typed results of cycles and sweeps

use emission_store::{BuyTimer, EntityId, LedgerTransaction};
use ledger_gateway::{DeductOutcome, MintOutcome};
use rust_decimal::Decimal;

use crate::error::ComplianceError;
use crate::evaluator::{ComplianceWindowResult, NoOpReason};

/// What happened to a BuyTimer during a cycle or sweep
#[derive(Debug, Clone, PartialEq)]
pub enum TimerOutcome {
    /// A new timer was opened
    Started(BuyTimer),
    /// A timer was already running; its expiry was left alone
    AlreadyActive(BuyTimer),
    /// Balance now covers the requirement
    Resolved(BuyTimer),
    /// Grace period ran out; the entity was flagged
    Expired { timer: BuyTimer, flag: LedgerTransaction },
    /// Still short, still inside the grace period
    Pending(BuyTimer),
    /// The entity had a cycle in flight; checked again next sweep
    Busy(BuyTimer),
    /// Another caller moved the timer out of ACTIVE first
    Superseded(BuyTimer),
}

impl TimerOutcome {
    pub fn timer(&self) -> &BuyTimer {
        match self {
            TimerOutcome::Started(t)
            | TimerOutcome::AlreadyActive(t)
            | TimerOutcome::Resolved(t)
            | TimerOutcome::Pending(t)
            | TimerOutcome::Busy(t)
            | TimerOutcome::Superseded(t) => t,
            TimerOutcome::Expired { timer, .. } => timer,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TimerOutcome::Started(_) => "started",
            TimerOutcome::AlreadyActive(_) => "already_active",
            TimerOutcome::Resolved(_) => "resolved",
            TimerOutcome::Expired { .. } => "expired",
            TimerOutcome::Pending(_) => "pending",
            TimerOutcome::Busy(_) => "busy",
            TimerOutcome::Superseded(_) => "superseded",
        }
    }
}

/// Result of one entity's cycle
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Evaluation had nothing to act on
    Skipped { entity_id: EntityId, reason: NoOpReason },
    /// A previous cycle for the entity had not finished
    Busy { entity_id: EntityId },
    /// FLAGGED and frozen until cleared
    Frozen { entity_id: EntityId },
    /// Emissions exactly at cap; nothing to mint or deduct
    AtCap { entity_id: EntityId, result: ComplianceWindowResult },
    Minted {
        result: ComplianceWindowResult,
        mint: MintOutcome,
        record: LedgerTransaction,
        resolved_timer: Option<BuyTimer>,
    },
    Deducted {
        result: ComplianceWindowResult,
        deduct: DeductOutcome,
        record: LedgerTransaction,
        resolved_timer: Option<BuyTimer>,
    },
    Shortfall {
        result: ComplianceWindowResult,
        balance: Decimal,
        /// Present when a deduction was attempted and came back uncovered
        deduct_record: Option<LedgerTransaction>,
        timer: TimerOutcome,
    },
}

impl CycleOutcome {
    pub fn entity_id(&self) -> EntityId {
        match self {
            CycleOutcome::Skipped { entity_id, .. }
            | CycleOutcome::Busy { entity_id }
            | CycleOutcome::Frozen { entity_id }
            | CycleOutcome::AtCap { entity_id, .. } => *entity_id,
            CycleOutcome::Minted { result, .. }
            | CycleOutcome::Deducted { result, .. }
            | CycleOutcome::Shortfall { result, .. } => result.entity_id,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            CycleOutcome::Skipped { .. } => "skipped",
            CycleOutcome::Busy { .. } => "busy",
            CycleOutcome::Frozen { .. } => "frozen",
            CycleOutcome::AtCap { .. } => "at_cap",
            CycleOutcome::Minted { .. } => "minted",
            CycleOutcome::Deducted { .. } => "deducted",
            CycleOutcome::Shortfall { .. } => "shortfall",
        }
    }

    /// Audit records this cycle wrote
    pub fn records(&self) -> Vec<&LedgerTransaction> {
        match self {
            CycleOutcome::Minted { record, .. } | CycleOutcome::Deducted { record, .. } => {
                vec![record]
            }
            CycleOutcome::Shortfall { deduct_record, .. } => deduct_record.iter().collect(),
            _ => Vec::new(),
        }
    }
}

/// Results of one sweep over the ACTIVE timers
#[derive(Debug, Default)]
pub struct SweepReport {
    pub outcomes: Vec<TimerOutcome>,
    /// Timers whose check failed; they stay ACTIVE for the next sweep
    pub failures: Vec<(EntityId, ComplianceError)>,
}

impl SweepReport {
    pub fn count(&self, label: &str) -> usize {
        self.outcomes.iter().filter(|o| o.label() == label).count()
    }

    pub fn expired(&self) -> impl Iterator<Item = &TimerOutcome> {
        self.outcomes.iter().filter(|o| matches!(o, TimerOutcome::Expired { .. }))
    }
}
