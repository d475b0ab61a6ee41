//! # Compliance Engine
//!
//! Decides, per entity and per window, whether to mint credits, deduct
//! credits or open a BuyTimer, and records every ledger mutation in an
//! append-only audit trail.
//!
//! ## Flow
//!
//! 1. [`ComplianceEvaluator`] sums the trailing window and compares it to the cap
//! 2. [`ComplianceStateMachine`] picks the action and calls the [`LedgerGateway`](ledger_gateway::LedgerGateway)
//! 3. [`AuditRecorder`] writes the outcome and refreshes the cached balance
//! 4. [`ComplianceStateMachine::sweep_timers`] resolves or expires BuyTimers

pub mod audit;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod guard;
pub mod machine;
pub mod outcome;

#[cfg(test)]
mod tests;

pub use audit::{verification_hash, verify, AuditRecorder};
pub use config::{EngineConfig, FlaggedPolicy, NoDataPolicy};
pub use error::{ComplianceError, Result};
pub use evaluator::{evaluate_window, ComplianceEvaluator, ComplianceWindowResult, Evaluation, NoOpReason};
pub use guard::{InFlightGuard, InFlightRegistry};
pub use machine::ComplianceStateMachine;
pub use outcome::{CycleOutcome, SweepReport, TimerOutcome};
