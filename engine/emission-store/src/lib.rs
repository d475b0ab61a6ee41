//! # Emission Store
//!
//! Records shared between the compliance engine and the collaborators that
//! populate it, plus the [`EmissionStore`] seam the engine reads and writes
//! through.
//!
//! - **Read side**: entities, caps and emission samples written by ingestion
//! - **Write side**: audit records, BuyTimers, cached balances and compliance
//!   status written by the engine
//!
//! [`InMemoryStore`] is the only backend shipped here; durable storage is the
//! deployment's concern.

pub mod error;
pub mod memory;
pub mod store;
pub mod timer;
pub mod types;

pub use error::{Result, StoreError};
pub use memory::InMemoryStore;
pub use store::EmissionStore;
pub use timer::{BuyTimer, TimerId, TimerOpen, TimerStatus};
pub use types::{
    ComplianceStatus, EmissionSample, EntityId, LedgerTransaction, MonitoredEntity,
    TransactionType,
};
