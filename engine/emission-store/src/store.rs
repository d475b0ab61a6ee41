//! Store trait consumed by the compliance engine

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::error::Result;
use crate::timer::{BuyTimer, TimerId, TimerOpen, TimerStatus};
use crate::types::{ComplianceStatus, EmissionSample, EntityId, LedgerTransaction, MonitoredEntity};

/// Abstract trait for the data store shared with external collaborators.
///
/// Collaborators populate entities, caps and samples; the engine writes audit
/// records, timers, cached balances and compliance status. Implementations
/// must make `open_timer` and `transition_timer` atomic per entity.
#[async_trait::async_trait]
pub trait EmissionStore: Send + Sync {
    /// Samples for an entity with `timestamp >= window_start`, oldest first
    async fn read_emission_samples(
        &self,
        entity_id: EntityId,
        window_start: DateTime<Utc>,
    ) -> Result<Vec<EmissionSample>>;

    /// Most recent sample for an entity regardless of age
    async fn read_latest_sample(&self, entity_id: EntityId) -> Result<Option<EmissionSample>>;

    /// Emission cap per window, `None` when not configured
    async fn read_cap(&self, entity_id: EntityId) -> Result<Option<Decimal>>;

    /// Entity record, `None` when the entity is unknown to the store
    async fn read_entity(&self, entity_id: EntityId) -> Result<Option<MonitoredEntity>>;

    /// Append an audit record. The engine never updates or deletes them.
    async fn write_audit_record(&self, record: LedgerTransaction) -> Result<()>;

    /// Audit trail for an entity in insertion order
    async fn audit_records(&self, entity_id: EntityId) -> Result<Vec<LedgerTransaction>>;

    /// Insert or replace a timer by id
    async fn write_or_update_timer(&self, timer: BuyTimer) -> Result<()>;

    /// Create `timer` unless the entity already has an ACTIVE one
    async fn open_timer(&self, timer: BuyTimer) -> Result<TimerOpen>;

    /// Move a timer from `from` to `to` if it is still in `from`.
    ///
    /// Returns the updated timer when this call won the transition and
    /// `None` when the timer had already left `from`.
    async fn transition_timer(
        &self,
        timer_id: TimerId,
        from: TimerStatus,
        to: TimerStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<BuyTimer>>;

    /// The ACTIVE timer for an entity, if any
    async fn active_timer(&self, entity_id: EntityId) -> Result<Option<BuyTimer>>;

    /// Every ACTIVE timer across entities
    async fn active_timers(&self) -> Result<Vec<BuyTimer>>;

    /// Mirror a ledger balance into the entity's read cache
    async fn update_cached_balance(&self, entity_id: EntityId, balance: Decimal) -> Result<()>;

    async fn update_compliance_status(
        &self,
        entity_id: EntityId,
        status: ComplianceStatus,
    ) -> Result<()>;
}
