//! In-memory store backend (for tests and the simulated service mode)

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;

use crate::error::{Result, StoreError};
use crate::store::EmissionStore;
use crate::timer::{BuyTimer, TimerId, TimerOpen, TimerStatus};
use crate::types::{ComplianceStatus, EmissionSample, EntityId, LedgerTransaction, MonitoredEntity};

#[derive(Debug, Default)]
struct Tables {
    entities: HashMap<EntityId, MonitoredEntity>,
    samples: HashMap<EntityId, Vec<EmissionSample>>,
    audit: Vec<LedgerTransaction>,
    timers: HashMap<TimerId, BuyTimer>,
}

/// In-memory store. All tables sit behind one lock so timer operations are
/// atomic with respect to each other.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    /// Create a new, empty in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an entity record (collaborator-side write)
    pub fn upsert_entity(&self, entity: MonitoredEntity) {
        self.tables.write().entities.insert(entity.id, entity);
    }

    /// Set or clear the cap for an existing entity (collaborator-side write)
    pub fn set_cap(&self, entity_id: EntityId, cap: Option<Decimal>) -> Result<()> {
        let mut tables = self.tables.write();
        let entity =
            tables.entities.get_mut(&entity_id).ok_or(StoreError::EntityNotFound { entity_id })?;
        entity.emission_cap_per_window = cap;
        Ok(())
    }

    /// Record an emission sample (collaborator-side write)
    pub fn push_sample(&self, sample: EmissionSample) {
        let mut tables = self.tables.write();
        let samples = tables.samples.entry(sample.entity_id).or_default();
        let position = samples.partition_point(|s| s.timestamp <= sample.timestamp);
        samples.insert(position, sample);
    }

    /// Snapshot of an entity record
    pub fn entity(&self, entity_id: EntityId) -> Option<MonitoredEntity> {
        self.tables.read().entities.get(&entity_id).cloned()
    }

    /// Every timer ever opened for an entity, oldest first
    pub fn timers_for(&self, entity_id: EntityId) -> Vec<BuyTimer> {
        let tables = self.tables.read();
        let mut timers: Vec<_> =
            tables.timers.values().filter(|t| t.entity_id == entity_id).cloned().collect();
        timers.sort_by_key(|t| t.started_at);
        timers
    }

    /// Total number of audit records across all entities
    pub fn audit_len(&self) -> usize {
        self.tables.read().audit.len()
    }
}

#[async_trait::async_trait]
impl EmissionStore for InMemoryStore {
    async fn read_emission_samples(
        &self,
        entity_id: EntityId,
        window_start: DateTime<Utc>,
    ) -> Result<Vec<EmissionSample>> {
        let tables = self.tables.read();
        Ok(tables
            .samples
            .get(&entity_id)
            .map(|samples| {
                samples.iter().filter(|s| s.timestamp >= window_start).cloned().collect()
            })
            .unwrap_or_default())
    }

    async fn read_latest_sample(&self, entity_id: EntityId) -> Result<Option<EmissionSample>> {
        let tables = self.tables.read();
        Ok(tables.samples.get(&entity_id).and_then(|samples| samples.last().cloned()))
    }

    async fn read_cap(&self, entity_id: EntityId) -> Result<Option<Decimal>> {
        let tables = self.tables.read();
        Ok(tables.entities.get(&entity_id).and_then(|e| e.emission_cap_per_window))
    }

    async fn read_entity(&self, entity_id: EntityId) -> Result<Option<MonitoredEntity>> {
        Ok(self.entity(entity_id))
    }

    async fn write_audit_record(&self, record: LedgerTransaction) -> Result<()> {
        self.tables.write().audit.push(record);
        Ok(())
    }

    async fn audit_records(&self, entity_id: EntityId) -> Result<Vec<LedgerTransaction>> {
        let tables = self.tables.read();
        Ok(tables.audit.iter().filter(|r| r.entity_id == entity_id).cloned().collect())
    }

    async fn write_or_update_timer(&self, timer: BuyTimer) -> Result<()> {
        let mut tables = self.tables.write();
        if timer.is_active() {
            let clash = tables
                .timers
                .values()
                .any(|t| t.entity_id == timer.entity_id && t.is_active() && t.id != timer.id);
            if clash {
                return Err(StoreError::ActiveTimerExists { entity_id: timer.entity_id });
            }
        }
        tables.timers.insert(timer.id, timer);
        Ok(())
    }

    async fn open_timer(&self, timer: BuyTimer) -> Result<TimerOpen> {
        let mut tables = self.tables.write();
        if let Some(existing) =
            tables.timers.values().find(|t| t.entity_id == timer.entity_id && t.is_active())
        {
            return Ok(TimerOpen::Existing(existing.clone()));
        }
        tables.timers.insert(timer.id, timer.clone());
        Ok(TimerOpen::Created(timer))
    }

    async fn transition_timer(
        &self,
        timer_id: TimerId,
        from: TimerStatus,
        to: TimerStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<BuyTimer>> {
        let mut tables = self.tables.write();
        let timer = tables.timers.get_mut(&timer_id).ok_or(StoreError::TimerNotFound { timer_id })?;
        if timer.status != from {
            return Ok(None);
        }
        timer.close(to, at);
        Ok(Some(timer.clone()))
    }

    async fn active_timer(&self, entity_id: EntityId) -> Result<Option<BuyTimer>> {
        let tables = self.tables.read();
        Ok(tables.timers.values().find(|t| t.entity_id == entity_id && t.is_active()).cloned())
    }

    async fn active_timers(&self) -> Result<Vec<BuyTimer>> {
        let tables = self.tables.read();
        let mut timers: Vec<_> = tables.timers.values().filter(|t| t.is_active()).cloned().collect();
        timers.sort_by_key(|t| (t.expires_at, t.entity_id));
        Ok(timers)
    }

    async fn update_cached_balance(&self, entity_id: EntityId, balance: Decimal) -> Result<()> {
        let mut tables = self.tables.write();
        let entity =
            tables.entities.get_mut(&entity_id).ok_or(StoreError::EntityNotFound { entity_id })?;
        entity.cached_balance = balance;
        Ok(())
    }

    async fn update_compliance_status(
        &self,
        entity_id: EntityId,
        status: ComplianceStatus,
    ) -> Result<()> {
        let mut tables = self.tables.write();
        let entity =
            tables.entities.get_mut(&entity_id).ok_or(StoreError::EntityNotFound { entity_id })?;
        entity.compliance_status = status;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn store_with_entity() -> InMemoryStore {
        let store = InMemoryStore::new();
        store.upsert_entity(MonitoredEntity::new(EntityId(1), "0xabc").with_cap(Decimal::from(100)));
        store
    }

    #[tokio::test]
    async fn test_samples_filtered_by_window_start_and_ordered() {
        let store = store_with_entity();
        store.push_sample(EmissionSample::new(EntityId(1), Decimal::from(5), t0()));
        store.push_sample(EmissionSample::new(
            EntityId(1),
            Decimal::from(7),
            t0() - Duration::minutes(10),
        ));
        store.push_sample(EmissionSample::new(
            EntityId(1),
            Decimal::from(3),
            t0() - Duration::minutes(1),
        ));

        let samples =
            store.read_emission_samples(EntityId(1), t0() - Duration::minutes(5)).await.unwrap();
        let values: Vec<_> = samples.iter().map(|s| s.value).collect();
        assert_eq!(values, vec![Decimal::from(3), Decimal::from(5)]);

        let latest = store.read_latest_sample(EntityId(1)).await.unwrap().unwrap();
        assert_eq!(latest.value, Decimal::from(5));
    }

    #[tokio::test]
    async fn test_open_timer_keeps_existing_active_timer() {
        let store = store_with_entity();
        let first = BuyTimer::new(EntityId(1), Decimal::from(20), t0(), Duration::minutes(2));
        let second = BuyTimer::new(
            EntityId(1),
            Decimal::from(30),
            t0() + Duration::minutes(1),
            Duration::minutes(2),
        );

        assert!(matches!(store.open_timer(first.clone()).await.unwrap(), TimerOpen::Created(_)));
        match store.open_timer(second).await.unwrap() {
            TimerOpen::Existing(existing) => assert_eq!(existing, first),
            other => panic!("Expected existing timer, got {other:?}"),
        }
        assert_eq!(store.active_timers().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_transition_timer_wins_once() {
        let store = store_with_entity();
        let timer = BuyTimer::new(EntityId(1), Decimal::from(20), t0(), Duration::minutes(2));
        store.open_timer(timer.clone()).await.unwrap();

        let at = t0() + Duration::minutes(3);
        let won = store
            .transition_timer(timer.id, TimerStatus::Active, TimerStatus::Expired, at)
            .await
            .unwrap();
        let lost = store
            .transition_timer(timer.id, TimerStatus::Active, TimerStatus::Expired, at)
            .await
            .unwrap();

        assert_eq!(won.unwrap().closed_at, Some(at));
        assert!(lost.is_none());
        assert!(store.active_timer(EntityId(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_write_timer_rejects_second_active() {
        let store = store_with_entity();
        let first = BuyTimer::new(EntityId(1), Decimal::from(20), t0(), Duration::minutes(2));
        let second = BuyTimer::new(EntityId(1), Decimal::from(20), t0(), Duration::minutes(2));

        store.write_or_update_timer(first).await.unwrap();
        let err = store.write_or_update_timer(second).await.unwrap_err();
        assert!(matches!(err, StoreError::ActiveTimerExists { entity_id: EntityId(1) }));
    }

    #[tokio::test]
    async fn test_cache_update_requires_entity() {
        let store = store_with_entity();
        store.update_cached_balance(EntityId(1), Decimal::from(42)).await.unwrap();
        assert_eq!(store.entity(EntityId(1)).unwrap().cached_balance, Decimal::from(42));

        let err = store.update_cached_balance(EntityId(9), Decimal::ONE).await.unwrap_err();
        assert!(matches!(err, StoreError::EntityNotFound { .. }));
    }
}
