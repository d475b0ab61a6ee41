//! Per-entity in-flight marker

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use emission_store::EntityId;
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Serializes work per entity.
///
/// Each entity has an async lock that cycles and sweep steps hold while they
/// run. A cycle waits for a sweep step to finish, but at most one cycle per
/// entity is pending or running: a second one is refused. Sweep steps never
/// wait and are refused while anything holds the entity.
#[derive(Debug, Default)]
pub struct InFlightRegistry {
    cycles: Mutex<HashSet<EntityId>>,
    locks: Mutex<HashMap<EntityId, Arc<AsyncMutex<()>>>>,
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entity_lock(&self, entity_id: EntityId) -> Arc<AsyncMutex<()>> {
        self.locks.lock().entry(entity_id).or_default().clone()
    }

    /// Hold `entity_id` for a cycle, waiting out any sweep step.
    /// `None` if another cycle for the entity is pending or running.
    pub async fn acquire_cycle(self: &Arc<Self>, entity_id: EntityId) -> Option<InFlightGuard> {
        if !self.cycles.lock().insert(entity_id) {
            return None;
        }
        // Clears the cycle mark even if this future is dropped while waiting
        let cycle = CycleMark { registry: Arc::clone(self), entity_id };
        let lock = self.entity_lock(entity_id).lock_owned().await;
        Some(InFlightGuard { entity_id, _lock: lock, _cycle: Some(cycle) })
    }

    /// Hold `entity_id` for a sweep step, or `None` if it is busy
    pub fn try_acquire_sweep(&self, entity_id: EntityId) -> Option<InFlightGuard> {
        if self.cycles.lock().contains(&entity_id) {
            return None;
        }
        let lock = self.entity_lock(entity_id).try_lock_owned().ok()?;
        Some(InFlightGuard { entity_id, _lock: lock, _cycle: None })
    }

    pub fn is_in_flight(&self, entity_id: EntityId) -> bool {
        if self.cycles.lock().contains(&entity_id) {
            return true;
        }
        self.locks.lock().get(&entity_id).is_some_and(|lock| lock.try_lock().is_err())
    }

    pub fn is_empty(&self) -> bool {
        self.cycles.lock().is_empty()
            && self.locks.lock().values().all(|lock| lock.try_lock().is_ok())
    }
}

#[derive(Debug)]
struct CycleMark {
    registry: Arc<InFlightRegistry>,
    entity_id: EntityId,
}

impl Drop for CycleMark {
    fn drop(&mut self) {
        self.registry.cycles.lock().remove(&self.entity_id);
    }
}

/// Releases the entity when dropped, including on error or panic
#[derive(Debug)]
pub struct InFlightGuard {
    entity_id: EntityId,
    _lock: OwnedMutexGuard<()>,
    _cycle: Option<CycleMark>,
}

impl InFlightGuard {
    pub fn entity_id(&self) -> EntityId {
        self.entity_id
    }
}
