//! ComplianceMonitor: the registry plus the tick and sweep schedulers

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use compliance_engine::{ComplianceError, ComplianceStateMachine, CycleOutcome, SweepReport};
use emission_store::{ComplianceStatus, EntityId};
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::config::ClockConfig;
use crate::error::{ClockError, Result};
use crate::metrics::{ClockMetrics, MetricsCollector};
use crate::scheduler::{ClockScheduler, TickHandler};

/// Operational snapshot of the monitor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorStatus {
    pub running: bool,
    pub monitored_count: usize,
    pub next_tick_at: Option<DateTime<Utc>>,
    pub next_sweep_at: Option<DateTime<Utc>>,
}

/// Everything one tick did, in entity order
#[derive(Debug)]
pub struct TickReport {
    pub tick_at: DateTime<Utc>,
    pub outcomes: Vec<CycleOutcome>,
    pub failures: Vec<(EntityId, ComplianceError)>,
    pub duration: Duration,
}

impl TickReport {
    pub fn outcome_for(&self, entity_id: EntityId) -> Option<&CycleOutcome> {
        self.outcomes.iter().find(|o| o.entity_id() == entity_id)
    }

    pub fn busy_count(&self) -> usize {
        self.outcomes.iter().filter(|o| matches!(o, CycleOutcome::Busy { .. })).count()
    }
}

/// Registry and per-pass logic shared with the scheduler tasks
struct MonitorCore {
    machine: Arc<ComplianceStateMachine>,
    registry: RwLock<BTreeSet<EntityId>>,
    metrics_collector: MetricsCollector,
    max_concurrent_entities: usize,
}

impl MonitorCore {
    async fn run_tick(&self, tick_at: DateTime<Utc>) -> TickReport {
        let started = Instant::now();
        // Registrations after this point wait for the next tick
        let entities: Vec<EntityId> = self.registry.read().iter().copied().collect();

        tracing::debug!(tick_at = %tick_at, entities = entities.len(), "Compliance tick");
        metrics::counter!("compliance_ticks_total", 1);

        let machine = self.machine.clone();
        let mut results: Vec<(EntityId, std::result::Result<CycleOutcome, ComplianceError>)> =
            stream::iter(entities)
                .map(move |entity_id| {
                    let machine = machine.clone();
                    async move { (entity_id, machine.run_cycle(entity_id, tick_at).await) }
                })
                .buffer_unordered(self.max_concurrent_entities)
                .collect()
                .await;
        results.sort_by_key(|(entity_id, _)| *entity_id);

        let mut report =
            TickReport { tick_at, outcomes: Vec::new(), failures: Vec::new(), duration: Duration::ZERO };
        for (entity_id, result) in results {
            match result {
                Ok(outcome) => {
                    if let CycleOutcome::Busy { .. } = outcome {
                        tracing::warn!(entity_id = %entity_id, tick_at = %tick_at, "Previous cycle still running; skipping entity this tick");
                    }
                    metrics::counter!("compliance_cycles_total", 1, "outcome" => outcome.label());
                    report.outcomes.push(outcome);
                }
                Err(e) => {
                    if e.is_transient() {
                        tracing::warn!(entity_id = %entity_id, error = %e, "Cycle aborted; retrying next tick");
                    } else {
                        tracing::error!(entity_id = %entity_id, error = %e, "Cycle failed");
                    }
                    metrics::counter!("compliance_cycle_failures_total", 1, "kind" => e.kind());
                    report.failures.push((entity_id, e));
                }
            }
        }

        report.duration = started.elapsed();
        self.metrics_collector.record_tick(
            report.duration,
            report.outcomes.len() as u64,
            report.failures.len() as u64,
            report.busy_count() as u64,
        );
        metrics::histogram!("compliance_tick_duration_seconds", report.duration.as_secs_f64());

        tracing::info!(
            tick_at = %tick_at,
            evaluated = report.outcomes.len(),
            failed = report.failures.len(),
            elapsed_ms = report.duration.as_millis() as u64,
            "Compliance tick complete"
        );
        report
    }

    async fn run_sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let report = self.machine.sweep_timers(now).await?;

        let resolved = report.count("resolved") as u64;
        let expired = report.count("expired") as u64;
        self.metrics_collector.record_sweep(resolved, expired);
        metrics::counter!("buy_timer_sweeps_total", 1);

        if !report.outcomes.is_empty() || !report.failures.is_empty() {
            tracing::debug!(
                now = %now,
                checked = report.outcomes.len(),
                resolved,
                expired,
                failed = report.failures.len(),
                "Buy timer sweep complete"
            );
        }
        Ok(report)
    }
}

/// Owns the registry of monitored entities and the two schedulers.
///
/// Store, ledger and clock are injected, so independent monitors can run
/// side by side.
pub struct ComplianceMonitor {
    core: Arc<MonitorCore>,
    clock: Arc<dyn Clock>,
    config: ClockConfig,
    tick_scheduler: ClockScheduler,
    sweep_scheduler: ClockScheduler,
}

impl ComplianceMonitor {
    /// Create a new monitor over a state machine
    pub fn new(
        machine: Arc<ComplianceStateMachine>,
        clock: Arc<dyn Clock>,
        config: ClockConfig,
    ) -> Result<Self> {
        config.validate().map_err(ClockError::Config)?;

        let tick_scheduler = ClockScheduler::new("tick", config.tick_interval(), clock.clone())?;
        let sweep_scheduler = ClockScheduler::new("sweep", config.sweep_interval(), clock.clone())?;

        tracing::info!(
            tick_interval_secs = config.tick_interval_secs,
            sweep_interval_secs = config.sweep_interval_secs,
            "Creating ComplianceMonitor"
        );

        Ok(Self {
            core: Arc::new(MonitorCore {
                machine,
                registry: RwLock::new(BTreeSet::new()),
                metrics_collector: MetricsCollector::new(config.metrics_history),
                max_concurrent_entities: config.max_concurrent_entities,
            }),
            clock,
            config,
            tick_scheduler,
            sweep_scheduler,
        })
    }

    pub fn config(&self) -> &ClockConfig {
        &self.config
    }

    /// Register an entity for monitoring.
    ///
    /// Registers its account on the ledger; both steps are idempotent.
    /// Returns whether the entity was newly added to the registry.
    pub async fn register_entity(&self, entity_id: EntityId) -> Result<bool> {
        self.core.machine.register_entity(entity_id).await?;

        if self.core.registry.read().contains(&entity_id) {
            return Ok(false);
        }

        self.core
            .machine
            .store()
            .update_compliance_status(entity_id, ComplianceStatus::Compliant)
            .await
            .map_err(ComplianceError::from)?;

        let count = {
            let mut registry = self.core.registry.write();
            if !registry.insert(entity_id) {
                return Ok(false);
            }
            registry.len()
        };
        self.core.metrics_collector.update_monitored_entities(count);

        tracing::info!(entity_id = %entity_id, monitored = count, "Registered entity with ComplianceMonitor");
        Ok(true)
    }

    /// Stop monitoring an entity. Its records and timers stay in the store.
    pub fn deregister_entity(&self, entity_id: EntityId) -> bool {
        let (removed, count) = {
            let mut registry = self.core.registry.write();
            (registry.remove(&entity_id), registry.len())
        };

        if removed {
            self.core.metrics_collector.update_monitored_entities(count);
            tracing::info!(entity_id = %entity_id, monitored = count, "Deregistered entity from ComplianceMonitor");
        }
        removed
    }

    pub fn is_registered(&self, entity_id: EntityId) -> bool {
        self.core.registry.read().contains(&entity_id)
    }

    /// Registered entities in id order
    pub fn monitored_entities(&self) -> Vec<EntityId> {
        self.core.registry.read().iter().copied().collect()
    }

    /// Start the tick and sweep schedulers
    pub fn start(&self) -> Result<()> {
        let core = self.core.clone();
        let tick: TickHandler = Arc::new(move |tick_at: DateTime<Utc>| {
            let core = core.clone();
            async move {
                core.run_tick(tick_at).await;
                Ok::<(), ClockError>(())
            }
            .boxed()
        });

        let core = self.core.clone();
        let sweep: TickHandler = Arc::new(move |now: DateTime<Utc>| {
            let core = core.clone();
            async move { core.run_sweep(now).await.map(|_| ()) }.boxed()
        });

        self.tick_scheduler.start(tick)?;
        if let Err(e) = self.sweep_scheduler.start(sweep) {
            self.tick_scheduler.stop();
            return Err(e);
        }

        tracing::info!(monitored = self.core.registry.read().len(), "ComplianceMonitor started");
        Ok(())
    }

    /// Stop both schedulers; in-flight cycles run to completion
    pub fn stop(&self) {
        let tick = self.tick_scheduler.stop();
        let sweep = self.sweep_scheduler.stop();
        if tick || sweep {
            tracing::info!("ComplianceMonitor stopped");
        }
    }

    /// Wait for fired ticks and sweeps to finish. Returns false on timeout.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let started = Instant::now();
        let ticks_done = self.tick_scheduler.wait_idle(timeout).await;
        let remaining = timeout.saturating_sub(started.elapsed());
        let sweeps_done = self.sweep_scheduler.wait_idle(remaining).await;
        ticks_done && sweeps_done
    }

    pub fn status(&self) -> MonitorStatus {
        let tick = self.tick_scheduler.status();
        let sweep = self.sweep_scheduler.status();
        MonitorStatus {
            running: tick.running,
            monitored_count: self.core.registry.read().len(),
            next_tick_at: tick.next_tick_at,
            next_sweep_at: sweep.next_tick_at,
        }
    }

    /// Run one tick at `tick_at` on the caller's task
    pub async fn run_tick(&self, tick_at: DateTime<Utc>) -> TickReport {
        self.core.run_tick(tick_at).await
    }

    /// Run one sweep at `now` on the caller's task
    pub async fn run_sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        self.core.run_sweep(now).await
    }

    /// Run one tick at the clock's current time
    pub async fn tick_now(&self) -> TickReport {
        self.run_tick(self.clock.now()).await
    }

    /// Release a frozen FLAGGED entity. Returns whether it was flagged.
    pub async fn clear_flag(&self, entity_id: EntityId) -> Result<bool> {
        let cleared = self.core.machine.clear_flag(entity_id).await?;
        if cleared {
            tracing::info!(entity_id = %entity_id, "Flag cleared by operator");
        }
        Ok(cleared)
    }

    /// Get current metrics
    pub fn get_metrics(&self) -> ClockMetrics {
        self.core.metrics_collector.get_metrics()
    }
}
