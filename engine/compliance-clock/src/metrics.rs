//! Metrics collection for ComplianceClock

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Metrics collected by the ComplianceMonitor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClockMetrics {
    /// Entities currently in the registry
    pub monitored_entities: u64,

    /// Entities evaluated in the last tick
    pub entities_processed: u64,

    /// Entity cycles that failed in the last tick
    pub entity_failures: u64,

    /// Duration of the last tick in nanoseconds
    pub tick_duration_ns: u64,

    /// Average tick duration in nanoseconds
    pub avg_tick_duration_ns: u64,

    /// Maximum tick duration in nanoseconds
    pub max_tick_duration_ns: u64,

    /// 95th percentile tick duration in nanoseconds
    pub p95_tick_duration_ns: u64,

    /// Uptime in seconds
    pub uptime_seconds: u64,

    pub total_ticks: u64,

    pub total_entity_failures: u64,

    /// Cycles skipped because the entity's previous cycle was still running
    pub total_busy_skips: u64,

    pub total_sweeps: u64,

    pub timers_resolved: u64,

    pub timers_expired: u64,
}

/// Metrics collector for the ComplianceMonitor
pub struct MetricsCollector {
    // Tick metrics
    tick_durations: Vec<AtomicU64>,
    last_tick_duration: AtomicU64,
    max_tick_duration: AtomicU64,
    total_ticks: AtomicU64,

    // Entity metrics
    monitored_entities: AtomicU64,
    entities_processed: AtomicU64,
    entity_failures: AtomicU64,
    total_entity_failures: AtomicU64,
    total_busy_skips: AtomicU64,

    // Sweep metrics
    total_sweeps: AtomicU64,
    timers_resolved: AtomicU64,
    timers_expired: AtomicU64,

    start_time: Instant,
}

impl MetricsCollector {
    /// Create a new metrics collector keeping `history_size` tick durations
    pub fn new(history_size: usize) -> Self {
        Self {
            tick_durations: (0..history_size.max(1)).map(|_| AtomicU64::new(0)).collect(),
            last_tick_duration: AtomicU64::new(0),
            max_tick_duration: AtomicU64::new(0),
            total_ticks: AtomicU64::new(0),
            monitored_entities: AtomicU64::new(0),
            entities_processed: AtomicU64::new(0),
            entity_failures: AtomicU64::new(0),
            total_entity_failures: AtomicU64::new(0),
            total_busy_skips: AtomicU64::new(0),
            total_sweeps: AtomicU64::new(0),
            timers_resolved: AtomicU64::new(0),
            timers_expired: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a completed tick
    pub fn record_tick(&self, duration: Duration, processed: u64, failures: u64, busy: u64) {
        let duration_ns = duration.as_nanos() as u64;
        let tick = self.total_ticks.fetch_add(1, Ordering::Relaxed);
        let index = (tick as usize) % self.tick_durations.len();

        self.tick_durations[index].store(duration_ns, Ordering::Relaxed);
        self.last_tick_duration.store(duration_ns, Ordering::Relaxed);
        self.entities_processed.store(processed, Ordering::Relaxed);
        self.entity_failures.store(failures, Ordering::Relaxed);
        self.total_entity_failures.fetch_add(failures, Ordering::Relaxed);
        self.total_busy_skips.fetch_add(busy, Ordering::Relaxed);
        self.max_tick_duration.fetch_max(duration_ns, Ordering::Relaxed);
    }

    /// Record a completed sweep
    pub fn record_sweep(&self, resolved: u64, expired: u64) {
        self.total_sweeps.fetch_add(1, Ordering::Relaxed);
        self.timers_resolved.fetch_add(resolved, Ordering::Relaxed);
        self.timers_expired.fetch_add(expired, Ordering::Relaxed);
    }

    /// Update monitored entity count
    pub fn update_monitored_entities(&self, count: usize) {
        self.monitored_entities.store(count as u64, Ordering::Relaxed);
    }

    /// Get current metrics
    pub fn get_metrics(&self) -> ClockMetrics {
        let mut durations: Vec<u64> = self
            .tick_durations
            .iter()
            .map(|d| d.load(Ordering::Relaxed))
            .filter(|&d| d > 0)
            .collect();
        durations.sort_unstable();

        let avg_tick_duration_ns = if durations.is_empty() {
            0
        } else {
            durations.iter().sum::<u64>() / durations.len() as u64
        };

        let p95_tick_duration_ns = if durations.is_empty() {
            0
        } else {
            let index = (durations.len() as f64 * 0.95) as usize;
            durations[index.min(durations.len() - 1)]
        };

        ClockMetrics {
            monitored_entities: self.monitored_entities.load(Ordering::Relaxed),
            entities_processed: self.entities_processed.load(Ordering::Relaxed),
            entity_failures: self.entity_failures.load(Ordering::Relaxed),
            tick_duration_ns: self.last_tick_duration.load(Ordering::Relaxed),
            avg_tick_duration_ns,
            max_tick_duration_ns: self.max_tick_duration.load(Ordering::Relaxed),
            p95_tick_duration_ns,
            uptime_seconds: self.start_time.elapsed().as_secs(),
            total_ticks: self.total_ticks.load(Ordering::Relaxed),
            total_entity_failures: self.total_entity_failures.load(Ordering::Relaxed),
            total_busy_skips: self.total_busy_skips.load(Ordering::Relaxed),
            total_sweeps: self.total_sweeps.load(Ordering::Relaxed),
            timers_resolved: self.timers_resolved.load(Ordering::Relaxed),
            timers_expired: self.timers_expired.load(Ordering::Relaxed),
        }
    }

    /// Reset all metrics
    pub fn reset(&self) {
        for duration in &self.tick_durations {
            duration.store(0, Ordering::Relaxed);
        }
        for counter in [
            &self.last_tick_duration,
            &self.max_tick_duration,
            &self.total_ticks,
            &self.entities_processed,
            &self.entity_failures,
            &self.total_entity_failures,
            &self.total_busy_skips,
            &self.total_sweeps,
            &self.timers_resolved,
            &self.timers_expired,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
