//! Fixed-interval scheduler aligned to wall-clock boundaries

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeZone, Utc};
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::clock::Clock;
use crate::error::{ClockError, Result};

/// Work run on every boundary; receives the boundary instant
pub type TickHandler = Arc<dyn Fn(DateTime<Utc>) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Snapshot of a scheduler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub next_tick_at: Option<DateTime<Utc>>,
}

/// First multiple of `interval` since the Unix epoch strictly after `now`
pub fn next_boundary(now: DateTime<Utc>, interval: chrono::Duration) -> DateTime<Utc> {
    let step = interval.num_milliseconds().max(1);
    let next = (now.timestamp_millis().div_euclid(step) + 1) * step;
    Utc.timestamp_millis_opt(next).single().unwrap_or(now + interval)
}

#[derive(Default)]
struct SchedulerState {
    running: AtomicBool,
    next_tick_at: RwLock<Option<DateTime<Utc>>>,
    ticks_in_flight: AtomicUsize,
}

/// Fires a handler on every interval boundary until stopped.
///
/// Each firing runs in its own task, so a slow or failing tick neither delays
/// nor cancels the next one. Boundaries missed while the loop was late are
/// skipped, not replayed.
pub struct ClockScheduler {
    name: &'static str,
    interval: chrono::Duration,
    clock: Arc<dyn Clock>,
    state: Arc<SchedulerState>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ClockScheduler {
    pub fn new(name: &'static str, interval: Duration, clock: Arc<dyn Clock>) -> Result<Self> {
        let interval = chrono::Duration::from_std(interval)
            .map_err(|e| ClockError::config(format!("{name} interval: {e}")))?;
        if interval <= chrono::Duration::zero() {
            return Err(ClockError::config(format!("{name} interval must be positive")));
        }

        Ok(Self {
            name,
            interval,
            clock,
            state: Arc::new(SchedulerState::default()),
            task: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Start firing `handler` on each boundary
    pub fn start(&self, handler: TickHandler) -> Result<()> {
        if self.state.running.swap(true, Ordering::SeqCst) {
            return Err(ClockError::AlreadyRunning { name: self.name });
        }

        let first = next_boundary(self.clock.now(), self.interval);
        *self.state.next_tick_at.write() = Some(first);

        tracing::info!(scheduler = self.name, first_tick_at = %first, "Starting scheduler");

        let handle = tokio::spawn(run_loop(
            self.name,
            self.interval,
            first,
            self.clock.clone(),
            self.state.clone(),
            handler,
        ));
        *self.task.lock() = Some(handle);
        Ok(())
    }

    /// Cancel pending waits. Ticks already fired keep running.
    ///
    /// Returns whether the scheduler was running.
    pub fn stop(&self) -> bool {
        let was_running = self.state.running.swap(false, Ordering::SeqCst);
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
        *self.state.next_tick_at.write() = None;

        if was_running {
            tracing::info!(scheduler = self.name, "Scheduler stopped");
        }
        was_running
    }

    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus { running: self.is_running(), next_tick_at: *self.state.next_tick_at.read() }
    }

    /// Ticks fired but not yet finished
    pub fn ticks_in_flight(&self) -> usize {
        self.state.ticks_in_flight.load(Ordering::SeqCst)
    }

    /// Wait until no tick is in flight. Returns false on timeout.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.ticks_in_flight() > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        true
    }
}

impl Drop for ClockScheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.task.get_mut().take() {
            handle.abort();
        }
    }
}

async fn run_loop(
    name: &'static str,
    interval: chrono::Duration,
    first: DateTime<Utc>,
    clock: Arc<dyn Clock>,
    state: Arc<SchedulerState>,
    handler: TickHandler,
) {
    let mut next = first;
    loop {
        *state.next_tick_at.write() = Some(next);
        clock.sleep_until(next).await;

        fire(name, next, &state, &handler);

        let now = clock.now();
        next += interval;
        if next <= now {
            let realigned = next_boundary(now, interval);
            let skipped = (realigned - next).num_milliseconds() / interval.num_milliseconds().max(1);
            tracing::warn!(scheduler = name, skipped, next_tick_at = %realigned, "Scheduler fell behind; skipping missed boundaries");
            next = realigned;
        }
    }
}

fn fire(name: &'static str, tick_at: DateTime<Utc>, state: &Arc<SchedulerState>, handler: &TickHandler) {
    state.ticks_in_flight.fetch_add(1, Ordering::SeqCst);
    let work = tokio::spawn(handler(tick_at));
    let state = state.clone();

    tokio::spawn(async move {
        match work.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!(scheduler = name, tick_at = %tick_at, error = %e, "Tick failed");
                metrics::counter!("scheduler_tick_failures_total", 1, "scheduler" => name);
            }
            Err(e) => {
                tracing::error!(scheduler = name, tick_at = %tick_at, error = %e, "Tick task panicked");
                metrics::counter!("scheduler_tick_failures_total", 1, "scheduler" => name);
            }
        }
        state.ticks_in_flight.fetch_sub(1, Ordering::SeqCst);
    });
}
