//! # ComplianceClock
//!
//! The heartbeat of the compliance engine.
//!
//! Two [`ClockScheduler`]s aligned to wall-clock boundaries drive a
//! [`ComplianceMonitor`]: the tick evaluates every registered entity once per
//! window, and the sweep checks running BuyTimers on a finer period. Time
//! comes from an injected [`Clock`] so tests can advance it by hand.

pub mod clock;
pub mod config;
pub mod error;
pub mod metrics;
pub mod monitor;
pub mod scheduler;



pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ClockConfig;
pub use error::{ClockError, Result};
pub use metrics::{ClockMetrics, MetricsCollector};
pub use monitor::{ComplianceMonitor, MonitorStatus, TickReport};
pub use scheduler::{next_boundary, ClockScheduler, SchedulerStatus, TickHandler};

/// Re-export commonly used types
pub use compliance_engine::{CycleOutcome, SweepReport, TimerOutcome};
pub use emission_store::EntityId;

/// Current version of the ComplianceClock
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default compliance tick interval (5 minutes)
pub const DEFAULT_TICK_INTERVAL_SECS: u64 = 300;

/// Default BuyTimer sweep interval
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 5;

/// Default number of entities evaluated concurrently within a tick
pub const DEFAULT_MAX_CONCURRENT_ENTITIES: usize = 8;

/// Default number of tick durations kept for statistics
pub const DEFAULT_METRICS_HISTORY: usize = 288;
