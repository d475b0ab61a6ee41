//! BuyTimer: the grace period a shortfall entity gets before being flagged

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::EntityId;

/// Timer ID wrapper
pub type TimerId = uuid::Uuid;

/// Timer status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimerStatus {
    Active,
    Resolved,
    Expired,
}

/// A bounded remediation window opened when a deduction cannot be covered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuyTimer {
    pub id: TimerId,
    pub entity_id: EntityId,
    /// Credits the entity must hold to clear the shortfall
    pub required_amount: Decimal,
    pub started_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: TimerStatus,
    /// When the timer left ACTIVE
    pub closed_at: Option<DateTime<Utc>>,
}

impl BuyTimer {
    /// Open a new ACTIVE timer anchored at `started_at`
    pub fn new(
        entity_id: EntityId,
        required_amount: Decimal,
        started_at: DateTime<Utc>,
        grace: Duration,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            entity_id,
            required_amount,
            started_at,
            expires_at: started_at + grace,
            status: TimerStatus::Active,
            closed_at: None,
        }
    }

    /// Check if the grace period is over at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Check if timer is active
    pub fn is_active(&self) -> bool {
        self.status == TimerStatus::Active
    }

    /// Time left before expiry, zero once expired
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).max(Duration::zero())
    }

    pub(crate) fn close(&mut self, status: TimerStatus, at: DateTime<Utc>) {
        self.status = status;
        self.closed_at = Some(at);
    }
}

/// Result of asking the store to open a timer
#[derive(Debug, Clone, PartialEq)]
pub enum TimerOpen {
    /// No timer was active; this one is now
    Created(BuyTimer),
    /// A timer was already active and was left untouched
    Existing(BuyTimer),
}

impl TimerOpen {
    pub fn timer(&self) -> &BuyTimer {
        match self {
            TimerOpen::Created(timer) | TimerOpen::Existing(timer) => timer,
        }
    }
}
