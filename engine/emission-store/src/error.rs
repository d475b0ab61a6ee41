//! Error types for the emission store

use thiserror::Error;

use crate::types::EntityId;

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur while reading or writing the compliance store
#[derive(Error, Debug)]
pub enum StoreError {
    /// The entity record does not exist in the store
    #[error("Entity not found: {entity_id}")]
    EntityNotFound { entity_id: EntityId },

    /// A timer referenced by id does not exist
    #[error("Timer not found: {timer_id}")]
    TimerNotFound { timer_id: uuid::Uuid },

    /// A second ACTIVE timer would violate the one-active-timer invariant
    #[error("Entity {entity_id} already has an active timer")]
    ActiveTimerExists { entity_id: EntityId },

    /// Backend-specific failure
    #[error("Store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Create a new backend error
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }
}
