use thiserror::Error;

/// Errors surfaced synchronously by the scheduler's administrative operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// Operation on an entity that is not registered
    #[error("entity '{0}' is not registered")]
    NotFound(String),

    /// Schedule rejected before it reached the registry
    #[error("invalid schedule for '{entity_id}': {reason}")]
    InvalidSchedule { entity_id: String, reason: String },
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
