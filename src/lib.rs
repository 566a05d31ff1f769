// Entity status model and provider seam
pub mod status;

// Per-entity schedules, interval algorithm and registry
pub mod schedule;

// Consecutive-failure tracking
pub mod retry;

// Semantic change detection
pub mod detect;

// Event model
pub mod event;

// Event fan-out and SSE streaming
pub mod dispatch;

// Fetch and event statistics
pub mod stats;

// Scheduler core
pub mod scheduler;

// Configuration
pub mod config;

// Error types
pub mod error;

// HTTP API
pub mod api;

pub use error::{Result, SchedulerError};
pub use scheduler::Scheduler;
