// Manufacturer-agnostic entity status and the provider seam used to fetch it

mod http;

pub use http::HttpStatusProvider;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Geographic position in decimal degrees
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// Point-in-time state of a tracked entity.
///
/// Replaced wholesale on every successful fetch; never mutated in place.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Energy level, 0-100
    pub level: f64,

    /// Charging / engaged flag
    #[serde(default)]
    pub active: bool,

    /// Target level for the current charging session, if the vendor reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<f64>,

    /// Secondary activity flag (e.g. climate control)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_active: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,

    /// Scalar speed; anything above zero counts as moving
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,

    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl StatusSnapshot {
    /// Idle, stationary snapshot at the given level, stamped now
    pub fn new(level: f64) -> Self {
        Self {
            level,
            active: false,
            limit: None,
            secondary_active: None,
            location: None,
            speed: None,
            timestamp: Utc::now(),
        }
    }

    pub fn is_moving(&self) -> bool {
        self.speed.map_or(false, |speed| speed > 0.0)
    }
}

/// Failure reported by a [`StatusProvider`].
///
/// The scheduler treats every variant the same way; they exist for logs.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
    #[error("status fetch timed out")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
    #[error("provider rate limit exceeded")]
    RateLimited,
    #[error("provider returned status {0}")]
    Status(u16),
    #[error("failed to decode status: {0}")]
    Decode(String),
    #[error("provider error: {0}")]
    Provider(String),
}

/// Source of live entity status.
///
/// Vendor protocols and authentication live behind this trait; the scheduler
/// only ever sees [`StatusSnapshot`] values.
#[async_trait]
pub trait StatusProvider: Send + Sync {
    /// Short provider identifier used in logs
    fn name(&self) -> &str;

    /// Fetch the current status of one entity
    async fn fetch(&self, entity_id: &str) -> Result<StatusSnapshot, FetchError>;
}
