use crate::status::StatusSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Kind of change reported for an entity
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateEventType {
    StatusUpdate,
    ActivityStarted,
    ActivityStopped,
    ActivityComplete,
    SecondaryStateChanged,
    LocationChanged,
    LevelLow,
    ConnectivityLost,
}

impl UpdateEventType {
    /// Wire name, also used as the SSE `event:` field
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateEventType::StatusUpdate => "status_update",
            UpdateEventType::ActivityStarted => "activity_started",
            UpdateEventType::ActivityStopped => "activity_stopped",
            UpdateEventType::ActivityComplete => "activity_complete",
            UpdateEventType::SecondaryStateChanged => "secondary_state_changed",
            UpdateEventType::LocationChanged => "location_changed",
            UpdateEventType::LevelLow => "level_low",
            UpdateEventType::ConnectivityLost => "connectivity_lost",
        }
    }
}

impl fmt::Display for UpdateEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// UpdateEvent is an immutable record of something observed about an entity.
///
/// `current` is the snapshot the event was derived from. It is only absent for
/// `connectivity_lost` raised before any fetch for the entity ever succeeded.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEvent {
    /// UUIDv7 identifier (time-ordered)
    pub event_id: String,

    #[serde(rename = "type")]
    pub kind: UpdateEventType,

    pub entity_id: String,

    pub timestamp: DateTime<Utc>,

    #[serde(rename = "data")]
    pub current: Option<StatusSnapshot>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous: Option<StatusSnapshot>,
}

impl UpdateEvent {
    pub fn new(
        kind: UpdateEventType,
        entity_id: impl Into<String>,
        current: Option<StatusSnapshot>,
        previous: Option<StatusSnapshot>,
    ) -> Self {
        Self {
            event_id: Uuid::now_v7().to_string(),
            kind,
            entity_id: entity_id.into(),
            timestamp: Utc::now(),
            current,
            previous,
        }
    }
}
