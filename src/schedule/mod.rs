// Per-entity schedules and the adaptive interval algorithm

mod registry;

pub use registry::{ScheduleRegistry, TaskHandle};

use crate::error::{Result, SchedulerError};
use crate::status::StatusSnapshot;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

#[cfg(test)]
mod tests;

/// Operating state derived from the latest snapshot; selects the base interval
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatingState {
    Idle,
    Active,
    Moving,
    Critical,
}

impl OperatingState {
    /// Classify a snapshot.
    ///
    /// Precedence: level below `critical_level` → critical, then moving,
    /// then active (charging/engaged), otherwise idle.
    pub fn from_snapshot(snapshot: &StatusSnapshot, critical_level: f64) -> Self {
        if snapshot.level < critical_level {
            OperatingState::Critical
        } else if snapshot.is_moving() {
            OperatingState::Moving
        } else if snapshot.active {
            OperatingState::Active
        } else {
            OperatingState::Idle
        }
    }
}

/// Operator-assigned polling priority
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// Multipliers applied to the state-derived base interval
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriorityFactors {
    #[serde(default = "default_low_factor")]
    pub low: f64,
    #[serde(default = "default_normal_factor")]
    pub normal: f64,
    #[serde(default = "default_high_factor")]
    pub high: f64,
    #[serde(default = "default_critical_factor")]
    pub critical: f64,
}

fn default_low_factor() -> f64 {
    1.5
}

fn default_normal_factor() -> f64 {
    1.0
}

fn default_high_factor() -> f64 {
    0.75
}

fn default_critical_factor() -> f64 {
    0.5
}

impl Default for PriorityFactors {
    fn default() -> Self {
        Self {
            low: default_low_factor(),
            normal: default_normal_factor(),
            high: default_high_factor(),
            critical: default_critical_factor(),
        }
    }
}

impl PriorityFactors {
    pub fn factor(&self, priority: Priority) -> f64 {
        match priority {
            Priority::Low => self.low,
            Priority::Normal => self.normal,
            Priority::High => self.high,
            Priority::Critical => self.critical,
        }
    }

    /// Every factor must be finite and positive
    pub fn validate(&self) -> std::result::Result<(), String> {
        for (name, factor) in [
            ("low", self.low),
            ("normal", self.normal),
            ("high", self.high),
            ("critical", self.critical),
        ] {
            if !factor.is_finite() || factor <= 0.0 {
                return Err(format!(
                    "{} priority factor must be a positive number, got {}",
                    name, factor
                ));
            }
        }
        Ok(())
    }
}

/// Shortest base interval a schedule may carry
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Base polling interval for every operating state.
///
/// All four states always carry a value; partial input goes through
/// [`IntervalOverrides`] and is merged onto defaults.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalTable {
    #[serde(rename = "idle_ms", with = "duration_ms")]
    pub idle: Duration,
    #[serde(rename = "active_ms", with = "duration_ms")]
    pub active: Duration,
    #[serde(rename = "moving_ms", with = "duration_ms")]
    pub moving: Duration,
    #[serde(rename = "critical_ms", with = "duration_ms")]
    pub critical: Duration,
}

impl Default for IntervalTable {
    fn default() -> Self {
        Self {
            idle: Duration::from_secs(300),
            active: Duration::from_secs(60),
            moving: Duration::from_secs(15),
            critical: Duration::from_secs(10),
        }
    }
}

impl IntervalTable {
    pub fn get(&self, state: OperatingState) -> Duration {
        match state {
            OperatingState::Idle => self.idle,
            OperatingState::Active => self.active,
            OperatingState::Moving => self.moving,
            OperatingState::Critical => self.critical,
        }
    }

    /// Every state must be polled no faster than [`MIN_INTERVAL`]
    pub fn validate(&self) -> std::result::Result<(), String> {
        for (name, interval) in [
            ("idle", self.idle),
            ("active", self.active),
            ("moving", self.moving),
            ("critical", self.critical),
        ] {
            if interval < MIN_INTERVAL {
                return Err(format!(
                    "{} interval must be at least {} ms, got {} ms",
                    name,
                    MIN_INTERVAL.as_millis(),
                    interval.as_millis()
                ));
            }
        }
        Ok(())
    }

    pub fn shortest(&self) -> Duration {
        self.idle
            .min(self.active)
            .min(self.moving)
            .min(self.critical)
    }

    /// Merge key-by-key; states absent from `overrides` keep their interval
    pub fn merge(&mut self, overrides: &IntervalOverrides) {
        if let Some(d) = overrides.idle {
            self.idle = d;
        }
        if let Some(d) = overrides.active {
            self.active = d;
        }
        if let Some(d) = overrides.moving {
            self.moving = d;
        }
        if let Some(d) = overrides.critical {
            self.critical = d;
        }
    }
}

/// Partial interval table
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalOverrides {
    #[serde(rename = "idle_ms", default, with = "option_duration_ms")]
    pub idle: Option<Duration>,
    #[serde(rename = "active_ms", default, with = "option_duration_ms")]
    pub active: Option<Duration>,
    #[serde(rename = "moving_ms", default, with = "option_duration_ms")]
    pub moving: Option<Duration>,
    #[serde(rename = "critical_ms", default, with = "option_duration_ms")]
    pub critical: Option<Duration>,
}

/// Schedule for one tracked entity
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub entity_id: String,
    pub intervals: IntervalTable,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Free-form grouping (e.g. vendor) for stats breakdowns
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

fn default_enabled() -> bool {
    true
}

impl ScheduleConfig {
    /// Enabled, normal-priority schedule with the given base intervals
    pub fn new(entity_id: impl Into<String>, intervals: IntervalTable) -> Self {
        Self {
            entity_id: entity_id.into(),
            intervals,
            priority: Priority::Normal,
            enabled: true,
            category: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.intervals
            .validate()
            .map_err(|reason| SchedulerError::InvalidSchedule {
                entity_id: self.entity_id.clone(),
                reason,
            })
    }

    /// Apply a partial update; unspecified fields are left untouched
    pub fn apply(&mut self, patch: &SchedulePatch) {
        self.intervals.merge(&patch.intervals);
        if let Some(priority) = patch.priority {
            self.priority = priority;
        }
        if let Some(enabled) = patch.enabled {
            self.enabled = enabled;
        }
        if let Some(ref category) = patch.category {
            self.category = Some(category.clone());
        }
    }
}

/// Partial schedule update; only fields present are changed
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulePatch {
    #[serde(default)]
    pub intervals: IntervalOverrides,
    pub priority: Option<Priority>,
    pub enabled: Option<bool>,
    pub category: Option<String>,
}

/// Delay until the next fetch: the base interval for `state` scaled by the
/// entity's priority factor.
///
/// A factor that cannot produce a valid delay falls back to the base interval.
pub fn compute_delay(
    config: &ScheduleConfig,
    state: OperatingState,
    factors: &PriorityFactors,
) -> Duration {
    let base = config.intervals.get(state);
    let factor = factors.factor(config.priority);

    match Duration::try_from_secs_f64(base.as_secs_f64() * factor) {
        Ok(delay) if !delay.is_zero() => delay,
        _ => {
            warn!(
                entity_id = %config.entity_id,
                factor,
                "Invalid priority factor, using base interval"
            );
            base
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod option_duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
