// Semantic change detection between successive snapshots

use crate::event::UpdateEventType;
use crate::status::{Location, StatusSnapshot};
use serde::{Deserialize, Serialize};


/// Mean Earth radius used by the haversine distance
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Thresholds that decide which transitions are worth reporting
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionThresholds {
    /// Displacement below this is GPS jitter and not reported
    #[serde(default = "default_location_threshold_km")]
    pub location_threshold_km: f64,

    /// Falling through any of these levels raises level_low
    #[serde(default = "default_low_level_thresholds")]
    pub low_level_thresholds: Vec<f64>,

    /// Completion target when neither snapshot reports a limit
    #[serde(default = "default_charge_limit")]
    pub default_charge_limit: f64,
}

fn default_location_threshold_km() -> f64 {
    0.1
}

fn default_low_level_thresholds() -> Vec<f64> {
    vec![20.0, 10.0]
}

fn default_charge_limit() -> f64 {
    80.0
}

impl Default for DetectionThresholds {
    fn default() -> Self {
        Self {
            location_threshold_km: default_location_threshold_km(),
            low_level_thresholds: default_low_level_thresholds(),
            default_charge_limit: default_charge_limit(),
        }
    }
}

/// Computes the events implied by the transition from one snapshot to the next
#[derive(Clone, Debug, Default)]
pub struct ChangeDetector {
    thresholds: DetectionThresholds,
}

impl ChangeDetector {
    pub fn new(thresholds: DetectionThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &DetectionThresholds {
        &self.thresholds
    }

    /// Events for `previous → current`, in a fixed order: activity edge,
    /// secondary flag, location, level.
    ///
    /// The first observation of an entity (`previous == None`) yields nothing.
    pub fn detect(
        &self,
        previous: Option<&StatusSnapshot>,
        current: &StatusSnapshot,
    ) -> Vec<UpdateEventType> {
        let Some(previous) = previous else {
            return Vec::new();
        };

        let mut events = Vec::new();

        if let Some(edge) = self.activity_edge(previous, current) {
            events.push(edge);
        }

        if let (Some(before), Some(after)) = (previous.secondary_active, current.secondary_active) {
            if before != after {
                events.push(UpdateEventType::SecondaryStateChanged);
            }
        }

        if let (Some(from), Some(to)) = (previous.location, current.location) {
            if haversine_km(from, to) > self.thresholds.location_threshold_km {
                events.push(UpdateEventType::LocationChanged);
            }
        }

        if self.crossed_low_level(previous.level, current.level) {
            events.push(UpdateEventType::LevelLow);
        }

        events
    }

    fn activity_edge(
        &self,
        previous: &StatusSnapshot,
        current: &StatusSnapshot,
    ) -> Option<UpdateEventType> {
        match (previous.active, current.active) {
            (false, true) => Some(UpdateEventType::ActivityStarted),
            (true, false) => {
                // Session target: current limit, else the limit the session ran with
                let limit = current
                    .limit
                    .or(previous.limit)
                    .unwrap_or(self.thresholds.default_charge_limit);
                if current.level >= limit {
                    Some(UpdateEventType::ActivityComplete)
                } else {
                    Some(UpdateEventType::ActivityStopped)
                }
            }
            _ => None,
        }
    }

    /// Falling edge only: previous at or above a threshold, current below it
    fn crossed_low_level(&self, previous: f64, current: f64) -> bool {
        self.thresholds
            .low_level_thresholds
            .iter()
            .any(|&threshold| previous >= threshold && current < threshold)
    }
}

/// Great-circle distance in kilometres
pub fn haversine_km(from: Location, to: Location) -> f64 {
    let lat1 = from.latitude.to_radians();
    let lat2 = to.latitude.to_radians();
    let d_lat = (to.latitude - from.latitude).to_radians();
    let d_lon = (to.longitude - from.longitude).to_radians();

    let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}
