use super::*;
use crate::error::SchedulerError;

fn snapshot(level: f64) -> StatusSnapshot {
    StatusSnapshot::new(level)
}

#[test]
fn test_state_critical_takes_precedence() {
    // Low level wins even while moving and charging
    let s = StatusSnapshot {
        active: true,
        speed: Some(40.0),
        ..snapshot(15.0)
    };
    assert_eq!(OperatingState::from_snapshot(&s, 20.0), OperatingState::Critical);
}

#[test]
fn test_state_moving_before_active() {
    let s = StatusSnapshot {
        active: true,
        speed: Some(12.0),
        ..snapshot(60.0)
    };
    assert_eq!(OperatingState::from_snapshot(&s, 20.0), OperatingState::Moving);
}

#[test]
fn test_state_active_and_idle() {
    let charging = StatusSnapshot {
        active: true,
        speed: Some(0.0),
        ..snapshot(60.0)
    };
    assert_eq!(
        OperatingState::from_snapshot(&charging, 20.0),
        OperatingState::Active
    );
    assert_eq!(
        OperatingState::from_snapshot(&snapshot(60.0), 20.0),
        OperatingState::Idle
    );
}

#[test]
fn test_state_boundary_at_critical_level() {
    // Exactly 20% is not critical
    assert_eq!(
        OperatingState::from_snapshot(&snapshot(20.0), 20.0),
        OperatingState::Idle
    );
}

#[test]
fn test_delay_active_high_priority() {
    let config = ScheduleConfig::new("car-1", IntervalTable::default()).with_priority(Priority::High);
    let delay = compute_delay(&config, OperatingState::Active, &PriorityFactors::default());
    assert_eq!(delay, Duration::from_secs(60).mul_f64(0.75));
    assert_eq!(delay, Duration::from_secs(45));
}

#[test]
fn test_delay_per_priority() {
    let factors = PriorityFactors::default();
    let base = ScheduleConfig::new("car-1", IntervalTable::default());

    let cases = [
        (Priority::Low, Duration::from_secs(450)),
        (Priority::Normal, Duration::from_secs(300)),
        (Priority::High, Duration::from_secs(225)),
        (Priority::Critical, Duration::from_secs(150)),
    ];
    for (priority, expected) in cases {
        let config = base.clone().with_priority(priority);
        assert_eq!(compute_delay(&config, OperatingState::Idle, &factors), expected);
    }
}

#[test]
fn test_delay_compounds_state_and_priority() {
    let config =
        ScheduleConfig::new("car-1", IntervalTable::default()).with_priority(Priority::Critical);
    let delay = compute_delay(&config, OperatingState::Critical, &PriorityFactors::default());
    assert_eq!(delay, Duration::from_secs(5));
}

#[test]
fn test_delay_falls_back_to_base_on_unusable_factor() {
    let config = ScheduleConfig::new("car-1", IntervalTable::default());

    for normal in [-1.0, 0.0, f64::NAN, f64::INFINITY, 1e300] {
        let factors = PriorityFactors {
            normal,
            ..Default::default()
        };
        let delay = compute_delay(&config, OperatingState::Moving, &factors);
        assert_eq!(delay, Duration::from_secs(15), "factor {}", normal);
    }
}

#[test]
fn test_priority_factor_validation() {
    assert!(PriorityFactors::default().validate().is_ok());

    let factors = PriorityFactors {
        high: -0.5,
        ..Default::default()
    };
    let err = factors.validate().unwrap_err();
    assert!(err.contains("high priority factor"));

    let factors = PriorityFactors {
        critical: f64::NAN,
        ..Default::default()
    };
    assert!(factors.validate().is_err());
}

#[test]
fn test_interval_floor() {
    assert!(IntervalTable::default().validate().is_ok());

    let mut table = IntervalTable::default();
    table.critical = MIN_INTERVAL;
    assert!(table.validate().is_ok());

    table.critical = Duration::from_millis(999);
    let err = ScheduleConfig::new("car-1", table).validate().unwrap_err();
    assert!(matches!(
        err,
        SchedulerError::InvalidSchedule { ref entity_id, .. } if entity_id == "car-1"
    ));
    assert!(err.to_string().contains("critical interval"));
}

#[test]
fn test_interval_merge_is_key_by_key() {
    let mut table = IntervalTable::default();
    table.merge(&IntervalOverrides {
        moving: Some(Duration::from_secs(5)),
        ..Default::default()
    });

    assert_eq!(table.moving, Duration::from_secs(5));
    assert_eq!(table.idle, Duration::from_secs(300));
    assert_eq!(table.active, Duration::from_secs(60));
    assert_eq!(table.critical, Duration::from_secs(10));
    assert_eq!(table.shortest(), Duration::from_secs(5));
}

#[test]
fn test_schedule_config_json_defaults() {
    let json = serde_json::json!({
        "entity_id": "car-1",
        "intervals": {
            "idle_ms": 1000,
            "active_ms": 500,
            "moving_ms": 200,
            "critical_ms": 100
        }
    });

    let config: ScheduleConfig = serde_json::from_value(json).unwrap();
    assert_eq!(config.priority, Priority::Normal);
    assert!(config.enabled);
    assert_eq!(config.intervals.moving, Duration::from_millis(200));
}

#[test]
fn test_patch_deserializes_partial_intervals() {
    let json = serde_json::json!({
        "intervals": { "idle_ms": 120000 },
        "priority": "high"
    });

    let patch: SchedulePatch = serde_json::from_value(json).unwrap();
    assert_eq!(patch.intervals.idle, Some(Duration::from_secs(120)));
    assert_eq!(patch.intervals.active, None);
    assert_eq!(patch.priority, Some(Priority::High));
    assert_eq!(patch.enabled, None);
}

// --- registry ---

#[test]
fn test_registry_insert_and_replace() {
    let registry = ScheduleRegistry::new();

    let first = ScheduleConfig::new("car-1", IntervalTable::default());
    assert!(registry.insert(first.clone()).is_none());

    let second = first.clone().with_priority(Priority::Low);
    let replaced = registry.insert(second).unwrap();
    assert_eq!(replaced.priority, Priority::Normal);

    assert_eq!(registry.len(), 1);
    assert_eq!(registry.get("car-1").unwrap().priority, Priority::Low);
}

#[test]
fn test_registry_update_unknown_entity() {
    let registry = ScheduleRegistry::new();
    let result = registry.update("ghost", &SchedulePatch::default());
    assert_eq!(result.unwrap_err(), SchedulerError::NotFound("ghost".to_string()));
}

#[test]
fn test_registry_update_merges_intervals() {
    let registry = ScheduleRegistry::new();
    registry.insert(ScheduleConfig::new("car-1", IntervalTable::default()));

    let patch = SchedulePatch {
        intervals: IntervalOverrides {
            active: Some(Duration::from_secs(30)),
            ..Default::default()
        },
        category: Some("tesla".to_string()),
        ..Default::default()
    };
    let updated = registry.update("car-1", &patch).unwrap();

    assert_eq!(updated.intervals.active, Duration::from_secs(30));
    assert_eq!(updated.intervals.idle, Duration::from_secs(300));
    assert_eq!(updated.category.as_deref(), Some("tesla"));
    assert!(updated.enabled);
}

#[test]
fn test_registry_update_rejects_zero_interval() {
    let registry = ScheduleRegistry::new();
    registry.insert(ScheduleConfig::new("car-1", IntervalTable::default()));

    let patch = SchedulePatch {
        intervals: IntervalOverrides {
            idle: Some(Duration::ZERO),
            ..Default::default()
        },
        priority: Some(Priority::High),
        ..Default::default()
    };
    let err = registry.update("car-1", &patch).unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidSchedule { .. }));

    // Nothing from the rejected patch is applied
    let config = registry.get("car-1").unwrap();
    assert_eq!(config.intervals, IntervalTable::default());
    assert_eq!(config.priority, Priority::Normal);
}

#[test]
fn test_with_current_runs_only_for_live_generation() {
    let registry = ScheduleRegistry::new();
    registry.insert(ScheduleConfig::new("car-1", IntervalTable::default()));

    let stale = registry.next_generation("car-1").unwrap();
    let current = registry.next_generation("car-1").unwrap();

    assert_eq!(registry.with_current("car-1", current, || 7), Some(7));
    assert_eq!(registry.with_current("car-1", stale, || 7), None);
    assert_eq!(registry.with_current("ghost", current, || 7), None);

    registry.remove("car-1");
    assert_eq!(registry.with_current("car-1", current, || 7), None);
}

#[test]
fn test_registry_set_enabled() {
    let registry = ScheduleRegistry::new();
    registry.insert(ScheduleConfig::new("car-1", IntervalTable::default()));

    assert!(registry.set_enabled("car-1", false).unwrap());
    assert!(!registry.set_enabled("car-1", false).unwrap());
    assert!(registry.enabled_ids().is_empty());
    assert!(registry.set_enabled("ghost", true).is_err());
}

#[test]
fn test_generation_invalidated_by_remove() {
    let registry = ScheduleRegistry::new();
    registry.insert(ScheduleConfig::new("car-1", IntervalTable::default()));

    let generation = registry.next_generation("car-1").unwrap();
    assert!(registry.is_current("car-1", generation));

    registry.remove("car-1");
    assert!(!registry.is_current("car-1", generation));

    // Re-registering never revives an old generation
    registry.insert(ScheduleConfig::new("car-1", IntervalTable::default()));
    assert!(!registry.is_current("car-1", generation));
}

#[test]
fn test_generation_invalidated_by_cancel() {
    let registry = ScheduleRegistry::new();
    registry.insert(ScheduleConfig::new("car-1", IntervalTable::default()));

    let generation = registry.next_generation("car-1").unwrap();
    assert!(registry.cancel("car-1"));
    assert!(!registry.is_current("car-1", generation));
    assert!(!registry.cancel("ghost"));
    assert!(registry.next_generation("ghost").is_none());
}

#[tokio::test]
async fn test_stale_task_handle_is_not_attached() {
    let registry = ScheduleRegistry::new();
    registry.insert(ScheduleConfig::new("car-1", IntervalTable::default()));

    let stale = registry.next_generation("car-1").unwrap();
    let current = registry.next_generation("car-1").unwrap();

    let stale_task = tokio::spawn(async {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    });
    registry.attach_task("car-1", stale, TaskHandle::new(stale_task));
    assert!(!registry.has_live_task("car-1"));

    let live = tokio::spawn(async {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    });
    registry.attach_task("car-1", current, TaskHandle::new(live));
    assert!(registry.has_live_task("car-1"));

    assert_eq!(registry.cancel_all(), 1);
    assert!(!registry.is_current("car-1", current));
}

#[test]
fn test_category_counts() {
    let registry = ScheduleRegistry::new();
    registry.insert(ScheduleConfig::new("a", IntervalTable::default()).with_category("tesla"));
    registry.insert(ScheduleConfig::new("b", IntervalTable::default()).with_category("tesla"));
    registry.insert(ScheduleConfig::new("c", IntervalTable::default()).with_category("bmw"));
    registry.insert(ScheduleConfig::new("d", IntervalTable::default()));

    let counts = registry.category_counts();
    assert_eq!(counts.get("tesla"), Some(&2));
    assert_eq!(counts.get("bmw"), Some(&1));
    assert_eq!(counts.len(), 2);
}
