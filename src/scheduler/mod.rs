// Scheduler core: one adaptive polling loop per entity

use crate::config::FleetConfig;
use crate::detect::ChangeDetector;
use crate::dispatch::{EventDispatcher, EventStream, Subscription};
use crate::error::{Result, SchedulerError};
use crate::event::{UpdateEvent, UpdateEventType};
use crate::retry::RetryPolicy;
use crate::schedule::{
    compute_delay, IntervalTable, OperatingState, PriorityFactors, ScheduleConfig,
    SchedulePatch, ScheduleRegistry, TaskHandle,
};
use crate::stats::{SchedulerStats, StatsCollector};
use crate::status::{FetchError, StatusProvider, StatusSnapshot};
use dashmap::DashMap;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::Instant;
use tracing::{debug, info, warn};


/// Tunables shared by every entity loop
#[derive(Debug, Clone)]
struct Settings {
    priority: PriorityFactors,
    critical_level: f64,
    fetch_timeout: Option<Duration>,
    default_intervals: IntervalTable,
}

struct SchedulerInner {
    provider: Arc<dyn StatusProvider>,
    registry: ScheduleRegistry,
    retry: RetryPolicy,
    detector: ChangeDetector,
    dispatcher: EventDispatcher,
    stats: StatsCollector,
    /// Last successful snapshot per entity
    last_status: DashMap<String, StatusSnapshot>,
    running: AtomicBool,
    settings: Settings,
    /// Runtime the entity loops are spawned onto
    runtime: Handle,
}

/// Adaptive per-entity update scheduler.
///
/// Cheap to clone; all clones drive the same entities. Each enabled entity
/// gets its own Tokio task that sleeps, fetches, reports and re-arms itself,
/// so at most one fetch is ever in flight per entity. Dropping the last clone
/// cancels every loop.
///
/// Loops run on the Tokio runtime the scheduler was created in; once created,
/// the scheduler can be driven from any thread.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    /// Create a scheduler bound to the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn new(provider: Arc<dyn StatusProvider>, config: &FleetConfig) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                provider,
                registry: ScheduleRegistry::new(),
                retry: RetryPolicy::new(config.retry.connectivity_lost_threshold),
                detector: ChangeDetector::new(config.detection.clone()),
                dispatcher: EventDispatcher::new(config.stream.heartbeat()),
                stats: StatsCollector::new(),
                last_status: DashMap::new(),
                running: AtomicBool::new(false),
                settings: Settings {
                    priority: config.priority.clone(),
                    critical_level: config.schedule.critical_level,
                    fetch_timeout: config.schedule.fetch_timeout(),
                    default_intervals: config.schedule.intervals(),
                },
                runtime: Handle::current(),
            }),
        }
    }

    pub fn with_defaults(provider: Arc<dyn StatusProvider>) -> Self {
        Self::new(provider, &FleetConfig::default())
    }

    /// Start a loop for every enabled entity. Each one fetches immediately.
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            debug!("Scheduler already running");
            return;
        }

        let ids = self.inner.registry.enabled_ids();
        for entity_id in &ids {
            self.inner.arm(entity_id, Duration::ZERO);
        }

        info!(
            provider = self.inner.provider.name(),
            entities = ids.len(),
            "Scheduler started"
        );
    }

    /// Cancel every loop. Schedules, snapshots and failure counters are kept.
    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        let cancelled = self.inner.registry.cancel_all();
        info!(cancelled, "Scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Schedule using the configured default intervals
    pub fn new_schedule(&self, entity_id: impl Into<String>) -> ScheduleConfig {
        ScheduleConfig::new(entity_id, self.inner.settings.default_intervals.clone())
    }

    /// Register or replace an entity. While running, an enabled entity is
    /// fetched immediately. Returns the replaced schedule, if any.
    ///
    /// Schedules with an interval below
    /// [`MIN_INTERVAL`](crate::schedule::MIN_INTERVAL) are rejected.
    pub fn add_entity(&self, config: ScheduleConfig) -> Result<Option<ScheduleConfig>> {
        config.validate()?;

        let entity_id = config.entity_id.clone();
        let enabled = config.enabled;

        let replaced = self.inner.registry.insert(config);
        if enabled && self.is_running() {
            self.inner.arm(&entity_id, Duration::ZERO);
        }

        Ok(replaced)
    }

    /// Unregister an entity and drop its snapshot and failure streak.
    ///
    /// A fetch already in flight completes into the void.
    pub fn remove_entity(&self, entity_id: &str) -> Result<ScheduleConfig> {
        let removed = self
            .inner
            .registry
            .remove(entity_id)
            .ok_or_else(|| SchedulerError::NotFound(entity_id.to_string()))?;

        self.inner.last_status.remove(entity_id);
        self.inner.retry.remove(entity_id);

        Ok(removed)
    }

    /// Merge a partial update. While running, the loop restarts with the new
    /// parameters; the next fetch waits for the newly computed delay.
    pub fn update_schedule(&self, entity_id: &str, patch: SchedulePatch) -> Result<ScheduleConfig> {
        let was_enabled = self
            .inner
            .registry
            .get(entity_id)
            .ok_or_else(|| SchedulerError::NotFound(entity_id.to_string()))?
            .enabled;

        let config = self.inner.registry.update(entity_id, &patch)?;

        if !config.enabled {
            self.inner.registry.cancel(entity_id);
        } else if self.is_running() {
            let delay = if was_enabled {
                self.inner.delay_for(&config)
            } else {
                Duration::ZERO
            };
            self.inner.arm(entity_id, delay);
        }

        info!(entity_id = %entity_id, "Schedule updated");
        Ok(config)
    }

    /// Enable or disable polling. Disabling keeps all state; enabling a
    /// disabled entity fetches immediately if the scheduler is running.
    pub fn set_enabled(&self, entity_id: &str, enabled: bool) -> Result<()> {
        let changed = self.inner.registry.set_enabled(entity_id, enabled)?;

        if !enabled {
            self.inner.registry.cancel(entity_id);
        } else if changed && self.is_running() {
            self.inner.arm(entity_id, Duration::ZERO);
        }

        if changed {
            info!(entity_id = %entity_id, enabled, "Entity polling toggled");
        }
        Ok(())
    }

    pub fn pause(&self, entity_id: &str) -> Result<()> {
        self.set_enabled(entity_id, false)
    }

    pub fn resume(&self, entity_id: &str) -> Result<()> {
        self.set_enabled(entity_id, true)
    }

    /// Fetch now, out of band. Replaces the pending timer, so the loop keeps
    /// at most one fetch in flight and continues from this fetch.
    pub fn refresh_now(&self, entity_id: &str) -> Result<()> {
        if self.inner.arm(entity_id, Duration::ZERO) {
            debug!(entity_id = %entity_id, "Immediate refresh requested");
            Ok(())
        } else {
            Err(SchedulerError::NotFound(entity_id.to_string()))
        }
    }

    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&UpdateEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.dispatcher.subscribe(handler)
    }

    pub fn stream_for(&self, filter: Option<HashSet<String>>) -> EventStream {
        self.inner.dispatcher.stream_for(filter)
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.inner.dispatcher
    }

    pub fn stats(&self) -> SchedulerStats {
        let active = self.inner.registry.enabled_ids().len();
        self.inner
            .stats
            .snapshot(active, self.inner.registry.category_counts())
    }

    pub fn last_status(&self, entity_id: &str) -> Option<StatusSnapshot> {
        self.inner.last_status.get(entity_id).map(|s| s.clone())
    }

    pub fn all_statuses(&self) -> BTreeMap<String, StatusSnapshot> {
        self.inner
            .last_status
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn consecutive_failures(&self, entity_id: &str) -> u32 {
        self.inner.retry.failures(entity_id)
    }

    pub fn list_schedules(&self) -> Vec<ScheduleConfig> {
        self.inner.registry.list()
    }

    pub fn get_schedule(&self, entity_id: &str) -> Option<ScheduleConfig> {
        self.inner.registry.get(entity_id)
    }

    /// True if the entity has a loop that has not finished
    pub fn is_scheduled(&self, entity_id: &str) -> bool {
        self.inner.registry.has_live_task(entity_id)
    }
}

impl SchedulerInner {
    /// Start a fresh loop generation that fetches after `initial_delay`,
    /// replacing any pending task. Returns false for unknown entities.
    fn arm(self: &Arc<Self>, entity_id: &str, initial_delay: Duration) -> bool {
        let Some(generation) = self.registry.next_generation(entity_id) else {
            return false;
        };

        let handle = self.runtime.spawn(run_entity_loop(
            Arc::downgrade(self),
            entity_id.to_string(),
            generation,
            initial_delay,
        ));
        self.registry
            .attach_task(entity_id, generation, TaskHandle::new(handle));

        debug!(
            entity_id = %entity_id,
            generation,
            delay_ms = initial_delay.as_millis() as u64,
            "Entity loop armed"
        );
        true
    }

    /// Base interval for the entity's last known state, scaled by priority.
    /// An entity never fetched successfully counts as idle.
    fn delay_for(&self, config: &ScheduleConfig) -> Duration {
        let state = self
            .last_status
            .get(&config.entity_id)
            .map_or(OperatingState::Idle, |snapshot| {
                OperatingState::from_snapshot(&snapshot, self.settings.critical_level)
            });
        compute_delay(config, state, &self.settings.priority)
    }

    /// Delay before the next cycle, or `None` if this loop should end
    fn next_delay(&self, entity_id: &str, generation: u64) -> Option<Duration> {
        if !self.running.load(Ordering::SeqCst) || !self.registry.is_current(entity_id, generation)
        {
            return None;
        }

        let config = self.registry.get(entity_id)?;
        if !config.enabled {
            return None;
        }

        Some(self.delay_for(&config))
    }

    async fn run_cycle(&self, entity_id: &str, generation: u64) {
        let Some(config) = self.registry.get(entity_id) else {
            return;
        };
        let timeout = self
            .settings
            .fetch_timeout
            .unwrap_or_else(|| config.intervals.shortest());

        let started = Instant::now();
        let result = match tokio::time::timeout(timeout, self.provider.fetch(entity_id)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout),
        };
        let latency = started.elapsed();

        // Completion state is written under the entity's registry entry: a
        // concurrent remove either runs after the writes and clears them, or
        // wins and the result is discarded.
        let events = self.registry.with_current(entity_id, generation, || match result {
            Ok(snapshot) => self.record_success(entity_id, snapshot, latency),
            Err(e) => self.record_failure(entity_id, e),
        });

        match events {
            // Published outside the entry so handlers may call back into the scheduler
            Some(events) => {
                for event in events {
                    self.emit(event);
                }
            }
            None => debug!(entity_id = %entity_id, generation, "Discarding stale fetch result"),
        }
    }

    fn record_success(
        &self,
        entity_id: &str,
        snapshot: StatusSnapshot,
        latency: Duration,
    ) -> Vec<UpdateEvent> {
        self.retry.on_success(entity_id);
        self.stats.record_success(latency);

        let previous = self
            .last_status
            .insert(entity_id.to_string(), snapshot.clone());

        debug!(
            entity_id = %entity_id,
            level = snapshot.level,
            latency_ms = latency.as_millis() as u64,
            "Status fetched"
        );

        let mut events = vec![UpdateEvent::new(
            UpdateEventType::StatusUpdate,
            entity_id,
            Some(snapshot.clone()),
            None,
        )];
        for kind in self.detector.detect(previous.as_ref(), &snapshot) {
            events.push(UpdateEvent::new(
                kind,
                entity_id,
                Some(snapshot.clone()),
                previous.clone(),
            ));
        }
        events
    }

    fn record_failure(&self, entity_id: &str, error: FetchError) -> Vec<UpdateEvent> {
        self.stats.record_failure();
        let crossed = self.retry.on_failure(entity_id);

        warn!(
            entity_id = %entity_id,
            error = %error,
            failures = self.retry.failures(entity_id),
            "Status fetch failed"
        );

        if !crossed {
            return Vec::new();
        }

        warn!(
            entity_id = %entity_id,
            threshold = self.retry.threshold(),
            "Connectivity lost"
        );
        let last_known = self.last_status.get(entity_id).map(|s| s.clone());
        vec![UpdateEvent::new(
            UpdateEventType::ConnectivityLost,
            entity_id,
            last_known,
            None,
        )]
    }

    fn emit(&self, event: UpdateEvent) {
        self.stats.record_event(event.kind);
        self.dispatcher.publish(&event);
    }
}

/// Body of one loop generation. Exits when the scheduler is dropped, the
/// generation goes stale, or the entity should no longer be polled.
async fn run_entity_loop(
    scheduler: Weak<SchedulerInner>,
    entity_id: String,
    generation: u64,
    initial_delay: Duration,
) {
    let mut delay = initial_delay;

    loop {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let Some(inner) = scheduler.upgrade() else {
            return;
        };
        if !inner.registry.is_current(&entity_id, generation) {
            return;
        }

        inner.run_cycle(&entity_id, generation).await;

        match inner.next_delay(&entity_id, generation) {
            Some(next) => {
                debug!(
                    entity_id = %entity_id,
                    delay_ms = next.as_millis() as u64,
                    "Next fetch scheduled"
                );
                delay = next;
            }
            None => {
                debug!(entity_id = %entity_id, generation, "Entity loop finished");
                return;
            }
        }
    }
}
