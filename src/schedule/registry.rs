use super::{SchedulePatch, ScheduleConfig};
use crate::error::{Result, SchedulerError};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Cancellable handle to an entity's scheduled task.
///
/// Dropping the handle cancels the task.
pub struct TaskHandle(JoinHandle<()>);

impl TaskHandle {
    pub fn new(handle: JoinHandle<()>) -> Self {
        Self(handle)
    }

    pub fn cancel(&self) {
        self.0.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.0.is_finished()
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.0.abort();
    }
}

struct RegistryEntry {
    config: ScheduleConfig,
    /// Generation of the loop allowed to reschedule this entity
    generation: u64,
    task: Option<TaskHandle>,
}

/// Owns every entity's schedule and the handle of its pending task.
///
/// A loop is identified by a generation number. Cancelling, restarting or
/// removing an entity moves it to a fresh generation, so a loop whose fetch
/// was already in flight finds itself stale on completion and exits without
/// rescheduling.
pub struct ScheduleRegistry {
    /// Sharded concurrent map; entities never contend on a global lock
    entries: DashMap<String, RegistryEntry>,

    /// Generations are unique for the registry's lifetime, across re-registration
    generations: AtomicU64,
}

impl ScheduleRegistry {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            generations: AtomicU64::new(0),
        }
    }

    fn fresh_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Insert or replace a schedule. A replaced entry's pending task is cancelled.
    pub fn insert(&self, config: ScheduleConfig) -> Option<ScheduleConfig> {
        let entity_id = config.entity_id.clone();
        let entry = RegistryEntry {
            config,
            generation: self.fresh_generation(),
            task: None,
        };

        let replaced = self.entries.insert(entity_id.clone(), entry);
        if replaced.is_some() {
            info!(entity_id = %entity_id, "Schedule replaced");
        } else {
            info!(entity_id = %entity_id, "Schedule registered");
        }

        replaced.map(|old| old.config)
    }

    /// Remove a schedule, cancelling its pending task
    pub fn remove(&self, entity_id: &str) -> Option<ScheduleConfig> {
        let removed = self.entries.remove(entity_id).map(|(_, entry)| entry);

        removed.map(|entry| {
            if let Some(task) = &entry.task {
                task.cancel();
            }
            info!(entity_id = %entity_id, "Schedule removed");
            entry.config
        })
    }

    pub fn get(&self, entity_id: &str) -> Option<ScheduleConfig> {
        self.entries.get(entity_id).map(|e| e.config.clone())
    }

    pub fn contains(&self, entity_id: &str) -> bool {
        self.entries.contains_key(entity_id)
    }

    /// All schedules, ordered by entity id
    pub fn list(&self) -> Vec<ScheduleConfig> {
        let mut configs: Vec<ScheduleConfig> =
            self.entries.iter().map(|e| e.config.clone()).collect();
        configs.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        configs
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ids of all enabled entities
    pub fn enabled_ids(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.config.enabled)
            .map(|e| e.key().clone())
            .collect()
    }

    /// Merge a partial update into an existing schedule. An update that would
    /// leave the schedule invalid is rejected and nothing changes.
    pub fn update(&self, entity_id: &str, patch: &SchedulePatch) -> Result<ScheduleConfig> {
        let mut entry = self
            .entries
            .get_mut(entity_id)
            .ok_or_else(|| SchedulerError::NotFound(entity_id.to_string()))?;

        let mut updated = entry.config.clone();
        updated.apply(patch);
        updated.validate()?;
        entry.config = updated;
        debug!(entity_id = %entity_id, "Schedule updated");

        Ok(entry.config.clone())
    }

    /// Set the enabled flag. Returns whether the flag changed.
    pub fn set_enabled(&self, entity_id: &str, enabled: bool) -> Result<bool> {
        let mut entry = self
            .entries
            .get_mut(entity_id)
            .ok_or_else(|| SchedulerError::NotFound(entity_id.to_string()))?;

        let changed = entry.config.enabled != enabled;
        entry.config.enabled = enabled;
        Ok(changed)
    }

    /// Start a new loop generation for an entity, cancelling the pending task.
    ///
    /// Returns `None` if the entity is not registered.
    pub(crate) fn next_generation(&self, entity_id: &str) -> Option<u64> {
        let generation = self.fresh_generation();
        let mut entry = self.entries.get_mut(entity_id)?;

        entry.generation = generation;
        if let Some(task) = entry.task.take() {
            task.cancel();
        }

        Some(generation)
    }

    /// Record the task running `generation`. A handle for a stale generation is
    /// dropped, which cancels it.
    pub(crate) fn attach_task(&self, entity_id: &str, generation: u64, task: TaskHandle) {
        if let Some(mut entry) = self.entries.get_mut(entity_id) {
            if entry.generation == generation {
                entry.task = Some(task);
            }
        }
    }

    /// Run `f` while holding the entity's entry, if `generation` is still its
    /// live loop. Removal and restarts wait until `f` returns, so state written
    /// by `f` cannot outlive the entity. `f` must not call back into the registry.
    pub(crate) fn with_current<R>(
        &self,
        entity_id: &str,
        generation: u64,
        f: impl FnOnce() -> R,
    ) -> Option<R> {
        let entry = self.entries.get(entity_id)?;
        if entry.generation != generation {
            return None;
        }
        let result = f();
        drop(entry);
        Some(result)
    }

    /// True while `generation` is the entity's live loop
    pub fn is_current(&self, entity_id: &str, generation: u64) -> bool {
        self.entries
            .get(entity_id)
            .map_or(false, |e| e.generation == generation)
    }

    /// True if the entity has a task that has not yet finished
    pub fn has_live_task(&self, entity_id: &str) -> bool {
        self.entries
            .get(entity_id)
            .and_then(|e| e.task.as_ref().map(|t| !t.is_finished()))
            .unwrap_or(false)
    }

    /// Cancel an entity's pending task without touching its schedule.
    ///
    /// Returns false if the entity is not registered.
    pub fn cancel(&self, entity_id: &str) -> bool {
        let generation = self.fresh_generation();
        match self.entries.get_mut(entity_id) {
            Some(mut entry) => {
                entry.generation = generation;
                if let Some(task) = entry.task.take() {
                    task.cancel();
                }
                true
            }
            None => false,
        }
    }

    /// Cancel every pending task. Returns the number of tasks cancelled.
    pub fn cancel_all(&self) -> usize {
        let mut cancelled = 0;
        for mut entry in self.entries.iter_mut() {
            entry.generation = self.fresh_generation();
            if let Some(task) = entry.task.take() {
                task.cancel();
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Registered entity count per category; uncategorised entities are omitted
    pub fn category_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for entry in self.entries.iter() {
            if let Some(ref category) = entry.config.category {
                *counts.entry(category.clone()).or_insert(0) += 1;
            }
        }
        counts
    }
}

impl Default for ScheduleRegistry {
    fn default() -> Self {
        Self::new()
    }
}
