use crate::event::UpdateEventType;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Latency samples kept for the rolling average
pub const LATENCY_WINDOW: usize = 100;

/// Tracks fetch and event counters for the scheduler.
///
/// Written only from the scheduler's completion handling; everything public
/// outside the crate is a read accessor.
#[derive(Clone)]
pub struct StatsCollector {
    /// Total fetches attempted (lifetime counter)
    total_fetches: Arc<AtomicU64>,

    /// Fetches that failed or timed out
    failed_fetches: Arc<AtomicU64>,

    /// Last `LATENCY_WINDOW` successful fetch latencies in milliseconds
    latencies_ms: Arc<RwLock<VecDeque<f64>>>,

    last_update: Arc<RwLock<Option<DateTime<Utc>>>>,

    /// Emitted events per type
    events_by_type: Arc<RwLock<HashMap<UpdateEventType, u64>>>,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self {
            total_fetches: Arc::new(AtomicU64::new(0)),
            failed_fetches: Arc::new(AtomicU64::new(0)),
            latencies_ms: Arc::new(RwLock::new(VecDeque::with_capacity(LATENCY_WINDOW))),
            last_update: Arc::new(RwLock::new(None)),
            events_by_type: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Record a successful fetch and its latency
    pub(crate) fn record_success(&self, latency: Duration) {
        self.total_fetches.fetch_add(1, Ordering::Relaxed);

        {
            let mut latencies = self.latencies_ms.write().unwrap_or_else(|e| e.into_inner());
            if latencies.len() == LATENCY_WINDOW {
                latencies.pop_front();
            }
            latencies.push_back(latency.as_micros() as f64 / 1000.0);
        }

        *self.last_update.write().unwrap_or_else(|e| e.into_inner()) = Some(Utc::now());
    }

    pub(crate) fn record_failure(&self) {
        self.total_fetches.fetch_add(1, Ordering::Relaxed);
        self.failed_fetches.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_event(&self, kind: UpdateEventType) {
        let mut counts = self.events_by_type.write().unwrap_or_else(|e| e.into_inner());
        *counts.entry(kind).or_insert(0) += 1;
    }

    pub fn total_fetches(&self) -> u64 {
        self.total_fetches.load(Ordering::Relaxed)
    }

    pub fn failed_fetches(&self) -> u64 {
        self.failed_fetches.load(Ordering::Relaxed)
    }

    /// Mean of the rolling latency window; 0 before the first success
    pub fn average_latency_ms(&self) -> f64 {
        let latencies = self.latencies_ms.read().unwrap_or_else(|e| e.into_inner());
        if latencies.is_empty() {
            return 0.0;
        }
        latencies.iter().sum::<f64>() / latencies.len() as f64
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        *self.last_update.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn event_count(&self, kind: UpdateEventType) -> u64 {
        self.events_by_type
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&kind)
            .copied()
            .unwrap_or(0)
    }

    /// Point-in-time read model. Entity figures come from the registry.
    pub fn snapshot(
        &self,
        active_entities: usize,
        by_category: BTreeMap<String, usize>,
    ) -> SchedulerStats {
        let events_by_type = self
            .events_by_type
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(kind, count)| (kind.as_str().to_string(), *count))
            .collect();

        SchedulerStats {
            active_entities,
            total_fetches: self.total_fetches(),
            failed_fetches: self.failed_fetches(),
            average_latency_ms: self.average_latency_ms(),
            last_update: self.last_update(),
            by_category,
            events_by_type,
        }
    }
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of scheduler statistics
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStats {
    pub active_entities: usize,
    pub total_fetches: u64,
    pub failed_fetches: u64,
    pub average_latency_ms: f64,
    pub last_update: Option<DateTime<Utc>>,
    /// Registered entities per category
    pub by_category: BTreeMap<String, usize>,
    pub events_by_type: BTreeMap<String, u64>,
}
