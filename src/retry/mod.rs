// Consecutive-failure tracking per entity
//
// Failures never stop scheduling; the counter only decides when a
// connectivity_lost signal is raised. The signal fires on the failure that
// reaches the threshold, once per streak.

use dashmap::DashMap;

pub struct RetryPolicy {
    /// Consecutive failures that raise connectivity_lost
    threshold: u32,
    failures: DashMap<String, u32>,
}

impl RetryPolicy {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            failures: DashMap::new(),
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Reset the streak after a successful fetch
    pub fn on_success(&self, entity_id: &str) {
        if let Some(mut count) = self.failures.get_mut(entity_id) {
            *count = 0;
        }
    }

    /// Record a failed fetch.
    ///
    /// Returns true only when this failure is the one that reaches the threshold.
    pub fn on_failure(&self, entity_id: &str) -> bool {
        let mut count = self.failures.entry(entity_id.to_string()).or_insert(0);
        *count = count.saturating_add(1);
        *count == self.threshold
    }

    pub fn failures(&self, entity_id: &str) -> u32 {
        self.failures.get(entity_id).map_or(0, |c| *c)
    }

    pub fn remove(&self, entity_id: &str) {
        self.failures.remove(entity_id);
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}
