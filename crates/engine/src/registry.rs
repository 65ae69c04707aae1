//! Runtime Registry (C1): the authoritative in-memory map of managed
//! containers. Concurrent access is guarded by a single `parking_lot::Mutex`
//! around an `IndexMap`, which keeps `list()` stably ordered without a
//! separate sort on every read.

use indexmap::IndexMap;
use parking_lot::Mutex;
use std::time::Instant;
use taskgw_adapters::{labels, ObservedContainer};
use taskgw_core::{ImageSource, LifecycleState, RepositoryId, RuntimeEntry, RuntimeId, TaskId};

#[derive(Clone, Default)]
pub struct RuntimeRegistry {
    entries: std::sync::Arc<Mutex<IndexMap<RuntimeId, RuntimeEntry>>>,
}

impl RuntimeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ordered snapshot by `runtime_id`, case-insensitive (§4.1).
    pub fn list(&self) -> Vec<RuntimeEntry> {
        let entries = self.entries.lock();
        let mut snapshot: Vec<RuntimeEntry> = entries.values().cloned().collect();
        snapshot.sort_by(|a, b| a.runtime_id.as_str().to_lowercase().cmp(&b.runtime_id.as_str().to_lowercase()));
        snapshot
    }

    pub fn get(&self, id: &RuntimeId) -> Option<RuntimeEntry> {
        self.entries.lock().get(id).cloned()
    }

    pub fn remove(&self, id: &RuntimeId) -> Option<RuntimeEntry> {
        self.entries.lock().shift_remove(id)
    }

    /// Merge an observed container into the registry: creates a new entry if
    /// absent, otherwise merges ground-truth fields (image, endpoints,
    /// running-ness, max_slots) without overwriting fields owned by the
    /// lifecycle path (`active_slots`, `is_draining`, `lifecycle_state` while
    /// draining) (§4.1).
    pub fn upsert_from_container(
        &self,
        observed: &ObservedContainer,
        grpc_endpoint: String,
        proxy_endpoint: String,
        now: Instant,
    ) -> RuntimeEntry {
        let runtime_id = RuntimeId::new(
            observed.labels.get(labels::WORKER_ID).cloned().unwrap_or_else(|| observed.name.clone()),
        );
        let task_id = observed.labels.get(labels::TASK_ID).filter(|s| !s.is_empty()).map(|s| TaskId::new(s.clone()));
        let repository_id = observed
            .labels
            .get(labels::REPO_ID)
            .filter(|s| !s.is_empty())
            .map(|s| RepositoryId::new(s.clone()));
        let max_slots = observed
            .labels
            .get(labels::MAX_SLOTS)
            .and_then(|s| s.parse::<i64>().ok())
            .map(taskgw_core::clamp_slots)
            .unwrap_or(1);

        let mut entries = self.entries.lock();
        match entries.get_mut(&runtime_id) {
            Some(existing) => {
                existing.container_id = observed.container_id.clone();
                existing.container_name = observed.name.clone();
                existing.grpc_endpoint = grpc_endpoint;
                existing.proxy_endpoint = proxy_endpoint;
                existing.is_running = observed.is_running;
                existing.image_ref = taskgw_core::ImageRef::new(observed.image.clone());
                existing.image_digest = observed.image_digest.clone();
                if max_slots > 0 {
                    existing.max_slots = max_slots.max(existing.active_slots);
                }
                if !existing.is_draining {
                    existing.lifecycle_state = if observed.is_running {
                        if existing.active_slots > 0 { LifecycleState::Busy } else { LifecycleState::Ready }
                    } else {
                        LifecycleState::Stopped
                    };
                }
                existing.clone()
            }
            None => {
                let entry = RuntimeEntry {
                    runtime_id: runtime_id.clone(),
                    container_id: observed.container_id.clone(),
                    container_name: observed.name.clone(),
                    task_id,
                    repository_id,
                    grpc_endpoint,
                    proxy_endpoint,
                    active_slots: 0,
                    max_slots,
                    dispatch_count: 0,
                    lifecycle_state: if observed.is_running {
                        LifecycleState::Ready
                    } else {
                        LifecycleState::Stopped
                    },
                    is_running: observed.is_running,
                    is_draining: false,
                    draining_since: None,
                    started_at: now,
                    last_activity_at: now,
                    last_pressure_sample_at: None,
                    cpu_percent: 0.0,
                    memory_percent: 0.0,
                    image_ref: taskgw_core::ImageRef::new(observed.image.clone()),
                    image_digest: observed.image_digest.clone(),
                    image_source: ImageSource::Local,
                    last_error: None,
                };
                entries.insert(runtime_id, entry.clone());
                entry
            }
        }
    }

    /// Insert a freshly spawned entry outright (no merge): used right after
    /// `create_and_start` succeeds, before the first refresh observes it.
    pub fn insert(&self, entry: RuntimeEntry) {
        self.entries.lock().insert(entry.runtime_id.clone(), entry);
    }

    pub fn apply_heartbeat(&self, id: &RuntimeId, active: i64, max: u32, now: Instant) -> Option<RuntimeEntry> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(id)?;
        entry.apply_heartbeat(active, max, now);
        Some(entry.clone())
    }

    pub fn set_draining(&self, id: &RuntimeId, draining: bool, now: Instant) -> Option<RuntimeEntry> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(id)?;
        entry.set_draining(draining, now);
        Some(entry.clone())
    }

    pub fn record_dispatch_activity(&self, id: &RuntimeId, now: Instant) -> Option<RuntimeEntry> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(id)?;
        entry.record_dispatch_activity(now);
        Some(entry.clone())
    }

    pub fn release_slot(&self, id: &RuntimeId, now: Instant) -> Option<RuntimeEntry> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(id)?;
        entry.release_slot(now);
        Some(entry.clone())
    }

    pub fn mutate(&self, id: &RuntimeId, f: impl FnOnce(&mut RuntimeEntry)) -> Option<RuntimeEntry> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(id)?;
        f(entry);
        Some(entry.clone())
    }

    pub fn running_count(&self) -> usize {
        self.entries.lock().values().filter(|e| e.is_running).count()
    }

    /// The running, non-draining entry already bound to `task_id`, if any
    /// (§4.3.2 step 2). Ties break on oldest `last_activity_at`.
    pub fn find_bound_to_task(&self, task_id: &TaskId) -> Option<RuntimeEntry> {
        self.entries
            .lock()
            .values()
            .filter(|e| e.is_running && !e.is_draining && e.is_bound_to(task_id))
            .min_by_key(|e| e.last_activity_at)
            .cloned()
    }

    /// Remove every entry absent from `observed_ids`; returns the removed
    /// entries so the caller can persist a final Inactive state (§4.3.1 step 6).
    pub fn remove_missing(&self, observed_ids: &[RuntimeId]) -> Vec<RuntimeEntry> {
        let mut entries = self.entries.lock();
        let to_remove: Vec<RuntimeId> =
            entries.keys().filter(|id| !observed_ids.contains(id)).cloned().collect();
        to_remove.iter().filter_map(|id| entries.shift_remove(id)).collect()
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
