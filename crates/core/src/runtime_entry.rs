//! The runtime registry's record of a single managed task-runtime container.

use crate::ids::{ImageRef, RepositoryId, RuntimeId, TaskId};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Lifecycle state of a managed runtime container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleState {
    Provisioning,
    Starting,
    Ready,
    Busy,
    Draining,
    Stopping,
    Stopped,
    FailedStart,
    Quarantined,
}

impl LifecycleState {
    /// Coarse state this lifecycle state maps to in the store, per the
    /// state-machine mapping table.
    pub fn to_store_state(self) -> StoreRuntimeState {
        match self {
            LifecycleState::Provisioning | LifecycleState::Starting => StoreRuntimeState::Starting,
            LifecycleState::Ready => StoreRuntimeState::Ready,
            LifecycleState::Busy | LifecycleState::Draining => StoreRuntimeState::Busy,
            LifecycleState::Stopping => StoreRuntimeState::Stopping,
            LifecycleState::Stopped => StoreRuntimeState::Inactive,
            LifecycleState::Quarantined | LifecycleState::FailedStart => StoreRuntimeState::Failed,
        }
    }
}

/// Coarse runtime state as persisted to the store (§7 state-machine mapping).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreRuntimeState {
    Starting,
    Ready,
    Busy,
    Stopping,
    Inactive,
    Failed,
}

/// Where an image came from the last time it was resolved for this runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageSource {
    Local,
    LocalFallback,
    Peer,
    Pull,
    Build,
}

/// One managed container tracked by the runtime registry (C1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeEntry {
    pub runtime_id: RuntimeId,
    pub container_id: String,
    pub container_name: String,
    pub task_id: Option<TaskId>,
    pub repository_id: Option<RepositoryId>,

    pub grpc_endpoint: String,
    pub proxy_endpoint: String,

    pub active_slots: u32,
    pub max_slots: u32,
    pub dispatch_count: u64,

    pub lifecycle_state: LifecycleState,
    pub is_running: bool,
    pub is_draining: bool,
    #[serde(skip)]
    pub draining_since: Option<Instant>,

    #[serde(skip, default = "Instant::now")]
    pub started_at: Instant,
    #[serde(skip, default = "Instant::now")]
    pub last_activity_at: Instant,
    #[serde(skip)]
    pub last_pressure_sample_at: Option<Instant>,

    pub cpu_percent: f64,
    pub memory_percent: f64,

    pub image_ref: ImageRef,
    pub image_digest: Option<String>,
    pub image_source: ImageSource,

    pub last_error: Option<String>,
}

/// Bounds on how many execution slots a single runtime may be given.
pub const MIN_SLOTS: u32 = 1;
pub const MAX_SLOTS: u32 = 64;

/// Clamp a requested slot count into `[MIN_SLOTS, MAX_SLOTS]` (P9): zero and
/// negative values collapse to the minimum, oversized requests collapse to
/// the maximum.
pub fn clamp_slots(requested: i64) -> u32 {
    requested.max(MIN_SLOTS as i64).min(MAX_SLOTS as i64) as u32
}

impl RuntimeEntry {
    /// Whether this entry currently holds an exclusive claim on the given task.
    pub fn is_bound_to(&self, task_id: &TaskId) -> bool {
        self.task_id.as_ref() == Some(task_id)
    }

    /// Eligible to receive a new dispatch: running, not draining, and has a
    /// free slot.
    pub fn has_capacity(&self) -> bool {
        self.is_running && !self.is_draining && self.active_slots < self.max_slots
    }

    /// Record that a job was dispatched onto this runtime: bumps activity,
    /// increments the dispatch counter, marks the entry busy, and increments
    /// (clamped) occupancy. Mirrors §4.3.2 "recording dispatch activity".
    pub fn record_dispatch_activity(&mut self, now: Instant) {
        self.last_activity_at = now;
        self.dispatch_count += 1;
        self.lifecycle_state = LifecycleState::Busy;
        self.active_slots = (self.active_slots + 1).min(self.max_slots);
    }

    /// Release one dispatch slot without recycling the runtime (§4.4.4 step
    /// 7, non-`recycle_after_run` path): the inverse of
    /// `record_dispatch_activity`. Drops back to `Ready` once no slots remain
    /// unless the entry is already draining.
    pub fn release_slot(&mut self, now: Instant) {
        self.active_slots = self.active_slots.saturating_sub(1);
        self.last_activity_at = now;
        if self.active_slots == 0 {
            self.lifecycle_state = if self.is_draining { LifecycleState::Draining } else { LifecycleState::Ready };
        }
    }

    /// Apply a worker heartbeat (§4.1 `apply_heartbeat`): clamps
    /// `active_slots`, updates `max_slots` when positive, and recomputes the
    /// lifecycle state from occupancy/draining.
    pub fn apply_heartbeat(&mut self, active: i64, max: u32, now: Instant) {
        let active = active.max(0) as u32;
        let was_active = self.active_slots > 0;
        self.active_slots = active;
        if max > 0 {
            self.max_slots = max;
        }
        self.lifecycle_state = if active > 0 {
            LifecycleState::Busy
        } else if self.is_draining {
            LifecycleState::Draining
        } else {
            LifecycleState::Ready
        };
        if active > 0 || was_active {
            self.last_activity_at = now;
        }
    }

    /// Toggle draining (§4.3.5 `set_draining`). Restores `Ready`/`Busy` and
    /// clears `draining_since` to `None` ("epoch-zero") on the false
    /// transition, per P8.
    pub fn set_draining(&mut self, draining: bool, now: Instant) {
        self.is_draining = draining;
        if draining {
            self.draining_since = Some(now);
            self.lifecycle_state = LifecycleState::Draining;
        } else {
            self.draining_since = None;
            self.lifecycle_state =
                if self.active_slots > 0 { LifecycleState::Busy } else { LifecycleState::Ready };
        }
    }

    /// True once the invariants in §3 hold; used defensively in tests and
    /// debug assertions, never on the hot path.
    pub fn check_invariants(&self) -> Result<(), &'static str> {
        if self.active_slots > self.max_slots {
            return Err("active_slots exceeds max_slots");
        }
        if (self.lifecycle_state == LifecycleState::Stopped) != !self.is_running {
            return Err("lifecycle_state=Stopped must coincide with is_running=false");
        }
        if self.is_draining
            && !matches!(self.lifecycle_state, LifecycleState::Draining | LifecycleState::Stopping)
        {
            return Err("is_draining requires Draining or Stopping lifecycle state");
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "runtime_entry_tests.rs"]
mod tests;
