//! UI event publication, the fan-out target for everything the dispatcher
//! and event listener surface to interactive clients (§4.4.1, §4.4.4). This
//! crate only owns the trait boundary; a real transport (e.g. a websocket
//! hub) fans these out to connected UI clients.

use std::sync::Arc;
use taskgw_core::RunId;

/// One UI-facing event produced by the dispatcher or event listener.
#[derive(Debug, Clone)]
pub enum UiEvent {
    /// A run transitioned to a new coarse status.
    RunStatus { run_id: RunId, state: taskgw_core::RunState },
    /// A log line for a run: `chunk` for transient worker output, else the
    /// persisted event's `event_type` (§4.4.4).
    Log { run_id: RunId, level: String, message: String },
    /// A proxy route became reachable for a run.
    RouteAvailable { run_id: RunId, path: String },
    /// A worker reported its occupancy via heartbeat (§4.4.6).
    WorkerStatus { worker_id: String, status: String, active_slots: i64, max_slots: u32 },
}

/// Fan-out sink for UI events. Publication is best-effort: a dropped or
/// lagging subscriber must never block or fail the caller (§4.4.1, §4.4.4
/// both treat "publish" as fire-and-forget).
pub trait Publisher: Send + Sync + 'static {
    fn publish(&self, event: UiEvent);
}

/// In-memory publisher that records every event for assertions, grounded on
/// the donor's WAL-backed event bus used the same way in its own tests.
#[derive(Clone, Default)]
pub struct InMemoryPublisher {
    events: Arc<parking_lot::Mutex<Vec<UiEvent>>>,
}

impl InMemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<UiEvent> {
        self.events.lock().clone()
    }
}

impl Publisher for InMemoryPublisher {
    fn publish(&self, event: UiEvent) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
#[path = "publisher_tests.rs"]
mod tests;
