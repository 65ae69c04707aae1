//! Worker heartbeat handling (§4.4.6): a `WorkerStatus` pushed over the
//! event hub updates both the store's registration bookkeeping and C3's
//! in-memory occupancy, then fans out to the UI.

use crate::error::DispatchError;
use std::sync::Arc;
use taskgw_adapters::{Publisher, Store, UiEvent, WorkerStatus};
use taskgw_core::{Clock, RuntimeId};
use taskgw_engine::LifecycleManager;
use tracing::instrument;

#[instrument(skip(store, lifecycle, publisher, status))]
pub async fn handle_worker_status<C: Clock>(
    store: &Arc<dyn Store>,
    lifecycle: &Arc<LifecycleManager<C>>,
    publisher: &Arc<dyn Publisher>,
    runtime_id: &RuntimeId,
    endpoint: &str,
    status: WorkerStatus,
) -> Result<(), DispatchError> {
    let max_slots = status.max_slots.max(1);

    store
        .upsert_task_runtime_registration_heartbeat(
            runtime_id.as_str(),
            endpoint,
            status.active_slots.max(0) as u32,
            max_slots,
        )
        .await?;

    lifecycle.apply_heartbeat(runtime_id, status.active_slots, max_slots);

    publisher.publish(UiEvent::WorkerStatus {
        worker_id: runtime_id.to_string(),
        status: status.status,
        active_slots: status.active_slots,
        max_slots,
    });

    Ok(())
}

#[cfg(test)]
#[path = "heartbeat_tests.rs"]
mod tests;
