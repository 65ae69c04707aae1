//! Event Listener connection management (C4, §4.4.3): discovers running
//! runtimes from C3 every `discovery_interval`, keeps one subscription loop
//! per runtime alive with exponential reconnect backoff, and tears down
//! loops for runtimes that stopped running or moved endpoints. Grounded on
//! the donor's `ws.rs::event_bridge` reconnect loop and the
//! `RemoteCoopClient` registry-of-handles pattern in `remote.rs`.

use crate::events::EventHandler;
use crate::heartbeat::handle_worker_status;
use crate::settings::DispatchSettings;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use taskgw_adapters::{HubMessage, Store, WorkerRpc};
use taskgw_core::{Clock, RuntimeId};
use taskgw_engine::LifecycleManager;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

struct Connection {
    endpoint: String,
    cancel: CancellationToken,
}

/// Owns the live set of per-runtime event-hub subscriptions.
pub struct EventListener<C: Clock> {
    lifecycle: Arc<LifecycleManager<C>>,
    rpc: Arc<dyn WorkerRpc>,
    store: Arc<dyn Store>,
    event_handler: EventHandler<C>,
    settings: Arc<DispatchSettings>,
    connections: Arc<Mutex<HashMap<RuntimeId, Connection>>>,
}

impl<C: Clock> Clone for EventListener<C> {
    fn clone(&self) -> Self {
        Self {
            lifecycle: self.lifecycle.clone(),
            rpc: self.rpc.clone(),
            store: self.store.clone(),
            event_handler: self.event_handler.clone(),
            settings: self.settings.clone(),
            connections: self.connections.clone(),
        }
    }
}

impl<C: Clock> EventListener<C> {
    pub fn new(
        lifecycle: Arc<LifecycleManager<C>>,
        rpc: Arc<dyn WorkerRpc>,
        store: Arc<dyn Store>,
        event_handler: EventHandler<C>,
        settings: Arc<DispatchSettings>,
    ) -> Self {
        Self { lifecycle, rpc, store, event_handler, settings, connections: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// How many runtimes currently have a live subscription loop. Exposed
    /// for tests and diagnostics.
    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    /// Run the discovery loop until `cancel` fires (§4.4.3 step 1).
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.settings.discovery_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => self.reconcile_connections(&cancel),
            }
        }
    }

    /// Start/stop per-runtime subscription loops so they match the set of
    /// currently-running runtimes (§4.4.3 step 2).
    #[instrument(skip(self, parent_cancel))]
    fn reconcile_connections(&self, parent_cancel: &CancellationToken) {
        let running: HashMap<RuntimeId, String> = self
            .lifecycle
            .registry()
            .list()
            .into_iter()
            .filter(|entry| entry.is_running)
            .map(|entry| (entry.runtime_id.clone(), entry.grpc_endpoint.clone()))
            .collect();

        let mut connections = self.connections.lock();

        let stale: Vec<RuntimeId> = connections
            .iter()
            .filter(|(id, conn)| running.get(*id).map(|endpoint| endpoint != &conn.endpoint).unwrap_or(true))
            .map(|(id, _)| id.clone())
            .collect();
        for id in stale {
            if let Some(conn) = connections.remove(&id) {
                conn.cancel.cancel();
                info!(runtime_id = %id, "stopped event subscription loop");
            }
        }

        for (id, endpoint) in running {
            if connections.contains_key(&id) {
                continue;
            }
            let cancel = parent_cancel.child_token();
            connections.insert(id.clone(), Connection { endpoint: endpoint.clone(), cancel: cancel.clone() });
            let this = self.clone();
            tokio::spawn(async move { this.run_connection_loop(id, endpoint, cancel).await });
        }
    }

    /// Subscribe-and-drain loop for a single runtime, reconnecting with
    /// exponential backoff (`reconnect_backoff_min` → `reconnect_backoff_max`,
    /// doubling, reset on a successful connect) until cancelled.
    #[instrument(skip(self, cancel), fields(runtime_id = %runtime_id))]
    async fn run_connection_loop(&self, runtime_id: RuntimeId, endpoint: String, cancel: CancellationToken) {
        let mut backoff = self.settings.reconnect_backoff_min;
        while !cancel.is_cancelled() {
            match self.rpc.subscribe(&endpoint).await {
                Ok(mut messages) => {
                    backoff = self.settings.reconnect_backoff_min;
                    loop {
                        let message = tokio::select! {
                            _ = cancel.cancelled() => return,
                            message = messages.recv() => message,
                        };
                        match message {
                            Some(HubMessage::Job(event)) => {
                                if let Err(err) = self.event_handler.handle_job_event(&runtime_id, event).await {
                                    warn!(error = %err, "failed to handle job event");
                                }
                            }
                            Some(HubMessage::Status(status)) => {
                                if let Err(err) =
                                    handle_worker_status(&self.store, &self.lifecycle, self.event_handler.publisher(), &runtime_id, &endpoint, status)
                                        .await
                                {
                                    warn!(error = %err, "failed to handle worker status");
                                }
                            }
                            None => break,
                        }
                        let _ = self.store.mark_stale_task_runtime_registrations_offline(self.settings.stale_registration_ttl).await;
                    }
                }
                Err(err) => {
                    warn!(error = %err, backoff_secs = backoff.as_secs(), "event hub subscribe failed, retrying");
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(self.settings.reconnect_backoff_max);
        }
    }
}

#[cfg(test)]
#[path = "listener_tests.rs"]
mod tests;
