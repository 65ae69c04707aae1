#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! taskgw-daemon: the Run Dispatcher and Event Listener (C4). Wires the
//! lifecycle manager (C1-C3, `taskgw-engine`) and the adapter trait
//! boundaries (`taskgw-adapters`) into the admission, dispatch, retry, and
//! event-fan-out pipeline described in §4.4.

pub mod dispatch;
pub mod error;
pub mod events;
pub mod heartbeat;
pub mod listener;
pub mod retry;
pub mod settings;

pub use dispatch::Dispatcher;
pub use error::DispatchError;
pub use events::EventHandler;
pub use listener::EventListener;
pub use settings::DispatchSettings;

use std::sync::Arc;
use taskgw_adapters::{ProxyRouteRegistry, Publisher, Store, WorkerRpc};
use taskgw_core::{Clock, RunId};
use taskgw_engine::LifecycleManager;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// The assembled C4 runtime: dispatcher, event listener, and the background
/// tasks that drive them, bound to a shutdown token (§4.4).
pub struct Daemon<C: Clock> {
    pub dispatcher: Dispatcher<C>,
    pub event_handler: EventHandler<C>,
    pub listener: EventListener<C>,
    lifecycle: Arc<LifecycleManager<C>>,
    shutdown: CancellationToken,
}

impl<C: Clock> Daemon<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn Store>,
        lifecycle: Arc<LifecycleManager<C>>,
        rpc: Arc<dyn WorkerRpc>,
        proxy: Arc<dyn ProxyRouteRegistry>,
        publisher: Arc<dyn Publisher>,
        clock: C,
        settings: Arc<DispatchSettings>,
        shutdown: CancellationToken,
    ) -> Self {
        let dispatcher =
            Dispatcher::new(store.clone(), lifecycle.clone(), rpc.clone(), proxy.clone(), publisher.clone(), clock, settings.clone());
        let event_handler = EventHandler::new(
            store.clone(),
            lifecycle.clone(),
            proxy,
            publisher,
            dispatcher.clone(),
            settings.clone(),
            shutdown.clone(),
        );
        let listener = EventListener::new(lifecycle.clone(), rpc, store, event_handler.clone(), settings);
        Self { dispatcher, event_handler, listener, lifecycle, shutdown }
    }

    /// Spawn the background loops this daemon owns: C3's reconciliation
    /// loop and C4's event-hub discovery loop. Both exit once `shutdown` is
    /// cancelled.
    #[instrument(skip(self))]
    pub fn spawn_background_loops(&self) {
        let lifecycle = self.lifecycle.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move { lifecycle.run_reconciliation_loop(shutdown).await });

        let listener = self.listener.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move { listener.run(shutdown).await });
    }

    /// Dispatch every currently-queued run once (called on a poll tick by
    /// whatever drives admission in this deployment; §4.4.1 describes
    /// dispatch per-run, not a queue-drain loop of its own).
    pub async fn dispatch(&self, run_id: &RunId) -> Result<bool, DispatchError> {
        self.dispatcher.dispatch(run_id).await
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
