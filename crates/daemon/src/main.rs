//! Binary entrypoint for the task runtime orchestrator's C4 daemon.
//!
//! This wires the reference single-process adapters (`InMemoryStore`,
//! `FakeContainerEngine`, ...) from `taskgw-adapters`. A production
//! deployment swaps each trait boundary (§6) for a real backend — a
//! database-backed `Store`, a Docker-CLI `ContainerEngine`, a gRPC
//! `WorkerRpc`, a websocket-backed `ProxyRouteRegistry` — without touching
//! this crate's dispatch/retry/event logic.

use std::sync::Arc;
use taskgw_adapters::{
    FakeContainerEngine, FakeWorkerRpc, InMemoryLeaseCoordinator, InMemoryProxyRouteRegistry, InMemoryPublisher,
    InMemoryStore,
};
use taskgw_core::SystemClock;
use taskgw_daemon::{Daemon, DispatchSettings};
use taskgw_engine::{LifecycleManager, RuntimeSettings};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let runtime_settings = Arc::new(RuntimeSettings::from_env());
    let dispatch_settings = Arc::new(DispatchSettings::from_env());

    let store = Arc::new(InMemoryStore::new());
    let engine = Arc::new(FakeContainerEngine::new());
    let lease = Arc::new(InMemoryLeaseCoordinator::new());
    let rpc = Arc::new(FakeWorkerRpc::new());
    let proxy = Arc::new(InMemoryProxyRouteRegistry::new());
    let publisher = Arc::new(InMemoryPublisher::new());
    let clock = SystemClock;

    let lifecycle = Arc::new(LifecycleManager::new(engine, lease, store.clone(), clock.clone(), runtime_settings));

    let shutdown = CancellationToken::new();
    let daemon = Daemon::new(store, lifecycle, rpc, proxy, publisher, clock, dispatch_settings, shutdown.clone());
    daemon.spawn_background_loops();

    tracing::info!("task runtime orchestrator daemon started");

    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("received shutdown signal"),
        Err(err) => tracing::warn!(error = %err, "failed to listen for shutdown signal"),
    }
    shutdown.cancel();
}
