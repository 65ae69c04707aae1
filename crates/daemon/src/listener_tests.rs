use super::*;
use crate::dispatch::Dispatcher;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use taskgw_adapters::{
    FakeContainerEngine, FakeWorkerRpc, InMemoryLeaseCoordinator, InMemoryProxyRouteRegistry, InMemoryPublisher,
    InMemoryStore, JobEvent,
};
use taskgw_core::{FakeClock, ImageRef, ImageSource, LifecycleState, RunId, RuntimeEntry};
use taskgw_engine::RuntimeSettings;

fn running_entry(runtime_id: &str, grpc_endpoint: &str) -> RuntimeEntry {
    let now = Instant::now();
    RuntimeEntry {
        runtime_id: RuntimeId::new(runtime_id),
        container_id: "c1".to_string(),
        container_name: runtime_id.to_string(),
        task_id: None,
        repository_id: None,
        grpc_endpoint: grpc_endpoint.to_string(),
        proxy_endpoint: format!("http://{grpc_endpoint}"),
        active_slots: 0,
        max_slots: 4,
        dispatch_count: 0,
        lifecycle_state: LifecycleState::Ready,
        is_running: true,
        is_draining: false,
        draining_since: None,
        started_at: now,
        last_activity_at: now,
        last_pressure_sample_at: None,
        cpu_percent: 0.0,
        memory_percent: 0.0,
        image_ref: ImageRef::new("worker:latest"),
        image_digest: None,
        image_source: ImageSource::Local,
        last_error: None,
    }
}

fn settings() -> Arc<DispatchSettings> {
    Arc::new(DispatchSettings {
        discovery_interval: Duration::from_millis(15),
        reconnect_backoff_min: Duration::from_millis(15),
        reconnect_backoff_max: Duration::from_millis(40),
        stale_registration_ttl: Duration::from_secs(120),
        ..DispatchSettings::default()
    })
}

struct Harness {
    store: Arc<InMemoryStore>,
    lifecycle: Arc<LifecycleManager<FakeClock>>,
    rpc: Arc<FakeWorkerRpc>,
    listener: EventListener<FakeClock>,
}

fn harness() -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let engine = Arc::new(FakeContainerEngine::new());
    let runtime_settings = RuntimeSettings::default();
    engine.seed_local_image(&runtime_settings.base_image);
    let lease = Arc::new(InMemoryLeaseCoordinator::new());
    let clock = FakeClock::new();
    let lifecycle =
        Arc::new(LifecycleManager::new(engine, lease, store.clone(), clock.clone(), Arc::new(runtime_settings)));
    let rpc = Arc::new(FakeWorkerRpc::new());
    let proxy = Arc::new(InMemoryProxyRouteRegistry::new());
    let publisher = Arc::new(InMemoryPublisher::new());
    let settings = settings();
    let dispatcher = Dispatcher::new(
        store.clone(),
        lifecycle.clone(),
        rpc.clone(),
        proxy.clone(),
        publisher.clone(),
        clock,
        settings.clone(),
    );
    let event_handler =
        EventHandler::new(store.clone(), lifecycle.clone(), proxy, publisher, dispatcher, settings.clone(), CancellationToken::new());
    let listener = EventListener::new(lifecycle.clone(), rpc.clone(), store.clone(), event_handler, settings);
    Harness { store, lifecycle, rpc, listener }
}

#[tokio::test]
async fn discovery_opens_a_subscription_and_drains_a_job_event() {
    let h = harness();
    h.lifecycle.registry().insert(running_entry("task-runtime-1", "10.0.0.1:5201"));
    h.rpc.set_reachable("10.0.0.1:5201", true);
    h.rpc.queue_message(
        "10.0.0.1:5201",
        HubMessage::Job(JobEvent {
            run_id: "run-1".to_string(),
            event_type: "step_started".to_string(),
            summary: Some("cloning".to_string()),
            error: None,
            timestamp_ms: 0,
            metadata: HashMap::new(),
        }),
    );

    let cancel = CancellationToken::new();
    let listener = h.listener.clone();
    let run_cancel = cancel.clone();
    let handle = tokio::spawn(async move { listener.run(run_cancel).await });

    let deadline = Instant::now() + Duration::from_millis(500);
    loop {
        let logs = h.store.list_run_logs(&RunId::new("run-1")).await.unwrap();
        if !logs.is_empty() {
            break;
        }
        assert!(Instant::now() < deadline, "job event was never drained");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(h.listener.connection_count(), 1);

    cancel.cancel();
    handle.abort();
}

#[tokio::test]
async fn a_runtime_that_stops_running_loses_its_subscription() {
    let h = harness();
    h.lifecycle.registry().insert(running_entry("task-runtime-1", "10.0.0.1:5201"));
    h.rpc.set_reachable("10.0.0.1:5201", true);

    let cancel = CancellationToken::new();
    let listener = h.listener.clone();
    let run_cancel = cancel.clone();
    let handle = tokio::spawn(async move { listener.run(run_cancel).await });

    let deadline = Instant::now() + Duration::from_millis(500);
    while h.listener.connection_count() == 0 {
        assert!(Instant::now() < deadline, "listener never opened a connection");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    h.lifecycle.registry().mutate(&RuntimeId::new("task-runtime-1"), |entry| entry.is_running = false);

    let deadline = Instant::now() + Duration::from_millis(500);
    while h.listener.connection_count() != 0 {
        assert!(Instant::now() < deadline, "listener never tore down the stopped runtime's connection");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    cancel.cancel();
    handle.abort();
}
