use super::*;
use taskgw_adapters::{FakeContainerEngine, InMemoryLeaseCoordinator, InMemoryPublisher, InMemoryStore};
use taskgw_core::FakeClock;
use taskgw_engine::RuntimeSettings;

fn manager() -> (Arc<InMemoryStore>, Arc<LifecycleManager<FakeClock>>) {
    let store = Arc::new(InMemoryStore::new());
    let engine = Arc::new(FakeContainerEngine::new());
    let runtime_settings = RuntimeSettings::default();
    engine.seed_local_image(&runtime_settings.base_image);
    let lease = Arc::new(InMemoryLeaseCoordinator::new());
    let clock = FakeClock::new();
    let lifecycle =
        Arc::new(LifecycleManager::new(engine, lease, store.clone(), clock, Arc::new(runtime_settings)));
    (store, lifecycle)
}

#[tokio::test]
async fn handle_worker_status_persists_heartbeat_and_publishes_to_the_ui() {
    let (store, lifecycle) = manager();
    let publisher = Arc::new(InMemoryPublisher::new());
    let runtime_id = RuntimeId::new("task-runtime-1");

    let status = WorkerStatus { worker_id: runtime_id.to_string(), status: "busy".to_string(), active_slots: 2, max_slots: 4 };
    handle_worker_status(&(store.clone() as Arc<dyn Store>), &lifecycle, &(publisher.clone() as Arc<dyn Publisher>), &runtime_id, "10.0.0.1:5201", status)
        .await
        .unwrap();

    assert_eq!(store.mark_stale_task_runtime_registrations_offline(std::time::Duration::from_secs(0)).await.unwrap(), 1);

    let events = publisher.events();
    assert_eq!(events.len(), 1);
    match &events[0] {
        UiEvent::WorkerStatus { worker_id, status, active_slots, max_slots } => {
            assert_eq!(worker_id, runtime_id.as_str());
            assert_eq!(status, "busy");
            assert_eq!(*active_slots, 2);
            assert_eq!(*max_slots, 4);
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn handle_worker_status_clamps_zero_max_slots_to_one() {
    let (store, lifecycle) = manager();
    let publisher = Arc::new(InMemoryPublisher::new());
    let runtime_id = RuntimeId::new("task-runtime-1");

    let status = WorkerStatus { worker_id: runtime_id.to_string(), status: "idle".to_string(), active_slots: 0, max_slots: 0 };
    handle_worker_status(&(store as Arc<dyn Store>), &lifecycle, &(publisher.clone() as Arc<dyn Publisher>), &runtime_id, "10.0.0.1:5201", status)
        .await
        .unwrap();

    match &publisher.events()[0] {
        UiEvent::WorkerStatus { max_slots, .. } => assert_eq!(*max_slots, 1),
        other => panic!("unexpected event: {other:?}"),
    }
}
