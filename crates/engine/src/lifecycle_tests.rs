use super::*;
use taskgw_adapters::{FakeContainerEngine, InMemoryLeaseCoordinator, InMemoryStore};
use taskgw_core::{FakeClock, RepositoryId, TaskId};

fn manager_with(
    settings: RuntimeSettings,
) -> (LifecycleManager<FakeClock>, Arc<FakeContainerEngine>, Arc<InMemoryStore>) {
    let engine = Arc::new(FakeContainerEngine::new());
    engine.seed_local_image(&settings.base_image);
    let lease = Arc::new(InMemoryLeaseCoordinator::new());
    let store = Arc::new(InMemoryStore::new());
    let clock = FakeClock::new();
    let manager = LifecycleManager::new(engine.clone(), lease, store.clone(), clock, Arc::new(settings));
    (manager, engine, store)
}

#[tokio::test]
async fn spawn_creates_and_registers_a_ready_runtime() {
    let (manager, _engine, _store) = manager_with(RuntimeSettings::default());
    let task_id = TaskId::new("task-1");
    let repo_id = RepositoryId::new("repo-1");

    let entry = manager.spawn(&repo_id, &task_id, 1).await.unwrap();
    assert_eq!(entry.lifecycle_state, LifecycleState::Ready);
    assert!(entry.is_running);
    assert_eq!(entry.task_id, Some(task_id));
}

#[tokio::test]
async fn acquire_for_dispatch_reuses_the_runtime_already_bound_to_a_task() {
    let (manager, _engine, _store) = manager_with(RuntimeSettings::default());
    let task_id = TaskId::new("task-1");
    let repo_id = RepositoryId::new("repo-1");

    let first = manager.acquire_for_dispatch(&repo_id, &task_id, 1).await.unwrap().unwrap();
    let second = manager.acquire_for_dispatch(&repo_id, &task_id, 1).await.unwrap().unwrap();

    assert_eq!(first.runtime_id, second.runtime_id);
    assert_eq!(second.active_slots, 2);
    assert_eq!(second.dispatch_count, 2);
}

#[tokio::test]
async fn acquire_for_dispatch_returns_none_once_max_workers_is_reached() {
    let mut settings = RuntimeSettings::default();
    settings.max_workers = 1;
    let (manager, _engine, _store) = manager_with(settings);

    let repo_id = RepositoryId::new("repo-1");
    manager.acquire_for_dispatch(&repo_id, &TaskId::new("task-1"), 1).await.unwrap().unwrap();

    let second = manager.acquire_for_dispatch(&repo_id, &TaskId::new("task-2"), 1).await.unwrap();
    assert!(second.is_none());
}

#[tokio::test]
async fn spawn_is_denied_once_the_start_attempt_budget_is_exhausted() {
    let mut settings = RuntimeSettings::default();
    settings.max_start_attempts_per_10_min = 1;
    let (manager, _engine, _store) = manager_with(settings);

    manager.spawn(&RepositoryId::new("repo-1"), &TaskId::new("task-1"), 1).await.unwrap();
    let err = manager.spawn(&RepositoryId::new("repo-1"), &TaskId::new("task-2"), 1).await.unwrap_err();
    assert!(matches!(err, LifecycleError::BudgetDenied(_)));
}

#[tokio::test]
async fn spawn_clamps_requested_slots_into_the_allowed_range() {
    let (manager, _engine, _store) = manager_with(RuntimeSettings::default());
    let entry = manager.spawn(&RepositoryId::new("repo-1"), &TaskId::new("task-1"), 200).await.unwrap();
    assert_eq!(entry.max_slots, taskgw_core::MAX_SLOTS);

    let entry = manager.spawn(&RepositoryId::new("repo-2"), &TaskId::new("task-2"), 0).await.unwrap();
    assert_eq!(entry.max_slots, taskgw_core::MIN_SLOTS);
}

#[tokio::test]
async fn stop_removes_the_container_and_marks_the_entry_stopped() {
    let (manager, engine, _store) = manager_with(RuntimeSettings::default());
    let entry = manager.spawn(&RepositoryId::new("repo-1"), &TaskId::new("task-1"), 1).await.unwrap();

    manager.stop(&entry.runtime_id, false, LifecycleState::Stopped).await.unwrap();

    let stopped = manager.registry().get(&entry.runtime_id).unwrap();
    assert_eq!(stopped.lifecycle_state, LifecycleState::Stopped);
    assert!(!stopped.is_running);
    assert!(engine.list_containers(true).await.unwrap().is_empty());
}

#[tokio::test]
async fn recycle_pool_marks_every_running_entry_draining() {
    let (manager, _engine, _store) = manager_with(RuntimeSettings::default());
    manager.spawn(&RepositoryId::new("repo-1"), &TaskId::new("task-1"), 1).await.unwrap();
    manager.spawn(&RepositoryId::new("repo-1"), &TaskId::new("task-2"), 1).await.unwrap();

    manager.recycle_pool();

    for entry in manager.registry().list() {
        assert!(entry.is_draining);
        assert_eq!(entry.lifecycle_state, LifecycleState::Draining);
    }
}

#[tokio::test]
async fn scale_down_idle_stops_runtimes_past_the_idle_timeout() {
    let mut settings = RuntimeSettings::default();
    settings.idle_timeout = Duration::from_secs(60);
    let (manager, engine, _store) = manager_with(settings);
    let entry = manager.spawn(&RepositoryId::new("repo-1"), &TaskId::new("task-1"), 1).await.unwrap();

    manager.scale_down_idle().await.unwrap();
    assert!(manager.registry().get(&entry.runtime_id).unwrap().is_running, "not idle yet");

    manager.clock.advance(Duration::from_secs(3600));
    manager.scale_down_idle().await.unwrap();
    assert!(!manager.registry().get(&entry.runtime_id).unwrap().is_running);
    assert!(engine.list_containers(true).await.unwrap().is_empty());
}

#[tokio::test]
async fn reconcile_completes_without_error_against_an_empty_registry() {
    let (manager, _engine, _store) = manager_with(RuntimeSettings::default());
    manager.reconcile().await.unwrap();
}

#[tokio::test]
async fn reconciliation_loop_exits_promptly_on_cancellation() {
    let mut settings = RuntimeSettings::default();
    settings.health_probe_interval = Duration::from_secs(1);
    let (manager, _engine, _store) = manager_with(settings);
    let cancel = CancellationToken::new();
    cancel.cancel();

    tokio::time::timeout(Duration::from_millis(500), manager.run_reconciliation_loop(cancel))
        .await
        .expect("loop should exit immediately once already cancelled");
}

#[tokio::test]
async fn refresh_removes_entries_that_disappear_from_the_engine() {
    let (manager, engine, _store) = manager_with(RuntimeSettings::default());
    let entry = manager.spawn(&RepositoryId::new("repo-1"), &TaskId::new("task-1"), 1).await.unwrap();

    // Simulate the container vanishing out-of-band (e.g. removed by an operator).
    engine.remove(&entry.container_id).await.unwrap();
    manager.clock.advance(manager.settings.refresh_interval + Duration::from_secs(1));
    manager.refresh().await.unwrap();

    assert!(manager.registry().get(&entry.runtime_id).is_none());
}
