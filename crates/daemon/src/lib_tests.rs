use super::*;
use taskgw_adapters::{
    FakeContainerEngine, FakeWorkerRpc, InMemoryLeaseCoordinator, InMemoryProxyRouteRegistry, InMemoryPublisher,
    InMemoryStore, TaskRecord,
};
use taskgw_core::{FakeClock, ProjectId, RepositoryId, RunState, TaskId};
use taskgw_engine::RuntimeSettings;

#[tokio::test]
async fn a_queued_run_dispatches_end_to_end_through_the_assembled_daemon() {
    let store = Arc::new(InMemoryStore::new());
    store.seed_task(TaskRecord {
        task_id: TaskId::new("task-1"),
        repository_id: RepositoryId::new("repo-1"),
        project_id: ProjectId::new("project-1"),
        require_approval: false,
        concurrency_limit: 0,
        max_attempts: 1,
        retry_base_seconds: 0,
        retry_multiplier: 2.0,
        execution_timeout: std::time::Duration::from_secs(600),
    });

    let engine = Arc::new(FakeContainerEngine::new());
    let runtime_settings = RuntimeSettings::default();
    engine.seed_local_image(&runtime_settings.base_image);
    let lease = Arc::new(InMemoryLeaseCoordinator::new());
    let clock = FakeClock::new();
    let lifecycle =
        Arc::new(LifecycleManager::new(engine, lease, store.clone(), clock.clone(), Arc::new(runtime_settings)));

    let daemon = Daemon::new(
        store.clone(),
        lifecycle,
        Arc::new(FakeWorkerRpc::new()),
        Arc::new(InMemoryProxyRouteRegistry::new()),
        Arc::new(InMemoryPublisher::new()),
        clock,
        Arc::new(DispatchSettings::default()),
        CancellationToken::new(),
    );

    let run = store.create_run(&TaskId::new("task-1"), &ProjectId::new("project-1"), &RepositoryId::new("repo-1"), 1).await.unwrap();
    let dispatched = daemon.dispatch(&run.run_id).await.unwrap();
    assert!(dispatched);

    let run = store.get_run(&run.run_id).await.unwrap();
    assert_eq!(run.state, RunState::Running);

    daemon.shutdown();
}
