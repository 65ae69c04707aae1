use super::*;
use taskgw_adapters::{FakeContainerEngine, InMemoryLeaseCoordinator, StatsSample};
use taskgw_core::FakeClock;
use yare::parameterized;

fn request(image: &str, policy: ImagePolicy) -> ResolveRequest {
    ResolveRequest {
        image: image.to_string(),
        policy,
        force_refresh: false,
        build_context: ".".to_string(),
        pull_timeout: Duration::from_secs(5),
        build_timeout: Duration::from_secs(5),
    }
}

#[tokio::test]
async fn returns_local_when_already_present() {
    let resolver = ImageResolver::new();
    let engine = FakeContainerEngine::new();
    engine.seed_local_image("task-runtime:1.0");
    let lease = InMemoryLeaseCoordinator::new();
    let budget = SyncMutex::new(ScaleOutBudget::new(&FakeClock::new()));
    let clock = FakeClock::new();

    let outcome = resolver
        .resolve(&engine, &lease, &budget, &clock, request("task-runtime:1.0", ImagePolicy::PreferLocal), Duration::from_secs(60), 3, 2)
        .await
        .unwrap();
    assert!(outcome.available);
    assert_eq!(outcome.source, ImageSource::Local);
}

#[tokio::test]
async fn pulls_when_absent_and_policy_allows_it() {
    let resolver = ImageResolver::new();
    let engine = FakeContainerEngine::new();
    let lease = InMemoryLeaseCoordinator::new();
    let budget = SyncMutex::new(ScaleOutBudget::new(&FakeClock::new()));
    let clock = FakeClock::new();

    let outcome = resolver
        .resolve(&engine, &lease, &budget, &clock, request("fresh:1.0", ImagePolicy::PullOnly), Duration::from_secs(60), 3, 2)
        .await
        .unwrap();
    assert_eq!(outcome.source, ImageSource::Pull);
    assert!(engine.image_exists_locally("fresh:1.0").await.unwrap());
}

#[tokio::test]
async fn sets_cooldown_on_failure_with_no_stale_copy() {
    let resolver = ImageResolver::new();
    let engine = FailingEngine::default();
    let lease = InMemoryLeaseCoordinator::new();
    let budget = SyncMutex::new(ScaleOutBudget::new(&FakeClock::new()));
    let clock = FakeClock::new();

    let err = resolver
        .resolve(&engine, &lease, &budget, &clock, request("broken:1.0", ImagePolicy::PullOnly), Duration::from_secs(60), 3, 2)
        .await
        .unwrap_err();
    assert!(matches!(err, ImageError::Engine(_)));

    let err2 = resolver
        .resolve(&engine, &lease, &budget, &clock, request("broken:1.0", ImagePolicy::PullOnly), Duration::from_secs(60), 3, 2)
        .await
        .unwrap_err();
    assert!(matches!(err2, ImageError::CooldownActive));
}

#[tokio::test]
async fn parses_pull_progress_line() {
    assert_eq!(parse_pull_progress("12MB / 100MB"), Some(12));
    assert_eq!(parse_pull_progress("not a progress line"), None);
}

#[tokio::test]
async fn parses_build_progress_step_markers_and_percent() {
    assert_eq!(parse_build_progress("[2/10] running tests"), Some(20));
    assert_eq!(parse_build_progress("Step 3 (33%) done"), Some(33));
}

#[parameterized(
    pull_only = { ImagePolicy::PullOnly, ImageSource::Pull },
    build_only = { ImagePolicy::BuildOnly, ImageSource::Build },
    pull_then_build = { ImagePolicy::PullThenBuild, ImageSource::Build },
    build_then_pull = { ImagePolicy::BuildThenPull, ImageSource::Build },
)]
fn resolve_tries_sources_in_policy_order(policy: ImagePolicy, expected_source: ImageSource) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let resolver = ImageResolver::new();
        let engine = PullFailsBuildSucceedsEngine::default();
        let lease = InMemoryLeaseCoordinator::new();
        let budget = SyncMutex::new(ScaleOutBudget::new(&FakeClock::new()));
        let clock = FakeClock::new();

        let outcome = resolver
            .resolve(&engine, &lease, &budget, &clock, request("policy-order:1.0", policy), Duration::from_secs(60), 3, 2)
            .await
            .unwrap();
        assert_eq!(outcome.source, expected_source);
    });
}

/// An engine where `pull_image` always fails and `build_image` always
/// succeeds, used to prove which source a resolution policy tries first.
#[derive(Clone, Default)]
struct PullFailsBuildSucceedsEngine {
    inner: FakeContainerEngine,
}

#[async_trait::async_trait]
impl ContainerEngine for PullFailsBuildSucceedsEngine {
    async fn list_containers(&self, include_stopped: bool) -> Result<Vec<taskgw_adapters::ObservedContainer>, taskgw_adapters::EngineError> {
        self.inner.list_containers(include_stopped).await
    }
    async fn image_exists_locally(&self, image: &str) -> Result<bool, taskgw_adapters::EngineError> {
        self.inner.image_exists_locally(image).await
    }
    async fn pull_image(
        &self,
        image: &str,
        _timeout: Duration,
        _progress: Option<&(dyn Fn(Progress) + Send + Sync)>,
    ) -> Result<(), taskgw_adapters::EngineError> {
        Err(taskgw_adapters::EngineError::CommandFailed(format!("pull failed for {image}")))
    }
    async fn build_image(
        &self,
        image: &str,
        _context: &str,
        _timeout: Duration,
        _progress: Option<&(dyn Fn(Progress) + Send + Sync)>,
    ) -> Result<(), taskgw_adapters::EngineError> {
        self.inner.seed_local_image(image);
        Ok(())
    }
    async fn ensure_network(&self, name: &str) -> Result<(), taskgw_adapters::EngineError> {
        self.inner.ensure_network(name).await
    }
    async fn create_and_start(&self, params: taskgw_adapters::CreateContainerParams) -> Result<String, taskgw_adapters::EngineError> {
        self.inner.create_and_start(params).await
    }
    async fn stop(&self, container_id: &str, force: bool, timeout: Duration) -> Result<(), taskgw_adapters::EngineError> {
        self.inner.stop(container_id, force, timeout).await
    }
    async fn remove(&self, container_id: &str) -> Result<(), taskgw_adapters::EngineError> {
        self.inner.remove(container_id).await
    }
    async fn stats(&self, container_id: &str) -> Result<StatsSample, taskgw_adapters::EngineError> {
        self.inner.stats(container_id).await
    }
}

#[derive(Clone, Default)]
struct FailingEngine {
    inner: FakeContainerEngine,
}

#[async_trait::async_trait]
impl ContainerEngine for FailingEngine {
    async fn list_containers(&self, include_stopped: bool) -> Result<Vec<taskgw_adapters::ObservedContainer>, taskgw_adapters::EngineError> {
        self.inner.list_containers(include_stopped).await
    }
    async fn image_exists_locally(&self, image: &str) -> Result<bool, taskgw_adapters::EngineError> {
        self.inner.image_exists_locally(image).await
    }
    async fn pull_image(
        &self,
        image: &str,
        _timeout: Duration,
        _progress: Option<&(dyn Fn(Progress) + Send + Sync)>,
    ) -> Result<(), taskgw_adapters::EngineError> {
        Err(taskgw_adapters::EngineError::CommandFailed(format!("pull failed for {image}")))
    }
    async fn build_image(
        &self,
        image: &str,
        _context: &str,
        _timeout: Duration,
        _progress: Option<&(dyn Fn(Progress) + Send + Sync)>,
    ) -> Result<(), taskgw_adapters::EngineError> {
        Err(taskgw_adapters::EngineError::CommandFailed(format!("build failed for {image}")))
    }
    async fn ensure_network(&self, name: &str) -> Result<(), taskgw_adapters::EngineError> {
        self.inner.ensure_network(name).await
    }
    async fn create_and_start(&self, params: taskgw_adapters::CreateContainerParams) -> Result<String, taskgw_adapters::EngineError> {
        self.inner.create_and_start(params).await
    }
    async fn stop(&self, container_id: &str, force: bool, timeout: Duration) -> Result<(), taskgw_adapters::EngineError> {
        self.inner.stop(container_id, force, timeout).await
    }
    async fn remove(&self, container_id: &str) -> Result<(), taskgw_adapters::EngineError> {
        self.inner.remove(container_id).await
    }
    async fn stats(&self, container_id: &str) -> Result<StatsSample, taskgw_adapters::EngineError> {
        self.inner.stats(container_id).await
    }
}
