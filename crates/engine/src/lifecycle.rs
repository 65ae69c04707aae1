//! Runtime Lifecycle Manager (C3): refreshes the registry from ground truth,
//! spawns/stops/drains/recycles runtimes, enforces scale-out budgets, and
//! samples pressure (§4.3).

use crate::error::LifecycleError;
use crate::image_resolver::{ImageResolver, ResolveRequest};
use crate::pressure;
use crate::registry::RuntimeRegistry;
use crate::settings::{ImagePolicy, RuntimeSettings};
use parking_lot::Mutex as SyncMutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use taskgw_adapters::{
    labels, ContainerEngine, CreateContainerParams, LeaseCoordinator, Store, TaskRuntimeStateUpdate, WORKER_PORT,
};
use taskgw_core::{clamp_slots, sanitise, Clock, LifecycleState, RepositoryId, RuntimeEntry, RuntimeId, ScaleOutBudget, TaskId};
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

pub struct LifecycleManager<C: Clock> {
    registry: RuntimeRegistry,
    image_resolver: ImageResolver,
    engine: Arc<dyn ContainerEngine>,
    lease: Arc<dyn LeaseCoordinator>,
    store: Arc<dyn Store>,
    clock: C,
    budget: Arc<SyncMutex<ScaleOutBudget>>,
    settings: Arc<RuntimeSettings>,
    last_refresh_at: Arc<SyncMutex<Option<Instant>>>,
    refresh_lock: Arc<AsyncMutex<()>>,
    spawn_lock: Arc<AsyncMutex<()>>,
}

impl<C: Clock> Clone for LifecycleManager<C> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            image_resolver: self.image_resolver.clone(),
            engine: self.engine.clone(),
            lease: self.lease.clone(),
            store: self.store.clone(),
            clock: self.clock.clone(),
            budget: self.budget.clone(),
            settings: self.settings.clone(),
            last_refresh_at: self.last_refresh_at.clone(),
            refresh_lock: self.refresh_lock.clone(),
            spawn_lock: self.spawn_lock.clone(),
        }
    }
}

impl<C: Clock> LifecycleManager<C> {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        lease: Arc<dyn LeaseCoordinator>,
        store: Arc<dyn Store>,
        clock: C,
        settings: Arc<RuntimeSettings>,
    ) -> Self {
        let budget = Arc::new(SyncMutex::new(ScaleOutBudget::new(&clock)));
        Self {
            registry: RuntimeRegistry::new(),
            image_resolver: ImageResolver::new(),
            engine,
            lease,
            store,
            clock,
            budget,
            settings,
            last_refresh_at: Arc::new(SyncMutex::new(None)),
            refresh_lock: Arc::new(AsyncMutex::new(())),
            spawn_lock: Arc::new(AsyncMutex::new(())),
        }
    }

    pub fn registry(&self) -> &RuntimeRegistry {
        &self.registry
    }

    /// Open Question (iii) decision: whether a completed run recycles its
    /// runtime outright or just releases its dispatch slot for reuse.
    pub fn recycle_after_run(&self) -> bool {
        self.settings.recycle_after_run
    }

    /// Refresh C1 from ground truth (§4.3.1). Debounced by
    /// `RefreshInterval`; serialised by a single lock (P7).
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> Result<(), LifecycleError> {
        let _guard = self.refresh_lock.lock().await;
        let now = self.clock.now();
        if let Some(last) = *self.last_refresh_at.lock() {
            if now.duration_since(last) < self.settings.refresh_interval {
                return Ok(());
            }
        }

        let containers = self.engine.list_containers(true).await?;
        let managed: Vec<_> = containers
            .into_iter()
            .filter(|c| is_managed(c, &self.settings.container_name_prefix))
            .collect();

        let mut observed_ids = Vec::with_capacity(managed.len());
        for container in &managed {
            let endpoint = self.endpoint_for(container);
            let entry = self.registry.upsert_from_container(container, endpoint.clone(), endpoint, now);
            observed_ids.push(entry.runtime_id.clone());

            if entry.is_running
                && entry
                    .last_pressure_sample_at
                    .map(|t| now.duration_since(t) >= self.settings.pressure_sample_window)
                    .unwrap_or(true)
            {
                if let Ok(sample) = self.engine.stats(&entry.container_id).await {
                    let (cpu, mem) = pressure::calculate(sample);
                    self.registry.mutate(&entry.runtime_id, |e| {
                        e.cpu_percent = cpu;
                        e.memory_percent = mem;
                        e.last_pressure_sample_at = Some(now);
                    });
                }
            }
        }

        let removed = self.registry.remove_missing(&observed_ids);
        for entry in removed {
            let _ = self
                .store
                .upsert_task_runtime_state(TaskRuntimeStateUpdate {
                    runtime_id: entry.runtime_id.into_string(),
                    task_id: entry.task_id,
                    repository_id: entry.repository_id,
                    state: taskgw_core::StoreRuntimeState::Inactive,
                    active_runs: 0,
                    max_runs: entry.max_slots,
                    endpoint: entry.grpc_endpoint,
                    container_id: entry.container_id,
                    update_last_activity: false,
                    inactive_after: None,
                    clear_inactive_after: true,
                    last_error: entry.last_error,
                })
                .await;
        }

        *self.last_refresh_at.lock() = Some(now);
        Ok(())
    }

    fn endpoint_for(&self, container: &taskgw_adapters::ObservedContainer) -> String {
        use taskgw_adapters::ConnectivityMode;
        match self.settings.connectivity_mode {
            ConnectivityMode::DockerDnsOnly => format!("http://{}:{WORKER_PORT}", container.name),
            ConnectivityMode::HostPortOnly => {
                format!("http://127.0.0.1:{}", container.host_port.unwrap_or(WORKER_PORT))
            }
            ConnectivityMode::AutoDetect => {
                if taskgw_adapters::running_inside_container() {
                    format!("http://{}:{WORKER_PORT}", container.name)
                } else {
                    format!("http://127.0.0.1:{}", container.host_port.unwrap_or(WORKER_PORT))
                }
            }
        }
    }

    /// Acquire-for-dispatch (§4.3.2).
    #[instrument(skip(self))]
    pub async fn acquire_for_dispatch(
        &self,
        repository_id: &RepositoryId,
        task_id: &TaskId,
        requested_slots: i64,
    ) -> Result<Option<RuntimeEntry>, LifecycleError> {
        self.refresh().await?;
        let now = self.clock.now();

        if let Some(entry) = self.registry.find_bound_to_task(task_id) {
            return Ok(self.registry.record_dispatch_activity(&entry.runtime_id, now));
        }

        if self.registry.running_count() >= self.settings.max_workers as usize {
            return Ok(None);
        }

        let entry = self.spawn(repository_id, task_id, requested_slots).await?;
        Ok(self.registry.record_dispatch_activity(&entry.runtime_id, now))
    }

    /// Spawn (§4.3.3).
    #[instrument(skip(self))]
    pub async fn spawn(
        &self,
        repository_id: &RepositoryId,
        task_id: &TaskId,
        requested_slots: i64,
    ) -> Result<RuntimeEntry, LifecycleError> {
        let max_slots = clamp_slots(requested_slots);
        let _guard = self.spawn_lock.lock().await;
        let scale_lease = self
            .lease
            .try_acquire("worker-scale", self.settings.worker_scale_lease_timeout())
            .await;
        if scale_lease.is_none() {
            return Err(LifecycleError::NoCapacity);
        }

        self.refresh().await?;
        if self.registry.running_count() >= self.settings.max_workers as usize {
            return Err(LifecycleError::NoCapacity);
        }
        if let Some(entry) = self.registry.find_bound_to_task(task_id) {
            return Ok(entry);
        }

        let now = self.clock.now();
        {
            let mut budget = self.budget.lock();
            if let Err(reason) = budget.check(
                now,
                self.settings.max_start_attempts_per_10_min,
                self.settings.max_failed_starts_per_10_min,
            ) {
                return Err(LifecycleError::BudgetDenied(reason));
            }
            budget.register_attempt(
                now,
                self.settings.max_start_attempts_per_10_min,
                self.settings.max_failed_starts_per_10_min,
                Duration::from_secs(self.settings.cooldown_minutes as u64 * 60),
            );
        }

        let (image, source_reason) = self.select_image(task_id);
        let resolved = self.resolve_image(&image).await;
        let (resolved, image, source_reason) = match resolved {
            Ok(outcome) => (outcome, image, source_reason),
            Err(_) if source_reason == "canary" => {
                let base = self.settings.base_image.clone();
                let fallback = self.resolve_image(&base).await;
                match fallback {
                    Ok(outcome) => (outcome, base, "canary-fallback"),
                    Err(err) => {
                        self.register_spawn_failure(now);
                        return Err(err.into());
                    }
                }
            }
            Err(err) => {
                self.register_spawn_failure(now);
                return Err(err.into());
            }
        };

        let runtime_id = RuntimeId::for_task(&self.settings.container_name_prefix, task_id);

        let mut runtime_labels = HashMap::new();
        runtime_labels.insert(labels::MANAGED_BY.to_string(), labels::MANAGED_BY_VALUE.to_string());
        runtime_labels.insert(labels::ROLE.to_string(), labels::ROLE_VALUE.to_string());
        runtime_labels.insert(labels::WORKER_ID.to_string(), runtime_id.to_string());
        runtime_labels.insert(labels::TASK_ID.to_string(), task_id.to_string());
        runtime_labels.insert(labels::REPO_ID.to_string(), repository_id.to_string());
        runtime_labels.insert(labels::MAX_SLOTS.to_string(), max_slots.to_string());

        self.engine.ensure_network(&self.settings.container_network).await?;

        let mut env: HashMap<String, String> = HashMap::new();
        let provider_secrets = self.store.list_provider_secrets(repository_id).await.unwrap_or_default();
        let (cred_env, _) = taskgw_adapters::credentials::fan_out(&provider_secrets);
        env.extend(cred_env);
        env.extend(self.settings.container_env_overlay());

        let token = sanitise(runtime_id.as_str());
        let engine_socket = format!("/var/run/{}.sock", self.settings.container_engine_name);
        let volumes = vec![
            (format!("worker-artifacts-{token}"), "/artifacts".to_string()),
            (format!("task-runtime-home-{token}"), "/home/agent".to_string()),
            ("agentsdashboard-workspaces".to_string(), "/workspaces".to_string()),
            (engine_socket.clone(), engine_socket),
        ];

        let publish_port = matches!(self.settings.connectivity_mode, taskgw_adapters::ConnectivityMode::HostPortOnly);
        let params = CreateContainerParams {
            name: runtime_id.to_string(),
            image: image.clone(),
            labels: runtime_labels,
            env,
            volumes,
            network: self.settings.container_network.clone(),
            publish_port,
            nano_cpus: taskgw_core::cpus_to_nanocpus(1.0),
            memory_bytes: taskgw_core::mib_to_bytes(1024),
            pids_limit: 512,
            nofile_ulimit: 4096,
        };

        let container_id = match self.engine.create_and_start(params.clone()).await {
            Ok(id) => id,
            Err(err) if err.is_name_conflict() => {
                // Reuse: fall through to wait-ready against the existing container.
                self.registry
                    .list()
                    .into_iter()
                    .find(|e| e.runtime_id == runtime_id)
                    .map(|e| e.container_id)
                    .unwrap_or_default()
            }
            Err(err) if err.is_missing_image() => {
                // §4.3.3 step 7: re-resolve the image once, then retry.
                if self.resolve_image(&image).await.is_err() {
                    self.mark_failed_start(&runtime_id, &err.to_string(), now);
                    self.register_spawn_failure(now);
                    return Err(err.into());
                }
                match self.engine.create_and_start(params.clone()).await {
                    Ok(id) => id,
                    Err(err) => {
                        self.mark_failed_start(&runtime_id, &err.to_string(), now);
                        self.register_spawn_failure(now);
                        return Err(err.into());
                    }
                }
            }
            Err(err) if err.is_network() => {
                // §4.3.3 step 7: retry once without the explicit network.
                let mut retry_params = params.clone();
                retry_params.network = String::new();
                match self.engine.create_and_start(retry_params).await {
                    Ok(id) => id,
                    Err(err) => {
                        self.mark_failed_start(&runtime_id, &err.to_string(), now);
                        self.register_spawn_failure(now);
                        return Err(err.into());
                    }
                }
            }
            Err(err) => {
                self.mark_failed_start(&runtime_id, &err.to_string(), now);
                self.register_spawn_failure(now);
                return Err(err.into());
            }
        };

        let endpoint = format!("http://{}:{WORKER_PORT}", runtime_id);
        let entry = RuntimeEntry {
            runtime_id: runtime_id.clone(),
            container_id,
            container_name: runtime_id.to_string(),
            task_id: Some(task_id.clone()),
            repository_id: Some(repository_id.clone()),
            grpc_endpoint: endpoint.clone(),
            proxy_endpoint: endpoint,
            active_slots: 0,
            max_slots,
            dispatch_count: 0,
            lifecycle_state: LifecycleState::Starting,
            is_running: true,
            is_draining: false,
            draining_since: None,
            started_at: now,
            last_activity_at: now,
            last_pressure_sample_at: None,
            cpu_percent: 0.0,
            memory_percent: 0.0,
            image_ref: taskgw_core::ImageRef::new(image),
            image_digest: None,
            image_source: resolved.source,
            last_error: None,
        };
        self.registry.insert(entry.clone());

        match self.wait_ready(&entry.runtime_id).await {
            Ok(ready) => {
                info!(runtime_id = %ready.runtime_id, source = ?source_reason, "runtime ready");
                Ok(ready)
            }
            Err(err) => {
                self.mark_failed_start(&entry.runtime_id, &err.to_string(), now);
                self.register_spawn_failure(now);
                Err(err)
            }
        }
    }

    fn register_spawn_failure(&self, now: Instant) {
        self.budget.lock().register_failure(
            now,
            self.settings.max_failed_starts_per_10_min,
            Duration::from_secs(self.settings.cooldown_minutes as u64 * 60),
        );
    }

    fn mark_failed_start(&self, id: &RuntimeId, error: &str, now: Instant) {
        self.registry.mutate(id, |e| {
            e.lifecycle_state = LifecycleState::FailedStart;
            e.is_running = false;
            e.last_error = Some(error.to_string());
            e.last_activity_at = now;
        });
    }

    /// Canary-vs-base image selection (§4.3.3 step 2).
    fn select_image(&self, _task_id: &TaskId) -> (String, &'static str) {
        let Some(canary) = self.settings.canary_image.clone() else {
            return (self.settings.base_image.clone(), "base");
        };
        if self.settings.canary_percent == 0 {
            return (self.settings.base_image.clone(), "base");
        }
        let entries = self.registry.list();
        let running = entries.iter().filter(|e| e.is_running).count();
        if running == 0 {
            return (canary, "canary");
        }
        let target_canary = ((running + 1) as f64 * self.settings.canary_percent as f64 / 100.0).ceil() as usize;
        let current_canary = entries.iter().filter(|e| e.is_running && e.image_ref.as_str() == canary).count();
        if current_canary < target_canary {
            (canary, "canary")
        } else {
            (self.settings.base_image.clone(), "base")
        }
    }

    async fn resolve_image(&self, image: &str) -> Result<crate::image_resolver::ResolveOutcome, crate::error::ImageError> {
        self.image_resolver
            .resolve(
                self.engine.as_ref(),
                self.lease.as_ref(),
                self.budget.as_ref(),
                &self.clock,
                ResolveRequest {
                    image: image.to_string(),
                    policy: ImagePolicy::PreferLocal,
                    force_refresh: false,
                    build_context: ".".to_string(),
                    pull_timeout: self.settings.pull_timeout,
                    build_timeout: self.settings.build_timeout,
                },
                Duration::from_secs(self.settings.cooldown_minutes as u64 * 60),
                self.settings.max_concurrent_pulls,
                self.settings.max_concurrent_builds,
            )
            .await
    }

    /// Wait-ready (§4.3.3 step 8): poll refresh + heartbeat probe until the
    /// container is running and answers, or `ContainerStartTimeout` elapses.
    async fn wait_ready(&self, id: &RuntimeId) -> Result<RuntimeEntry, LifecycleError> {
        let deadline = self.clock.now() + self.settings.container_start_timeout;
        let poll = self.settings.health_probe_interval.max(Duration::from_millis(300));
        loop {
            self.invalidate_refresh_debounce();
            self.refresh().await?;
            if let Some(entry) = self.registry.get(id) {
                if entry.is_running {
                    // heartbeat startup probe; errors just mean "not yet".
                    let ready = self.registry.mutate(id, |e| {
                        e.lifecycle_state = LifecycleState::Ready;
                    });
                    if let Some(entry) = ready {
                        return Ok(entry);
                    }
                }
            }
            if self.clock.now() >= deadline {
                return Err(LifecycleError::Engine(taskgw_adapters::EngineError::Timeout(
                    self.settings.container_start_timeout,
                )));
            }
            tokio::time::sleep(poll).await;
        }
    }

    fn invalidate_refresh_debounce(&self) {
        *self.last_refresh_at.lock() = None;
    }

    /// Set draining (§4.3.5).
    pub fn set_draining(&self, id: &RuntimeId, draining: bool) -> Option<RuntimeEntry> {
        self.registry.set_draining(id, draining, self.clock.now())
    }

    /// Stop (§4.3.5).
    pub async fn stop(&self, id: &RuntimeId, force: bool, final_state: LifecycleState) -> Result<(), LifecycleError> {
        let Some(entry) = self.registry.get(id) else {
            return Ok(());
        };
        self.registry.mutate(id, |e| e.lifecycle_state = LifecycleState::Stopping);

        if !force {
            if let Err(err) = self.engine.stop(&entry.container_id, false, self.settings.container_stop_timeout).await {
                if !err.is_benign_on_stop() {
                    warn!(runtime_id = %id, error = %err, "graceful stop failed, forcing removal");
                }
            }
        }
        if let Err(err) = self.engine.remove(&entry.container_id).await {
            if !err.is_benign_on_stop() {
                return Err(err.into());
            }
        }

        self.registry.mutate(id, |e| {
            e.lifecycle_state = final_state;
            e.is_running = false;
            e.active_slots = 0;
        });
        Ok(())
    }

    /// Recycle (§4.3.5).
    pub async fn recycle(&self, id: &RuntimeId) -> Result<(), LifecycleError> {
        self.set_draining(id, true);
        self.stop(id, true, LifecycleState::Stopped).await
    }

    /// Recycle pool: drain every running entry.
    pub fn recycle_pool(&self) {
        for entry in self.registry.list() {
            if entry.is_running {
                self.set_draining(&entry.runtime_id, true);
            }
        }
    }

    /// Scale-down idle sweep (§4.3.5).
    pub async fn scale_down_idle(&self) -> Result<(), LifecycleError> {
        let now = self.clock.now();
        let entries = self.registry.list();
        for entry in entries {
            if !entry.is_running {
                continue;
            }
            let idle_expired = entry.active_slots == 0
                && now.duration_since(entry.last_activity_at) >= self.settings.idle_timeout;
            let drain_idle = entry.is_draining && entry.active_slots == 0;
            let drain_expired =
                entry.is_draining && now.duration_since(entry.last_activity_at) >= self.settings.drain_timeout;

            if idle_expired || drain_idle {
                self.stop(&entry.runtime_id, false, LifecycleState::Stopped).await?;
            } else if drain_expired {
                self.stop(&entry.runtime_id, true, LifecycleState::Stopped).await?;
            }
        }
        Ok(())
    }

    /// Reconciliation tick (§4.3.7), meant to be called every 30s under a
    /// `worker-reconciler` lease by the caller.
    pub async fn reconcile(&self) -> Result<(), LifecycleError> {
        let lease = self.lease.try_acquire("worker-reconciler", Duration::from_secs(30)).await;
        let Some(_lease) = lease else {
            return Ok(());
        };
        for entry in self.registry.list() {
            if !entry.is_running {
                continue;
            }
            let _ = self
                .store
                .upsert_task_runtime_registration_heartbeat(
                    entry.runtime_id.as_str(),
                    &entry.grpc_endpoint,
                    entry.active_slots,
                    entry.max_slots,
                )
                .await;
            let _ = self
                .store
                .upsert_task_runtime_state(TaskRuntimeStateUpdate {
                    runtime_id: entry.runtime_id.into_string(),
                    task_id: entry.task_id,
                    repository_id: entry.repository_id,
                    state: entry.lifecycle_state.to_store_state(),
                    active_runs: entry.active_slots,
                    max_runs: entry.max_slots,
                    endpoint: entry.grpc_endpoint,
                    container_id: entry.container_id,
                    update_last_activity: false,
                    inactive_after: Some(
                        self.clock.now() + Duration::from_secs(self.settings.inactive_timeout_minutes as u64 * 60),
                    ),
                    clear_inactive_after: false,
                    last_error: entry.last_error,
                })
                .await;
        }
        let _ = self.store.mark_stale_task_runtime_registrations_offline(Duration::from_secs(120)).await;
        Ok(())
    }

    pub fn apply_heartbeat(&self, id: &RuntimeId, active: i64, max: u32) -> Option<RuntimeEntry> {
        self.registry.apply_heartbeat(id, active, max, self.clock.now())
    }

    /// Release one dispatch slot without recycling the runtime (§4.4.4 step
    /// 7, `recycle_after_run = false` decision, see DESIGN.md).
    pub fn release_dispatch_slot(&self, id: &RuntimeId) -> Option<RuntimeEntry> {
        self.registry.release_slot(id, self.clock.now())
    }

    /// Drive `reconcile()` and `scale_down_idle()` on `HealthProbeInterval`
    /// ticks until `cancel` fires (§4.3.7). Runs as a background task owned
    /// by the daemon's process wiring.
    pub async fn run_reconciliation_loop(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.settings.health_probe_interval.max(Duration::from_secs(1)));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("reconciliation loop cancelled");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.reconcile().await {
                        warn!(error = %err, "reconciliation tick failed");
                    }
                    if let Err(err) = self.scale_down_idle().await {
                        warn!(error = %err, "scale-down-idle sweep failed");
                    }
                }
            }
        }
    }
}

fn is_managed(container: &taskgw_adapters::ObservedContainer, prefix: &str) -> bool {
    let has_labels = container.labels.get(labels::MANAGED_BY).map(|v| v == labels::MANAGED_BY_VALUE).unwrap_or(false)
        && container.labels.get(labels::ROLE).map(|v| v == labels::ROLE_VALUE).unwrap_or(false);
    has_labels || container.name.starts_with(prefix)
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
