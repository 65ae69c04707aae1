//! Run Dispatcher (C4, §4.4.1–§4.4.2): admits a queued run, leases a runtime
//! from C3, composes the worker's dispatch request, and hands it off.

use crate::error::DispatchError;
use crate::settings::DispatchSettings;
use std::collections::HashMap;
use std::sync::Arc;
use taskgw_adapters::{
    credentials::fan_out, DispatchJobRequest, ProxyRouteRegistry, Publisher, Store, TaskRecord, UiEvent, WorkerRpc,
};
use taskgw_core::{sanitise, Clock, RunId, RunState};
use taskgw_engine::LifecycleManager;
use tracing::{instrument, warn};

pub struct Dispatcher<C: Clock> {
    store: Arc<dyn Store>,
    lifecycle: Arc<LifecycleManager<C>>,
    rpc: Arc<dyn WorkerRpc>,
    proxy: Arc<dyn ProxyRouteRegistry>,
    publisher: Arc<dyn Publisher>,
    clock: C,
    settings: Arc<DispatchSettings>,
}

impl<C: Clock> Clone for Dispatcher<C> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            lifecycle: self.lifecycle.clone(),
            rpc: self.rpc.clone(),
            proxy: self.proxy.clone(),
            publisher: self.publisher.clone(),
            clock: self.clock.clone(),
            settings: self.settings.clone(),
        }
    }
}

impl<C: Clock> Dispatcher<C> {
    pub fn new(
        store: Arc<dyn Store>,
        lifecycle: Arc<LifecycleManager<C>>,
        rpc: Arc<dyn WorkerRpc>,
        proxy: Arc<dyn ProxyRouteRegistry>,
        publisher: Arc<dyn Publisher>,
        clock: C,
        settings: Arc<DispatchSettings>,
    ) -> Self {
        Self { store, lifecycle, rpc, proxy, publisher, clock, settings }
    }

    fn publish_status(&self, run_id: &RunId, state: RunState) {
        self.publisher.publish(UiEvent::RunStatus { run_id: run_id.clone(), state });
    }

    /// Dispatch a queued run (§4.4.1). Returns `Ok(true)` once the run has
    /// been handed to a worker (or parked pending approval); `Ok(false)`
    /// means admission deferred the run — it stays `Queued` for a later
    /// dispatch attempt.
    #[instrument(skip(self))]
    pub async fn dispatch(&self, run_id: &RunId) -> Result<bool, DispatchError> {
        let run = self.store.get_run(run_id).await?;
        let task = self.store.get_task(&run.task_id).await?;

        // Approval short-circuit (§4.4.1 step 1). Resuming a `PendingApproval`
        // run once approved is an out-of-scope UI/API concern (§1); this
        // dispatcher only ever parks it here.
        if task.require_approval {
            self.store.mark_run_pending_approval(run_id).await?;
            self.publish_status(run_id, RunState::PendingApproval);
            return Ok(true);
        }

        if !self.admission_check(&task, run_id).await? {
            return Ok(false);
        }

        let Some(entry) = self.lifecycle.acquire_for_dispatch(&run.repository_id, &run.task_id, 1).await? else {
            return Ok(false);
        };

        let request = self.compose_job(&task, &run, run_id).await?;

        let response = match self.rpc.dispatch_job(&entry.grpc_endpoint, request).await {
            Ok(response) => response,
            Err(err) => {
                self.lifecycle.release_dispatch_slot(&entry.runtime_id);
                return Err(err.into());
            }
        };

        if !response.success {
            let reason = response.error_message.unwrap_or_else(|| "worker rejected dispatch".to_string());
            self.lifecycle.release_dispatch_slot(&entry.runtime_id);
            self.store.mark_run_failed(run_id, "WorkerRejected").await?;
            self.store.create_finding_from_failure(run_id, &format!("worker rejected dispatch: {reason}")).await?;
            self.publish_status(run_id, RunState::Failed);
            return Ok(false);
        }

        self.store
            .mark_run_started(
                run_id,
                entry.runtime_id.as_str(),
                entry.image_ref.as_str(),
                entry.image_digest.as_deref(),
                entry.image_source,
            )
            .await?;
        self.publish_status(run_id, RunState::Running);

        let path = proxy_path(run_id);
        self.proxy.register(&path, &entry.proxy_endpoint, self.settings.proxy_route_ttl, self.clock.now());
        self.publisher.publish(UiEvent::RouteAvailable { run_id: run_id.clone(), path });

        Ok(true)
    }

    /// Admission checks (§4.4.1 step 2): only the queue-depth check marks a
    /// terminal outcome; every other check just defers, leaving the run
    /// `Queued` for a later attempt.
    async fn admission_check(&self, task: &TaskRecord, run_id: &RunId) -> Result<bool, DispatchError> {
        if self.store.count_queued_runs().await? > self.settings.max_queue_depth {
            self.store.mark_run_failed(run_id, "AdmissionControl").await?;
            self.store.create_finding_from_failure(run_id, "queue depth policy exceeded").await?;
            self.publish_status(run_id, RunState::Failed);
            return Ok(false);
        }
        if self.store.count_active_runs().await? >= self.settings.max_global_concurrent {
            return Ok(false);
        }
        if self.store.count_active_runs_by_project(&task.project_id).await? >= self.settings.per_project_limit {
            return Ok(false);
        }
        if self.store.count_active_runs_by_repo(&task.repository_id).await? >= self.settings.per_repo_limit {
            return Ok(false);
        }
        if task.concurrency_limit > 0
            && self.store.count_active_runs_by_task(&task.task_id).await? >= task.concurrency_limit
        {
            return Ok(false);
        }
        Ok(true)
    }

    /// Compose the worker dispatch request (§4.4.1 step 4): deterministic
    /// branch name, provider-credential fan-out into env/secrets, sandbox
    /// limits, and the effective timeout.
    async fn compose_job(
        &self,
        task: &TaskRecord,
        run: &taskgw_core::Run,
        run_id: &RunId,
    ) -> Result<DispatchJobRequest, DispatchError> {
        let branch = branch_name(&run.repository_id, &run.task_id, run_id);

        let mut env = HashMap::new();
        env.insert("TASK_ID".to_string(), run.task_id.to_string());
        env.insert("REPOSITORY_ID".to_string(), run.repository_id.to_string());
        env.insert("PROJECT_ID".to_string(), run.project_id.to_string());
        env.insert("RUN_ID".to_string(), run_id.to_string());
        env.insert("BRANCH".to_string(), branch.clone());
        env.insert("ATTEMPT".to_string(), run.attempt.to_string());

        let provider_secrets = self.store.list_provider_secrets(&run.repository_id).await?;
        let (env_fanout, sidecar_fanout) = fan_out(&provider_secrets);
        env.extend(env_fanout);
        let secrets: HashMap<String, String> = sidecar_fanout.into_iter().collect();

        let mut labels = HashMap::new();
        labels.insert("run_id".to_string(), run_id.to_string());
        labels.insert("task_id".to_string(), run.task_id.to_string());

        let timeout = task.execution_timeout.min(self.settings.hard_timeout);

        Ok(DispatchJobRequest {
            run_id: run_id.to_string(),
            branch,
            env,
            secrets,
            cpu_nanos: taskgw_core::cpus_to_nanocpus(self.settings.default_cpu),
            memory_bytes: self.settings.default_memory_bytes,
            timeout,
            attempt: run.attempt,
            labels,
        })
    }

    /// Cancel an in-flight run (§4.4.2): best-effort; a worker that cannot be
    /// reached is left for the reconciliation sweep to clean up.
    #[instrument(skip(self))]
    pub async fn cancel(&self, run_id: &RunId) -> Result<(), DispatchError> {
        let run = self.store.get_run(run_id).await?;
        let Some(worker_id) = run.bound_runtime_container_id.as_deref() else {
            return Ok(());
        };
        let Some(entry) = self.lifecycle.registry().get(&taskgw_core::RuntimeId::new(worker_id)) else {
            return Ok(());
        };
        if let Err(err) = self.rpc.cancel_job(&entry.grpc_endpoint, run_id.as_str()).await {
            warn!(run_id = %run_id, error = %err, "cancel_job failed, leaving worker for reconciliation");
        }
        self.proxy.remove(&proxy_path(run_id));
        Ok(())
    }
}

fn branch_name(repository_id: &taskgw_core::RepositoryId, task_id: &taskgw_core::TaskId, run_id: &RunId) -> String {
    format!("agent/{}/{}/{}", sanitise(repository_id.as_str()), sanitise(task_id.as_str()), run_id.as_str())
}

/// Public proxy path a run's worker is reachable under (§4.4.1 step 7).
pub fn proxy_path(run_id: &RunId) -> String {
    format!("/proxy/runs/{}/{{**}}", run_id.as_str())
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;
