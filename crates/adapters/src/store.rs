//! The store trait (§6.1): everything the core reads and writes through
//! persistence, abstracted so the engine and daemon crates never depend on a
//! concrete database. The in-memory implementation backs tests and the
//! end-to-end scenarios in §8.

use crate::error::StoreError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use taskgw_core::{ImageRef, ImageSource, ProjectId, RepositoryId, Run, RunId, RunState, TaskId};

/// A log line attached to a run.
#[derive(Debug, Clone)]
pub struct RunLogEvent {
    pub run_id: RunId,
    pub level: String,
    pub message: String,
}

/// A finding created from a dispatch/run failure, surfaced to the UI.
#[derive(Debug, Clone)]
pub struct Finding {
    pub run_id: RunId,
    pub message: String,
}

/// A task definition, as far as the core needs to know about it.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub task_id: TaskId,
    pub repository_id: RepositoryId,
    pub project_id: ProjectId,
    pub require_approval: bool,
    pub concurrency_limit: u32,
    pub max_attempts: u32,
    pub retry_base_seconds: u64,
    pub retry_multiplier: f64,
    pub execution_timeout: Duration,
}

/// Update payload for `upsert_task_runtime_state` (§6.1).
#[derive(Debug, Clone)]
pub struct TaskRuntimeStateUpdate {
    pub runtime_id: String,
    pub task_id: Option<TaskId>,
    pub repository_id: Option<RepositoryId>,
    pub state: taskgw_core::StoreRuntimeState,
    pub active_runs: u32,
    pub max_runs: u32,
    pub endpoint: String,
    pub container_id: String,
    pub update_last_activity: bool,
    pub inactive_after: Option<Instant>,
    pub clear_inactive_after: bool,
    pub last_error: Option<String>,
}

#[async_trait]
pub trait Store: Send + Sync + 'static {
    async fn get_task(&self, task_id: &TaskId) -> Result<TaskRecord, StoreError>;

    async fn count_active_runs(&self) -> Result<u32, StoreError>;
    async fn count_active_runs_by_project(&self, project_id: &ProjectId) -> Result<u32, StoreError>;
    async fn count_active_runs_by_repo(&self, repository_id: &RepositoryId) -> Result<u32, StoreError>;
    async fn count_active_runs_by_task(&self, task_id: &TaskId) -> Result<u32, StoreError>;
    async fn count_queued_runs(&self) -> Result<u32, StoreError>;

    async fn create_run(&self, task_id: &TaskId, project_id: &ProjectId, repository_id: &RepositoryId, attempt: u32) -> Result<Run, StoreError>;
    async fn get_run(&self, run_id: &RunId) -> Result<Run, StoreError>;

    async fn mark_run_pending_approval(&self, run_id: &RunId) -> Result<(), StoreError>;
    async fn mark_run_failed(&self, run_id: &RunId, failure_class: &str) -> Result<(), StoreError>;
    async fn mark_run_started(
        &self,
        run_id: &RunId,
        worker_id: &str,
        image_ref: &str,
        image_digest: Option<&str>,
        image_source: ImageSource,
    ) -> Result<(), StoreError>;
    async fn mark_run_completed(
        &self,
        run_id: &RunId,
        succeeded: bool,
        summary: Option<String>,
        output_json: Option<String>,
        failure_class: Option<String>,
        pr_url: Option<String>,
    ) -> Result<(), StoreError>;

    async fn add_run_log(&self, event: RunLogEvent) -> Result<(), StoreError>;
    async fn list_run_logs(&self, run_id: &RunId) -> Result<Vec<RunLogEvent>, StoreError>;

    async fn create_finding_from_failure(&self, run_id: &RunId, message: &str) -> Result<(), StoreError>;

    async fn upsert_task_runtime_registration_heartbeat(
        &self,
        runtime_id: &str,
        endpoint: &str,
        active: u32,
        max: u32,
    ) -> Result<(), StoreError>;
    async fn mark_stale_task_runtime_registrations_offline(&self, ttl: Duration) -> Result<u32, StoreError>;
    async fn upsert_task_runtime_state(&self, update: TaskRuntimeStateUpdate) -> Result<(), StoreError>;

    /// Provider → decrypted credential value for a repository (§6.3),
    /// merged with any `"global"`-scoped secrets the repository doesn't
    /// override.
    async fn list_provider_secrets(&self, repository_id: &RepositoryId) -> Result<Vec<(String, String)>, StoreError>;
}

#[derive(Default)]
struct InMemoryState {
    runs: HashMap<RunId, Run>,
    tasks: HashMap<TaskId, TaskRecord>,
    logs: HashMap<RunId, Vec<RunLogEvent>>,
    findings: Vec<Finding>,
    registrations: HashMap<String, Instant>,
    next_run_seq: u64,
    global_secrets: HashMap<String, String>,
    repo_secrets: HashMap<RepositoryId, HashMap<String, String>>,
    runtime_states: HashMap<String, TaskRuntimeStateUpdate>,
}

/// In-memory store backing unit tests and the end-to-end scenarios (§8).
#[derive(Clone)]
pub struct InMemoryStore {
    state: Arc<Mutex<InMemoryState>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self { state: Arc::new(Mutex::new(InMemoryState::default())) }
    }

    pub fn seed_task(&self, task: TaskRecord) {
        self.state.lock().tasks.insert(task.task_id.clone(), task);
    }

    pub fn seed_global_secret(&self, provider: impl Into<String>, value: impl Into<String>) {
        self.state.lock().global_secrets.insert(provider.into(), value.into());
    }

    pub fn seed_repo_secret(&self, repository_id: &RepositoryId, provider: impl Into<String>, value: impl Into<String>) {
        self.state
            .lock()
            .repo_secrets
            .entry(repository_id.clone())
            .or_default()
            .insert(provider.into(), value.into());
    }

    pub fn findings(&self) -> Vec<Finding> {
        self.state.lock().findings.clone()
    }

    pub fn runtime_state(&self, runtime_id: &str) -> Option<TaskRuntimeStateUpdate> {
        self.state.lock().runtime_states.get(runtime_id).cloned()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get_task(&self, task_id: &TaskId) -> Result<TaskRecord, StoreError> {
        self.state
            .lock()
            .tasks
            .get(task_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(task_id.to_string()))
    }

    async fn count_active_runs(&self) -> Result<u32, StoreError> {
        Ok(self.state.lock().runs.values().filter(|r| !r.state.is_terminal()).count() as u32)
    }

    async fn count_active_runs_by_project(&self, project_id: &ProjectId) -> Result<u32, StoreError> {
        Ok(self
            .state
            .lock()
            .runs
            .values()
            .filter(|r| !r.state.is_terminal() && &r.project_id == project_id)
            .count() as u32)
    }

    async fn count_active_runs_by_repo(&self, repository_id: &RepositoryId) -> Result<u32, StoreError> {
        Ok(self
            .state
            .lock()
            .runs
            .values()
            .filter(|r| !r.state.is_terminal() && &r.repository_id == repository_id)
            .count() as u32)
    }

    async fn count_active_runs_by_task(&self, task_id: &TaskId) -> Result<u32, StoreError> {
        Ok(self
            .state
            .lock()
            .runs
            .values()
            .filter(|r| !r.state.is_terminal() && &r.task_id == task_id)
            .count() as u32)
    }

    async fn count_queued_runs(&self) -> Result<u32, StoreError> {
        Ok(self.state.lock().runs.values().filter(|r| r.state == RunState::Queued).count() as u32)
    }

    async fn create_run(
        &self,
        task_id: &TaskId,
        project_id: &ProjectId,
        repository_id: &RepositoryId,
        attempt: u32,
    ) -> Result<Run, StoreError> {
        let mut state = self.state.lock();
        state.next_run_seq += 1;
        let run = Run {
            run_id: RunId::new(format!("run-{}", state.next_run_seq)),
            task_id: task_id.clone(),
            project_id: project_id.clone(),
            repository_id: repository_id.clone(),
            state: RunState::Queued,
            attempt,
            max_attempts: state.tasks.get(task_id).map(|t| t.max_attempts).unwrap_or(1),
            bound_runtime_container_id: None,
            result: None,
            failure_class: None,
            output_json: None,
            pr_url: None,
            image_ref: None,
            image_digest: None,
            image_source: None,
        };
        state.runs.insert(run.run_id.clone(), run.clone());
        Ok(run)
    }

    async fn get_run(&self, run_id: &RunId) -> Result<Run, StoreError> {
        self.state.lock().runs.get(run_id).cloned().ok_or_else(|| StoreError::NotFound(run_id.to_string()))
    }

    async fn mark_run_pending_approval(&self, run_id: &RunId) -> Result<(), StoreError> {
        self.mutate_run(run_id, |run| run.state = RunState::PendingApproval)
    }

    async fn mark_run_failed(&self, run_id: &RunId, failure_class: &str) -> Result<(), StoreError> {
        self.mutate_run(run_id, |run| {
            run.state = RunState::Failed;
            run.failure_class = Some(failure_class.to_string());
        })
    }

    async fn mark_run_started(
        &self,
        run_id: &RunId,
        worker_id: &str,
        image_ref: &str,
        image_digest: Option<&str>,
        image_source: ImageSource,
    ) -> Result<(), StoreError> {
        self.mutate_run(run_id, |run| {
            run.state = RunState::Running;
            run.bound_runtime_container_id = Some(worker_id.to_string());
            run.image_ref = Some(ImageRef::new(image_ref));
            run.image_digest = image_digest.map(str::to_string);
            run.image_source = Some(image_source);
        })
    }

    async fn mark_run_completed(
        &self,
        run_id: &RunId,
        succeeded: bool,
        summary: Option<String>,
        output_json: Option<String>,
        failure_class: Option<String>,
        pr_url: Option<String>,
    ) -> Result<(), StoreError> {
        self.mutate_run(run_id, |run| {
            run.state = if succeeded { RunState::Succeeded } else { RunState::Failed };
            run.output_json = output_json;
            run.failure_class = failure_class;
            run.pr_url = pr_url;
            if let Some(summary) = summary {
                run.result = Some(taskgw_core::HarnessResultEnvelope {
                    status: if succeeded {
                        taskgw_core::HarnessStatus::Succeeded
                    } else {
                        taskgw_core::HarnessStatus::Failed
                    },
                    summary: Some(summary),
                    error: None,
                    metadata: Default::default(),
                    actions: Vec::new(),
                    artifacts: Vec::new(),
                    metrics: Default::default(),
                });
            }
        })
    }

    async fn add_run_log(&self, event: RunLogEvent) -> Result<(), StoreError> {
        self.state.lock().logs.entry(event.run_id.clone()).or_default().push(event);
        Ok(())
    }

    async fn list_run_logs(&self, run_id: &RunId) -> Result<Vec<RunLogEvent>, StoreError> {
        Ok(self.state.lock().logs.get(run_id).cloned().unwrap_or_default())
    }

    async fn create_finding_from_failure(&self, run_id: &RunId, message: &str) -> Result<(), StoreError> {
        self.state
            .lock()
            .findings
            .push(Finding { run_id: run_id.clone(), message: message.to_string() });
        Ok(())
    }

    async fn upsert_task_runtime_registration_heartbeat(
        &self,
        runtime_id: &str,
        _endpoint: &str,
        _active: u32,
        _max: u32,
    ) -> Result<(), StoreError> {
        self.state.lock().registrations.insert(runtime_id.to_string(), Instant::now());
        Ok(())
    }

    async fn mark_stale_task_runtime_registrations_offline(&self, ttl: Duration) -> Result<u32, StoreError> {
        let now = Instant::now();
        let mut state = self.state.lock();
        let stale: Vec<String> = state
            .registrations
            .iter()
            .filter(|(_, seen_at)| now.duration_since(**seen_at) >= ttl)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            state.registrations.remove(id);
        }
        Ok(stale.len() as u32)
    }

    async fn upsert_task_runtime_state(&self, update: TaskRuntimeStateUpdate) -> Result<(), StoreError> {
        self.state.lock().runtime_states.insert(update.runtime_id.clone(), update);
        Ok(())
    }

    async fn list_provider_secrets(&self, repository_id: &RepositoryId) -> Result<Vec<(String, String)>, StoreError> {
        let state = self.state.lock();
        let mut merged = state.global_secrets.clone();
        if let Some(repo) = state.repo_secrets.get(repository_id) {
            for (provider, value) in repo {
                merged.insert(provider.clone(), value.clone());
            }
        }
        Ok(merged.into_iter().collect())
    }
}

impl InMemoryStore {
    fn mutate_run(&self, run_id: &RunId, f: impl FnOnce(&mut Run)) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        let run = state.runs.get_mut(run_id).ok_or_else(|| StoreError::NotFound(run_id.to_string()))?;
        f(run);
        Ok(())
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
