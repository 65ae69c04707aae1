//! The container engine trait (§6.2) and an in-memory fake used by tests and
//! the in-process reference wiring. A CLI-shelled Docker implementation would
//! live alongside this in production; only the trait boundary is owned here.

use crate::error::EngineError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Well-known labels applied to every managed container (§6.2).
pub mod labels {
    pub const MANAGED_BY: &str = "orchestrator.managed-by";
    pub const MANAGED_BY_VALUE: &str = "control-plane";
    pub const ROLE: &str = "orchestrator.role";
    pub const ROLE_VALUE: &str = "task-runtime-gateway";
    pub const WORKER_ID: &str = "orchestrator.worker-id";
    pub const TASK_ID: &str = "orchestrator.task-id";
    pub const REPO_ID: &str = "orchestrator.repo-id";
    pub const MAX_SLOTS: &str = "orchestrator.max-slots";
}

/// Worker gRPC port exposed by every task runtime container.
pub const WORKER_PORT: u16 = 5201;

/// How the daemon reaches a runtime's worker port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityMode {
    AutoDetect,
    DockerDnsOnly,
    HostPortOnly,
}

/// Env flag used by `AutoDetect` to decide whether the daemon itself is
/// running inside a container (and can therefore reach peers over container
/// DNS) versus on the host (and must use the published port).
pub const INSIDE_CONTAINER_ENV: &str = "DOTNET_RUNNING_IN_CONTAINER";

pub fn running_inside_container() -> bool {
    std::env::var(INSIDE_CONTAINER_ENV).map(|v| v == "true").unwrap_or(false)
}

/// A single container as observed by a `list_containers` call.
#[derive(Debug, Clone)]
pub struct ObservedContainer {
    pub container_id: String,
    pub name: String,
    pub labels: HashMap<String, String>,
    pub is_running: bool,
    pub image: String,
    pub image_digest: Option<String>,
    pub host_port: Option<u16>,
}

/// Parameters for creating a new task-runtime container (§4.3.3 step 5).
#[derive(Debug, Clone)]
pub struct CreateContainerParams {
    pub name: String,
    pub image: String,
    pub labels: HashMap<String, String>,
    pub env: HashMap<String, String>,
    pub volumes: Vec<(String, String)>,
    pub network: String,
    pub publish_port: bool,
    pub nano_cpus: i64,
    pub memory_bytes: u64,
    pub pids_limit: i64,
    pub nofile_ulimit: u64,
}

/// A single non-streaming resource usage sample for pressure calculation
/// (§4.3.6). Fields mirror the shape of a container-stats API response
/// closely enough that `pressure::calculate` can consume it directly.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatsSample {
    pub cpu_total_usage: u64,
    pub pre_cpu_total_usage: u64,
    pub cpu_system_usage: u64,
    pub pre_cpu_system_usage: u64,
    pub online_cpus: u32,
    pub per_cpu_usage_len: u32,
    pub memory_usage: u64,
    pub memory_limit: u64,
}

/// Build/pull progress, for an optional progress sink (§4.2).
#[derive(Debug, Clone, Copy)]
pub struct Progress {
    pub percent: u8,
}

#[async_trait]
pub trait ContainerEngine: Send + Sync + 'static {
    async fn list_containers(&self, include_stopped: bool) -> Result<Vec<ObservedContainer>, EngineError>;

    async fn image_exists_locally(&self, image: &str) -> Result<bool, EngineError>;

    async fn pull_image(
        &self,
        image: &str,
        timeout: Duration,
        progress: Option<&(dyn Fn(Progress) + Send + Sync)>,
    ) -> Result<(), EngineError>;

    async fn build_image(
        &self,
        image: &str,
        context: &str,
        timeout: Duration,
        progress: Option<&(dyn Fn(Progress) + Send + Sync)>,
    ) -> Result<(), EngineError>;

    async fn ensure_network(&self, name: &str) -> Result<(), EngineError>;

    async fn create_and_start(&self, params: CreateContainerParams) -> Result<String, EngineError>;

    async fn stop(&self, container_id: &str, force: bool, timeout: Duration) -> Result<(), EngineError>;

    async fn remove(&self, container_id: &str) -> Result<(), EngineError>;

    async fn stats(&self, container_id: &str) -> Result<StatsSample, EngineError>;
}

/// In-memory fake engine, grounded on the in-process test doubles used
/// elsewhere in this workspace: no real process is spawned, state lives in a
/// `Mutex<HashMap>`, and every call is instant.
#[derive(Clone, Default)]
pub struct FakeContainerEngine {
    containers: Arc<Mutex<HashMap<String, ObservedContainer>>>,
    images: Arc<Mutex<HashMap<String, bool>>>,
    networks: Arc<Mutex<Vec<String>>>,
    next_id: Arc<Mutex<u64>>,
}

impl FakeContainerEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a locally-present image for tests that exercise the "already
    /// present" path of the resolver.
    pub fn seed_local_image(&self, image: &str) {
        self.images.lock().insert(image.to_string(), true);
    }

    /// Directly insert an observed container, bypassing `create_and_start`,
    /// for refresh-path tests.
    pub fn seed_container(&self, container: ObservedContainer) {
        self.containers.lock().insert(container.container_id.clone(), container);
    }

    fn fresh_id(&self) -> String {
        let mut n = self.next_id.lock();
        *n += 1;
        format!("fake-container-{n}")
    }
}

#[async_trait]
impl ContainerEngine for FakeContainerEngine {
    async fn list_containers(&self, include_stopped: bool) -> Result<Vec<ObservedContainer>, EngineError> {
        Ok(self
            .containers
            .lock()
            .values()
            .filter(|c| include_stopped || c.is_running)
            .cloned()
            .collect())
    }

    async fn image_exists_locally(&self, image: &str) -> Result<bool, EngineError> {
        Ok(self.images.lock().get(image).copied().unwrap_or(false))
    }

    async fn pull_image(
        &self,
        image: &str,
        _timeout: Duration,
        progress: Option<&(dyn Fn(Progress) + Send + Sync)>,
    ) -> Result<(), EngineError> {
        if let Some(cb) = progress {
            cb(Progress { percent: 99 });
        }
        self.images.lock().insert(image.to_string(), true);
        Ok(())
    }

    async fn build_image(
        &self,
        image: &str,
        _context: &str,
        _timeout: Duration,
        progress: Option<&(dyn Fn(Progress) + Send + Sync)>,
    ) -> Result<(), EngineError> {
        if let Some(cb) = progress {
            cb(Progress { percent: 100 });
        }
        self.images.lock().insert(image.to_string(), true);
        Ok(())
    }

    async fn ensure_network(&self, name: &str) -> Result<(), EngineError> {
        let mut networks = self.networks.lock();
        if !networks.iter().any(|n| n == name) {
            networks.push(name.to_string());
        }
        Ok(())
    }

    async fn create_and_start(&self, params: CreateContainerParams) -> Result<String, EngineError> {
        if self.containers.lock().values().any(|c| c.name == params.name) {
            return Err(EngineError::NameAlreadyInUse(params.name));
        }
        if !self.images.lock().get(&params.image).copied().unwrap_or(false) {
            return Err(EngineError::NoSuchImage(params.image));
        }
        let id = self.fresh_id();
        self.containers.lock().insert(
            id.clone(),
            ObservedContainer {
                container_id: id.clone(),
                name: params.name,
                labels: params.labels,
                is_running: true,
                image: params.image,
                image_digest: None,
                host_port: if params.publish_port { Some(0) } else { None },
            },
        );
        Ok(id)
    }

    async fn stop(&self, container_id: &str, _force: bool, _timeout: Duration) -> Result<(), EngineError> {
        let mut containers = self.containers.lock();
        match containers.get_mut(container_id) {
            Some(c) => {
                c.is_running = false;
                Ok(())
            }
            None => Err(EngineError::ContainerNotFound(container_id.to_string())),
        }
    }

    async fn remove(&self, container_id: &str) -> Result<(), EngineError> {
        self.containers.lock().remove(container_id);
        Ok(())
    }

    async fn stats(&self, container_id: &str) -> Result<StatsSample, EngineError> {
        if !self.containers.lock().contains_key(container_id) {
            return Err(EngineError::ContainerNotFound(container_id.to_string()));
        }
        Ok(StatsSample {
            cpu_total_usage: 200,
            pre_cpu_total_usage: 100,
            cpu_system_usage: 2000,
            pre_cpu_system_usage: 1000,
            online_cpus: 4,
            per_cpu_usage_len: 4,
            memory_usage: 50,
            memory_limit: 100,
        })
    }
}

#[cfg(test)]
#[path = "container_engine_tests.rs"]
mod tests;
