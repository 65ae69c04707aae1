//! Runtime-tunable settings (§10.4), resolved once from the environment at
//! startup into a single struct passed by `Arc` into every component.

use std::time::Duration;
use taskgw_adapters::ConnectivityMode;

/// Image resolution policy (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImagePolicy {
    PullOnly,
    BuildOnly,
    PullThenBuild,
    BuildThenPull,
    PreferLocal,
}

#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub refresh_interval: Duration,
    pub max_workers: u32,
    pub max_start_attempts_per_10_min: u32,
    pub max_failed_starts_per_10_min: u32,
    pub cooldown_minutes: u32,
    pub container_start_timeout: Duration,
    pub container_stop_timeout: Duration,
    pub idle_timeout: Duration,
    pub drain_timeout: Duration,
    pub pressure_sample_window: Duration,
    pub max_concurrent_pulls: u32,
    pub max_concurrent_builds: u32,
    pub pull_timeout: Duration,
    pub build_timeout: Duration,
    pub health_probe_interval: Duration,
    pub inactive_timeout_minutes: u32,
    pub canary_image: Option<String>,
    pub canary_percent: u32,
    pub base_image: String,
    pub connectivity_mode: ConnectivityMode,
    pub container_network: String,
    pub container_name_prefix: String,
    /// Name of the host container engine socket bind-mounted into every
    /// task runtime (§6.2), e.g. `docker` for `/var/run/docker.sock`.
    pub container_engine_name: String,
    /// Open Question (iii): keep recycling every run (legacy default) or
    /// leave runtimes in the pool for reuse once a run completes.
    pub recycle_after_run: bool,
}

fn env_duration_secs(key: &str, default_secs: u64) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or_else(|| Duration::from_secs(default_secs))
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key).ok().and_then(|v| v.parse::<u32>().ok()).unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).ok().filter(|v| !v.is_empty()).unwrap_or_else(|| default.to_string())
}

impl RuntimeSettings {
    /// Resolve all settings from the environment, falling back to the
    /// documented defaults on anything missing or malformed. Never panics.
    pub fn from_env() -> Self {
        Self {
            refresh_interval: env_duration_secs("TASKGW_REFRESH_INTERVAL_SECS", 5),
            max_workers: env_u32("TASKGW_MAX_WORKERS", 16),
            max_start_attempts_per_10_min: env_u32("TASKGW_MAX_START_ATTEMPTS_PER_10MIN", 20),
            max_failed_starts_per_10_min: env_u32("TASKGW_MAX_FAILED_STARTS_PER_10MIN", 5),
            cooldown_minutes: env_u32("TASKGW_COOLDOWN_MINUTES", 10),
            container_start_timeout: env_duration_secs("TASKGW_CONTAINER_START_TIMEOUT_SECS", 60),
            container_stop_timeout: env_duration_secs("TASKGW_CONTAINER_STOP_TIMEOUT_SECS", 10),
            idle_timeout: env_duration_secs("TASKGW_IDLE_TIMEOUT_SECS", 600),
            drain_timeout: env_duration_secs("TASKGW_DRAIN_TIMEOUT_SECS", 120),
            pressure_sample_window: env_duration_secs("TASKGW_PRESSURE_SAMPLE_WINDOW_SECS", 15),
            max_concurrent_pulls: env_u32("TASKGW_MAX_CONCURRENT_PULLS", 3),
            max_concurrent_builds: env_u32("TASKGW_MAX_CONCURRENT_BUILDS", 2),
            pull_timeout: env_duration_secs("TASKGW_PULL_TIMEOUT_SECS", 300),
            build_timeout: env_duration_secs("TASKGW_BUILD_TIMEOUT_SECS", 600),
            health_probe_interval: env_duration_secs("TASKGW_HEALTH_PROBE_INTERVAL_SECS", 2),
            inactive_timeout_minutes: env_u32("TASKGW_INACTIVE_TIMEOUT_MINUTES", 30),
            canary_image: std::env::var("TASKGW_CANARY_IMAGE").ok().filter(|v| !v.is_empty()),
            canary_percent: env_u32("TASKGW_CANARY_PERCENT", 0),
            base_image: env_string("TASKGW_BASE_IMAGE", "task-runtime:latest"),
            connectivity_mode: match std::env::var("TASKGW_CONNECTIVITY_MODE").as_deref() {
                Ok("docker-dns-only") => ConnectivityMode::DockerDnsOnly,
                Ok("host-port-only") => ConnectivityMode::HostPortOnly,
                _ => ConnectivityMode::AutoDetect,
            },
            container_network: env_string("TASKGW_CONTAINER_NETWORK", "task-runtime-net"),
            container_name_prefix: env_string("TASKGW_CONTAINER_NAME_PREFIX", "task-runtime"),
            container_engine_name: env_string("TASKGW_CONTAINER_ENGINE_NAME", "docker"),
            recycle_after_run: std::env::var("TASKGW_RECYCLE_AFTER_RUN")
                .ok()
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),
        }
    }

    pub fn worker_scale_lease_timeout(&self) -> Duration {
        self.container_start_timeout.max(Duration::from_secs(30)) + Duration::from_secs(30)
    }

    pub fn image_resolve_lease_timeout(&self) -> Duration {
        self.build_timeout + self.pull_timeout + Duration::from_secs(120)
    }

    /// `TaskRuntime__*`-prefixed settings and the task runtime image default,
    /// carried into every spawned container's environment (§4.3.3 step 5).
    pub fn container_env_overlay(&self) -> Vec<(String, String)> {
        vec![
            ("TaskRuntime__ContainerNetwork".to_string(), self.container_network.clone()),
            ("TaskRuntime__IdleTimeoutSeconds".to_string(), self.idle_timeout.as_secs().to_string()),
            ("TaskRuntime__HealthProbeIntervalSeconds".to_string(), self.health_probe_interval.as_secs().to_string()),
            ("TaskRuntime__Image".to_string(), self.base_image.clone()),
        ]
    }
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(5),
            max_workers: 16,
            max_start_attempts_per_10_min: 20,
            max_failed_starts_per_10_min: 5,
            cooldown_minutes: 10,
            container_start_timeout: Duration::from_secs(60),
            container_stop_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(600),
            drain_timeout: Duration::from_secs(120),
            pressure_sample_window: Duration::from_secs(15),
            max_concurrent_pulls: 3,
            max_concurrent_builds: 2,
            pull_timeout: Duration::from_secs(300),
            build_timeout: Duration::from_secs(600),
            health_probe_interval: Duration::from_secs(2),
            inactive_timeout_minutes: 30,
            canary_image: None,
            canary_percent: 0,
            base_image: "task-runtime:latest".to_string(),
            connectivity_mode: ConnectivityMode::AutoDetect,
            container_network: "task-runtime-net".to_string(),
            container_name_prefix: "task-runtime".to_string(),
            container_engine_name: "docker".to_string(),
            recycle_after_run: true,
        }
    }
}

#[cfg(test)]
#[path = "settings_tests.rs"]
mod tests;
