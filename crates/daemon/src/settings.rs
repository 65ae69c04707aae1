//! Dispatcher/listener-level tunables (§10.4), resolved once from the
//! environment at startup. Mirrors `taskgw_engine::RuntimeSettings`'s
//! env-accessor pattern.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub max_queue_depth: u32,
    pub max_global_concurrent: u32,
    pub per_project_limit: u32,
    pub per_repo_limit: u32,

    pub proxy_route_ttl: Duration,
    pub discovery_interval: Duration,
    pub reconnect_backoff_min: Duration,
    pub reconnect_backoff_max: Duration,
    pub stale_registration_ttl: Duration,

    pub retry_max_delay: Duration,
    pub hard_timeout: Duration,
    pub default_cpu: f64,
    pub default_memory_bytes: u64,
}

fn env_duration_secs(key: &str, default_secs: u64) -> Duration {
    std::env::var(key).ok().and_then(|v| v.parse::<u64>().ok()).map(Duration::from_secs).unwrap_or_else(|| Duration::from_secs(default_secs))
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key).ok().and_then(|v| v.parse::<u32>().ok()).unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key).ok().and_then(|v| v.parse::<f64>().ok()).unwrap_or(default)
}

fn env_memory_bytes(key: &str, default: &str) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| taskgw_core::parse_memory_bytes(&v))
        .or_else(|| taskgw_core::parse_memory_bytes(default))
        .unwrap_or(0)
}

impl DispatchSettings {
    /// Resolve all settings from the environment, falling back to the
    /// documented defaults on anything missing or malformed. Never panics.
    pub fn from_env() -> Self {
        Self {
            max_queue_depth: env_u32("TASKGW_MAX_QUEUE_DEPTH", 500),
            max_global_concurrent: env_u32("TASKGW_MAX_GLOBAL_CONCURRENT", 50),
            per_project_limit: env_u32("TASKGW_PER_PROJECT_LIMIT", 10),
            per_repo_limit: env_u32("TASKGW_PER_REPO_LIMIT", 5),

            proxy_route_ttl: env_duration_secs("TASKGW_PROXY_ROUTE_TTL_SECS", 7200),
            discovery_interval: env_duration_secs("TASKGW_DISCOVERY_INTERVAL_SECS", 5),
            reconnect_backoff_min: env_duration_secs("TASKGW_RECONNECT_BACKOFF_MIN_SECS", 1),
            reconnect_backoff_max: env_duration_secs("TASKGW_RECONNECT_BACKOFF_MAX_SECS", 30),
            stale_registration_ttl: env_duration_secs("TASKGW_STALE_REGISTRATION_TTL_SECS", 120),

            retry_max_delay: env_duration_secs("TASKGW_RETRY_MAX_DELAY_SECS", 300),
            hard_timeout: env_duration_secs("TASKGW_DISPATCH_HARD_TIMEOUT_SECS", 3600),
            default_cpu: env_f64("TASKGW_DISPATCH_DEFAULT_CPU", 2.0),
            default_memory_bytes: env_memory_bytes("TASKGW_DISPATCH_DEFAULT_MEMORY", "4g"),
        }
    }
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            max_queue_depth: 500,
            max_global_concurrent: 50,
            per_project_limit: 10,
            per_repo_limit: 5,
            proxy_route_ttl: Duration::from_secs(7200),
            discovery_interval: Duration::from_secs(5),
            reconnect_backoff_min: Duration::from_secs(1),
            reconnect_backoff_max: Duration::from_secs(30),
            stale_registration_ttl: Duration::from_secs(120),
            retry_max_delay: Duration::from_secs(300),
            hard_timeout: Duration::from_secs(3600),
            default_cpu: 2.0,
            default_memory_bytes: 4 * 1024 * 1024 * 1024,
        }
    }
}

#[cfg(test)]
#[path = "settings_tests.rs"]
mod tests;
