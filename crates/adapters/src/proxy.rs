//! Proxy route registry (§4.4.1 step 7, §4.4.4 step 5): maps a run's public
//! path prefix to a runtime's proxy endpoint for a bounded TTL. The HTTP/UI
//! surface that actually forwards traffic is out of scope (§1); this crate
//! only owns the registration boundary the dispatcher and event listener
//! call into.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Route {
    target: String,
    expires_at: Instant,
}

/// Registers and removes `/proxy/runs/<run_id>/{**}`-style routes.
pub trait ProxyRouteRegistry: Send + Sync + 'static {
    /// Register `path` to forward to `target` until `now + ttl`. Re-registering
    /// an existing path replaces its target and TTL.
    fn register(&self, path: &str, target: &str, ttl: Duration, now: Instant);

    /// Remove a previously registered path. Removing a path that was never
    /// registered (or already expired) is a no-op.
    fn remove(&self, path: &str);
}

/// In-memory route table. Expiry is advisory (`expires_at` is stored but
/// nothing sweeps it here) since the core never reads TTL expiry itself — an
/// external proxy surface would.
#[derive(Clone, Default)]
pub struct InMemoryProxyRouteRegistry {
    routes: Arc<Mutex<HashMap<String, Route>>>,
}

impl InMemoryProxyRouteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn target_of(&self, path: &str) -> Option<String> {
        self.routes.lock().get(path).map(|r| r.target.clone())
    }

    pub fn is_registered(&self, path: &str) -> bool {
        self.routes.lock().contains_key(path)
    }
}

impl ProxyRouteRegistry for InMemoryProxyRouteRegistry {
    fn register(&self, path: &str, target: &str, ttl: Duration, now: Instant) {
        self.routes.lock().insert(path.to_string(), Route { target: target.to_string(), expires_at: now + ttl });
    }

    fn remove(&self, path: &str) {
        self.routes.lock().remove(path);
    }
}

#[cfg(test)]
#[path = "proxy_tests.rs"]
mod tests;
