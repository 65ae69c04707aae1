//! Distributed lease coordinator (§6.5): a named, time-bounded exclusive
//! claim. The in-memory implementation here stands in for an external
//! coordinator (e.g. backed by a database row or a distributed lock
//! service) in tests and single-instance deployments.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A held lease. Releases on drop, matching "disposed on exit from the
/// owning scope" (§6.5).
pub struct Lease {
    key: String,
    table: Arc<Mutex<HashMap<String, Instant>>>,
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.table.lock().remove(&self.key);
    }
}

#[async_trait]
pub trait LeaseCoordinator: Send + Sync + 'static {
    /// Attempt to acquire `key` for `ttl`. Returns `None` if already held by
    /// someone else and not yet expired.
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Option<Lease>;
}

/// Single-process lease table. Expired entries are treated as free.
#[derive(Clone, Default)]
pub struct InMemoryLeaseCoordinator {
    held: Arc<Mutex<HashMap<String, Instant>>>,
}

impl InMemoryLeaseCoordinator {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LeaseCoordinator for InMemoryLeaseCoordinator {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Option<Lease> {
        let mut held = self.held.lock();
        let now = Instant::now();
        if let Some(expires_at) = held.get(key) {
            if *expires_at > now {
                return None;
            }
        }
        held.insert(key.to_string(), now + ttl);
        Some(Lease { key: key.to_string(), table: self.held.clone() })
    }
}

#[cfg(test)]
#[path = "lease_tests.rs"]
mod tests;
