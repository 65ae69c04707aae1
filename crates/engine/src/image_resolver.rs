//! Image Resolver (C2): guarantees an image reference is locally available,
//! never double-resolving the same reference concurrently (§4.2).

use crate::error::ImageError;
use crate::settings::ImagePolicy;
use parking_lot::Mutex as SyncMutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use taskgw_adapters::{ContainerEngine, LeaseCoordinator, Progress};
use taskgw_core::{Clock, ImageSource, ScaleOutBudget};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct ResolveOutcome {
    pub available: bool,
    pub source: ImageSource,
    pub warning: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolveRequest {
    pub image: String,
    pub policy: ImagePolicy,
    pub force_refresh: bool,
    pub build_context: String,
    pub pull_timeout: Duration,
    pub build_timeout: Duration,
}

/// Per-process image resolution state: a mutex per image reference and a
/// failure-cooldown timestamp per reference (§3 "Image State").
#[derive(Clone, Default)]
pub struct ImageResolver {
    locks: Arc<SyncMutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
    cooldowns: Arc<SyncMutex<HashMap<String, Instant>>>,
}

impl ImageResolver {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, image: &str) -> Arc<AsyncMutex<()>> {
        self.locks.lock().entry(image.to_string()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }

    fn cooldown_active(&self, image: &str, now: Instant) -> bool {
        self.cooldowns.lock().get(image).map(|until| *until > now).unwrap_or(false)
    }

    fn set_cooldown(&self, image: &str, until: Instant) {
        self.cooldowns.lock().insert(image.to_string(), until);
    }

    fn clear_cooldown(&self, image: &str) {
        self.cooldowns.lock().remove(image);
    }

    /// Resolve `req.image`, per the decision tree in §4.2. `budget` gates
    /// pull/build concurrency (owned by C3, passed by reference since C2
    /// never depends on C3).
    pub async fn resolve(
        &self,
        engine: &dyn ContainerEngine,
        lease: &dyn LeaseCoordinator,
        budget: &SyncMutex<ScaleOutBudget>,
        clock: &impl Clock,
        req: ResolveRequest,
        cooldown_duration: Duration,
        max_concurrent_pulls: u32,
        max_concurrent_builds: u32,
    ) -> Result<ResolveOutcome, ImageError> {
        let now = clock.now();

        // Step 1: already present locally.
        if !req.force_refresh && engine.image_exists_locally(&req.image).await? {
            return Ok(ResolveOutcome { available: true, source: ImageSource::Local, warning: None });
        }

        // Step 2: cooldown.
        if !req.force_refresh && self.cooldown_active(&req.image, now) {
            return Err(ImageError::CooldownActive);
        }

        // Step 3: per-image mutex, re-check.
        let image_lock = self.lock_for(&req.image);
        let _guard = image_lock.lock().await;
        if !req.force_refresh && engine.image_exists_locally(&req.image).await? {
            return Ok(ResolveOutcome { available: true, source: ImageSource::Local, warning: None });
        }

        // Step 4: distributed lease, else bounded wait for a peer to finish.
        let lease_key = format!("image-resolve:{}", req.image);
        let lease_timeout = req.build_timeout + req.pull_timeout + Duration::from_secs(120);
        let held = lease.try_acquire(&lease_key, lease_timeout).await;
        if held.is_none() {
            let wait_for = req.pull_timeout.max(Duration::from_secs(15));
            let deadline = Instant::now() + wait_for;
            loop {
                if engine.image_exists_locally(&req.image).await? {
                    return Ok(ResolveOutcome { available: true, source: ImageSource::Peer, warning: None });
                }
                if Instant::now() >= deadline {
                    return Err(ImageError::PeerTimeout);
                }
                tokio::time::sleep(Duration::from_millis(150)).await;
            }
        }

        // Step 5: execute the policy, bounded by concurrency counters.
        let result = self.execute_policy(engine, budget, &req, max_concurrent_pulls, max_concurrent_builds).await;

        // Step 6.
        match result {
            Ok(source) => {
                self.clear_cooldown(&req.image);
                info!(image = %req.image, ?source, "image resolved");
                Ok(ResolveOutcome { available: true, source, warning: None })
            }
            Err(err) => {
                if engine.image_exists_locally(&req.image).await.unwrap_or(false) {
                    warn!(image = %req.image, error = %err, "resolution failed, falling back to stale local copy");
                    Ok(ResolveOutcome {
                        available: true,
                        source: ImageSource::LocalFallback,
                        warning: Some(err.to_string()),
                    })
                } else {
                    self.set_cooldown(&req.image, now + cooldown_duration);
                    Err(err)
                }
            }
        }
    }

    async fn execute_policy(
        &self,
        engine: &dyn ContainerEngine,
        budget: &SyncMutex<ScaleOutBudget>,
        req: &ResolveRequest,
        max_concurrent_pulls: u32,
        max_concurrent_builds: u32,
    ) -> Result<ImageSource, ImageError> {
        match req.policy {
            ImagePolicy::PullOnly => self.try_pull(engine, budget, req, max_concurrent_pulls).await,
            ImagePolicy::BuildOnly => self.try_build(engine, budget, req, max_concurrent_builds).await,
            ImagePolicy::PullThenBuild | ImagePolicy::PreferLocal => {
                match self.try_pull(engine, budget, req, max_concurrent_pulls).await {
                    Ok(source) => Ok(source),
                    Err(_) => self.try_build(engine, budget, req, max_concurrent_builds).await,
                }
            }
            ImagePolicy::BuildThenPull => match self.try_build(engine, budget, req, max_concurrent_builds).await {
                Ok(source) => Ok(source),
                Err(_) => self.try_pull(engine, budget, req, max_concurrent_pulls).await,
            },
        }
    }

    async fn try_pull(
        &self,
        engine: &dyn ContainerEngine,
        budget: &SyncMutex<ScaleOutBudget>,
        req: &ResolveRequest,
        max_concurrent: u32,
    ) -> Result<ImageSource, ImageError> {
        loop {
            if budget.lock().try_reserve_pull(max_concurrent) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(150)).await;
        }
        let result = engine.pull_image(&req.image, req.pull_timeout, None::<&(dyn Fn(Progress) + Send + Sync)>).await;
        budget.lock().release_pull();
        result.map(|_| ImageSource::Pull).map_err(ImageError::from)
    }

    async fn try_build(
        &self,
        engine: &dyn ContainerEngine,
        budget: &SyncMutex<ScaleOutBudget>,
        req: &ResolveRequest,
        max_concurrent: u32,
    ) -> Result<ImageSource, ImageError> {
        loop {
            if budget.lock().try_reserve_build(max_concurrent) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(150)).await;
        }
        let result = engine
            .build_image(&req.image, &req.build_context, req.build_timeout, None::<&(dyn Fn(Progress) + Send + Sync)>)
            .await;
        budget.lock().release_build();
        result.map(|_| ImageSource::Build).map_err(ImageError::from)
    }
}

/// Parse pull progress of the form `"<cur>[K|M|G|T|P]B / <tot><unit>"` into a
/// 0–99% completion estimate (§4.2).
pub fn parse_pull_progress(line: &str) -> Option<u8> {
    let re = regex::Regex::new(r"(?i)([\d.]+)\s*([KMGTP]?B)\s*/\s*([\d.]+)\s*([KMGTP]?B)").ok()?;
    let caps = re.captures(line)?;
    let cur: f64 = caps.get(1)?.as_str().parse().ok()?;
    let cur_unit = unit_multiplier(caps.get(2)?.as_str());
    let tot: f64 = caps.get(3)?.as_str().parse().ok()?;
    let tot_unit = unit_multiplier(caps.get(4)?.as_str());
    let cur_bytes = cur * cur_unit;
    let tot_bytes = tot * tot_unit;
    if tot_bytes <= 0.0 {
        return None;
    }
    let pct = ((cur_bytes / tot_bytes) * 100.0).clamp(0.0, 99.0);
    Some(pct as u8)
}

/// Parse build progress of the form `"[<cur>/<tot>]"` or `"(\d{1,3})%"`.
pub fn parse_build_progress(line: &str) -> Option<u8> {
    if let Some(caps) = regex::Regex::new(r"\[(\d+)/(\d+)\]").ok()?.captures(line) {
        let cur: f64 = caps.get(1)?.as_str().parse().ok()?;
        let tot: f64 = caps.get(2)?.as_str().parse().ok()?;
        if tot <= 0.0 {
            return None;
        }
        return Some(((cur / tot) * 100.0).clamp(0.0, 99.0) as u8);
    }
    let caps = regex::Regex::new(r"(\d{1,3})%").ok()?.captures(line)?;
    caps.get(1)?.as_str().parse::<u8>().ok().map(|p| p.min(99))
}

fn unit_multiplier(unit: &str) -> f64 {
    match unit.to_ascii_uppercase().as_str() {
        "B" => 1.0,
        "KB" => 1024.0,
        "MB" => 1024f64.powi(2),
        "GB" => 1024f64.powi(3),
        "TB" => 1024f64.powi(4),
        "PB" => 1024f64.powi(5),
        _ => 1.0,
    }
}

#[cfg(test)]
#[path = "image_resolver_tests.rs"]
mod tests;
