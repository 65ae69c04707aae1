//! The worker RPC surface (§6.4): dispatch, cancel, heartbeat, and the
//! bidirectional event hub. Grounded on the donor's remote-agent bridge,
//! which keeps one registry of handles per endpoint and bridges server-push
//! events into an mpsc channel the listener drains.

use crate::error::RpcError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Job dispatch request body (§4.4.1 step 4).
#[derive(Debug, Clone)]
pub struct DispatchJobRequest {
    pub run_id: String,
    pub branch: String,
    pub env: HashMap<String, String>,
    pub secrets: HashMap<String, String>,
    pub cpu_nanos: i64,
    pub memory_bytes: u64,
    pub timeout: Duration,
    pub attempt: u32,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct DispatchJobResponse {
    pub success: bool,
    pub error_message: Option<String>,
}

impl DispatchJobResponse {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self { success: false, error_message: Some(reason.into()) }
    }
}

/// Server-pushed job event (§6.4, §4.4.4).
#[derive(Debug, Clone)]
pub struct JobEvent {
    pub run_id: String,
    pub event_type: String,
    pub summary: Option<String>,
    pub error: Option<String>,
    pub timestamp_ms: u64,
    pub metadata: HashMap<String, String>,
}

/// Server-pushed worker status (§6.4, §4.4.6).
#[derive(Debug, Clone)]
pub struct WorkerStatus {
    pub worker_id: String,
    pub status: String,
    pub active_slots: i64,
    pub max_slots: u32,
}

/// One message off a runtime's event hub subscription.
#[derive(Debug, Clone)]
pub enum HubMessage {
    Job(JobEvent),
    Status(WorkerStatus),
}

#[async_trait]
pub trait WorkerRpc: Send + Sync + 'static {
    async fn dispatch_job(&self, endpoint: &str, request: DispatchJobRequest) -> Result<DispatchJobResponse, RpcError>;

    async fn cancel_job(&self, endpoint: &str, run_id: &str) -> Result<(), RpcError>;

    /// Used both as a real heartbeat and as the spawn "wait-ready" startup
    /// probe (§4.3.3 step 8).
    async fn heartbeat(&self, endpoint: &str, runtime_id: &str) -> Result<(), RpcError>;

    /// Subscribe to a runtime's event hub. Returns a receiver that yields
    /// messages until the connection drops (the channel closes).
    async fn subscribe(&self, endpoint: &str) -> Result<mpsc::Receiver<HubMessage>, RpcError>;
}

/// In-memory fake worker, grounded on the donor's `RemoteCoopClient` registry
/// pattern: endpoints map to a queue of canned responses/pushes that tests
/// populate ahead of time.
#[derive(Clone, Default)]
pub struct FakeWorkerRpc {
    endpoints: Arc<Mutex<HashMap<String, EndpointState>>>,
}

#[derive(Default)]
struct EndpointState {
    reachable: bool,
    dispatch_response: Option<DispatchJobResponse>,
    pending_messages: Vec<HubMessage>,
}

impl FakeWorkerRpc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_reachable(&self, endpoint: &str, reachable: bool) {
        self.endpoints.lock().entry(endpoint.to_string()).or_default().reachable = reachable;
    }

    pub fn set_dispatch_response(&self, endpoint: &str, response: DispatchJobResponse) {
        self.endpoints.lock().entry(endpoint.to_string()).or_default().dispatch_response = Some(response);
    }

    pub fn queue_message(&self, endpoint: &str, message: HubMessage) {
        self.endpoints.lock().entry(endpoint.to_string()).or_default().pending_messages.push(message);
    }
}

#[async_trait]
impl WorkerRpc for FakeWorkerRpc {
    async fn dispatch_job(&self, endpoint: &str, _request: DispatchJobRequest) -> Result<DispatchJobResponse, RpcError> {
        let endpoints = self.endpoints.lock();
        let state = endpoints.get(endpoint);
        if state.map(|s| !s.reachable).unwrap_or(false) {
            return Err(RpcError::Unavailable);
        }
        Ok(state
            .and_then(|s| s.dispatch_response.clone())
            .unwrap_or(DispatchJobResponse { success: true, error_message: None }))
    }

    async fn cancel_job(&self, endpoint: &str, _run_id: &str) -> Result<(), RpcError> {
        let reachable = self.endpoints.lock().get(endpoint).map(|s| s.reachable).unwrap_or(true);
        if !reachable {
            return Err(RpcError::Unavailable);
        }
        Ok(())
    }

    async fn heartbeat(&self, endpoint: &str, _runtime_id: &str) -> Result<(), RpcError> {
        let reachable = self.endpoints.lock().get(endpoint).map(|s| s.reachable).unwrap_or(true);
        if !reachable {
            return Err(RpcError::Unavailable);
        }
        Ok(())
    }

    async fn subscribe(&self, endpoint: &str) -> Result<mpsc::Receiver<HubMessage>, RpcError> {
        let reachable = self.endpoints.lock().get(endpoint).map(|s| s.reachable).unwrap_or(true);
        if !reachable {
            return Err(RpcError::Unavailable);
        }
        let pending = self
            .endpoints
            .lock()
            .get_mut(endpoint)
            .map(|s| std::mem::take(&mut s.pending_messages))
            .unwrap_or_default();
        let (tx, rx) = mpsc::channel(pending.len().max(1) + 8);
        for message in pending {
            let _ = tx.send(message).await;
        }
        Ok(rx)
    }
}

#[cfg(test)]
#[path = "worker_rpc_tests.rs"]
mod tests;
