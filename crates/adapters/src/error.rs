//! Errors surfaced by the adapter traits (§6).

use thiserror::Error;

/// Errors the container engine adapter can return.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no such image: {0}")]
    NoSuchImage(String),

    #[error("container not found: {0}")]
    ContainerNotFound(String),

    #[error("name already in use: {0}")]
    NameAlreadyInUse(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("engine command failed: {0}")]
    CommandFailed(String),

    #[error("engine call timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl EngineError {
    /// Benign errors that callers are expected to swallow (§7): "already in
    /// use", "already exists", network-already-exists, not-found on stop.
    pub fn is_benign_on_stop(&self) -> bool {
        matches!(self, EngineError::ContainerNotFound(_))
    }

    pub fn is_name_conflict(&self) -> bool {
        matches!(self, EngineError::NameAlreadyInUse(_))
    }

    pub fn is_missing_image(&self) -> bool {
        matches!(self, EngineError::NoSuchImage(_))
    }

    pub fn is_network(&self) -> bool {
        matches!(self, EngineError::Network(_))
    }
}

/// Errors the store adapter can return.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("backend error: {0}")]
    Backend(String),
}

/// Errors the worker RPC adapter can return.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("worker unavailable")]
    Unavailable,

    #[error("worker rejected request: {0}")]
    Rejected(String),

    #[error("hub disconnected: {0}")]
    Disconnected(String),

    #[error("rpc call timed out")]
    Timeout,
}

impl RpcError {
    /// Recognised per §5: RPC status `Unavailable` or the disconnect substring.
    pub fn is_hub_disconnected(&self) -> bool {
        match self {
            RpcError::Unavailable => true,
            RpcError::Disconnected(msg) => {
                msg.contains("already been disconnected from the server")
            }
            _ => false,
        }
    }
}
