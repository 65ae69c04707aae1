//! Error types for the image resolver (C2) and lifecycle manager (C3).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("image unavailable: {0}")]
    Unavailable(String),

    #[error("cooldown active for image")]
    CooldownActive,

    #[error("lease wait timed out")]
    PeerTimeout,

    #[error("engine error: {0}")]
    Engine(#[from] taskgw_adapters::EngineError),
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("scale-out budget denied: {0}")]
    BudgetDenied(#[from] taskgw_core::BudgetDenyReason),

    #[error("no runtime lease available")]
    NoCapacity,

    #[error("image resolution failed: {0}")]
    Image(#[from] ImageError),

    #[error("engine error: {0}")]
    Engine(#[from] taskgw_adapters::EngineError),

    #[error("store error: {0}")]
    Store(#[from] taskgw_adapters::StoreError),

    #[error("worker rpc error: {0}")]
    Rpc(#[from] taskgw_adapters::RpcError),
}
