//! Errors surfaced by the dispatcher and event listener (§7, §10.3).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("store error: {0}")]
    Store(#[from] taskgw_adapters::StoreError),

    #[error("lifecycle error: {0}")]
    Lifecycle(#[from] taskgw_engine::LifecycleError),

    #[error("worker rpc error: {0}")]
    Rpc(#[from] taskgw_adapters::RpcError),
}
