//! Shared error types for the runtime registry and its callers.

use thiserror::Error;

/// Errors the runtime registry can return while binding, releasing, or
/// inspecting managed containers.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no runtime entry for container id {0}")]
    NotFound(String),

    #[error("runtime {0} already bound to task {1}")]
    AlreadyBound(String, String),

    #[error("runtime {0} has no free slots")]
    NoCapacity(String),

    #[error("runtime entry failed invariant check: {0}")]
    InvariantViolation(&'static str),
}
