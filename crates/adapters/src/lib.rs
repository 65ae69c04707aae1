#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! taskgw-adapters: trait boundaries for every external collaborator (§6)
//! plus in-memory implementations for tests and single-process deployments.

pub mod container_engine;
pub mod credentials;
pub mod error;
pub mod lease;
pub mod proxy;
pub mod publisher;
pub mod store;
pub mod worker_rpc;

pub use container_engine::{
    labels, ConnectivityMode, ContainerEngine, CreateContainerParams, FakeContainerEngine,
    ObservedContainer, Progress, StatsSample, INSIDE_CONTAINER_ENV, WORKER_PORT,
};
pub use credentials::{expand_provider_env, fan_out};
pub use error::{EngineError, RpcError, StoreError};
pub use lease::{InMemoryLeaseCoordinator, Lease, LeaseCoordinator};
pub use proxy::{InMemoryProxyRouteRegistry, ProxyRouteRegistry};
pub use publisher::{InMemoryPublisher, Publisher, UiEvent};
pub use store::{Finding, InMemoryStore, RunLogEvent, Store, TaskRecord, TaskRuntimeStateUpdate};
pub use worker_rpc::{
    DispatchJobRequest, DispatchJobResponse, FakeWorkerRpc, HubMessage, JobEvent, WorkerRpc, WorkerStatus,
};
