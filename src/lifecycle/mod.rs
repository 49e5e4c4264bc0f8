// ABOUTME: Node lifecycle engine: deploying, lost, and acquired bookkeeping.
// ABOUTME: Exports the controller, its records, events, hooks, and timeout supervisor.

mod controller;
mod error;
mod events;
mod hooks;
mod record;
mod timeout;

pub use controller::{
    BackendState, LifecycleStatus, LockedState, NodeLifecycle, NodePhase, SHUTDOWN_DESCRIPTION,
};
pub use error::{LifecycleError, LifecycleErrorKind, RejectionError};
pub use events::{NodeEvent, NodeEventKind};
pub use hooks::{LifecycleHooks, NoHooks};
pub use record::{DeployingNode, ManagerState, NodeCounts, NodeTable};
pub use timeout::{Expired, TimeoutSupervisor};

/// Result type for lifecycle operations.
pub type Result<T> = std::result::Result<T, LifecycleError>;
