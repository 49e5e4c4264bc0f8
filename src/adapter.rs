// ABOUTME: Contract a concrete deployment backend implements.
// ABOUTME: Start and kill are async; admission and lost hooks run under the state lock.

use async_trait::async_trait;

use crate::lifecycle::{BackendState, LifecycleError, LifecycleHooks, NodeLifecycle};
use crate::types::RegisteredNode;

/// Platform-specific deployment strategy.
///
/// `start_node` must create its deploying nodes through
/// [`NodeLifecycle::add_deploying_node`] before issuing any remote command, so
/// that a failure is always observable as a lost node. `kill_node` errors are
/// logged by the caller and never undo bookkeeping.
#[async_trait]
pub trait Adapter<S: BackendState>: LifecycleHooks<S> {
    /// What one acquisition attempt deploys onto (a host, a queue, ...).
    type Target: Send + Sync;

    async fn start_node(
        &self,
        lifecycle: &NodeLifecycle<S>,
        target: &Self::Target,
    ) -> Result<(), LifecycleError>;

    async fn kill_node(
        &self,
        node: &RegisteredNode,
        target: &Self::Target,
    ) -> Result<(), LifecycleError>;
}
