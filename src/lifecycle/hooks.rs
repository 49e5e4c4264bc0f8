// ABOUTME: Backend hooks invoked by the lifecycle while it holds the state lock.
// ABOUTME: Admission may reject a registering node; lost notification is best effort.

use super::error::RejectionError;
use crate::types::{DeployingNodeUrl, RegisteredNode};

/// Callbacks a backend receives on lifecycle transitions.
///
/// Both run under the exclusive state lock with mutable access to the
/// backend state, so they must be quick and must not block.
pub trait LifecycleHooks<S>: Send + Sync + 'static {
    /// Admission check for a registering node.
    fn on_acquired_node(
        &self,
        _state: &mut S,
        _node: &RegisteredNode,
    ) -> Result<(), RejectionError> {
        Ok(())
    }

    /// A deploying node left the deploying collection without registering.
    fn on_deploying_node_lost(&self, _state: &mut S, _url: &DeployingNodeUrl) {}
}

/// Hooks that accept every node and ignore lost ones.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl<S> LifecycleHooks<S> for NoHooks {}
