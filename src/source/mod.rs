// ABOUTME: Node sources: a configured backend plus its lifecycle, behind one object-safe trait.
// ABOUTME: Also provides the worker pool and the tag-to-constructor registry.

mod registry;
mod worker;

pub use registry::{Registry, SourceConstructor, SourceContext};
pub use worker::WorkerPool;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::diagnostics::Diagnostics;
use crate::lifecycle::{LifecycleStatus, NodeEvent, NodeTable, Result};
use crate::types::{NodeName, RegisteredNode};

/// One named pool of nodes acquired through one deployment backend.
#[async_trait]
pub trait NodeSource: Send + Sync {
    /// Name of the source; prefixes every deploying node URL.
    fn name(&self) -> &str;

    /// Registry tag the source was built from.
    fn kind(&self) -> &str;

    /// Dispatch one acquisition attempt. Returns false when there is no
    /// capacity left to acquire.
    fn acquire_node(&self) -> Result<bool>;

    /// Dispatch attempts until no capacity is left. Returns how many were dispatched.
    fn acquire_all_nodes(&self) -> Result<usize> {
        let mut dispatched = 0;
        while self.acquire_node()? {
            dispatched += 1;
        }
        Ok(dispatched)
    }

    /// Called when a node presents itself to the manager.
    fn register_node(&self, node: &RegisteredNode) -> Result<()>;

    /// Release an acquired node and tear it down. Never fails; teardown
    /// problems come back as warnings.
    async fn remove_node(&self, node: &RegisteredNode) -> Diagnostics;

    /// The runtime lost contact with an acquired node.
    async fn notify_down_node(&self, name: &NodeName) -> Diagnostics;

    /// Wait for every dispatched attempt to finish.
    async fn wait_idle(&self);

    /// Stop acquiring, force outstanding deploying nodes to lost, and wait
    /// for in-flight attempts to notice.
    async fn shutdown(&self);

    fn status(&self) -> LifecycleStatus;

    fn nodes(&self) -> NodeTable;

    fn subscribe(&self) -> broadcast::Receiver<NodeEvent>;
}
