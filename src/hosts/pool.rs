// ABOUTME: Host allocation pool: hands out free hosts to deployment attempts on a worker pool.
// ABOUTME: Counts failures per host, retries from the same worker, and excludes exhausted hosts.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::naming::NodeNameBuilder;
use super::state::{FailureOutcome, HostTarget, PoolState};
use crate::adapter::Adapter;
use crate::diagnostics::{Diagnostics, Warning};
use crate::lifecycle::{
    LifecycleError, LifecycleHooks, LifecycleStatus, NodeEvent, NodeLifecycle, NodeTable,
    RejectionError, Result,
};
use crate::source::{NodeSource, WorkerPool};
use crate::state::SnapshotStore;
use crate::types::{DeployingNodeUrl, NodeName, RegisteredNode};

/// Consecutive failures after which a host is excluded.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Pause before a failed host is tried again.
pub const DEFAULT_WAIT_BETWEEN_FAILURES: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub failure_threshold: u32,
    pub wait_between_failures: Duration,
    /// Attempts running at once.
    pub workers: usize,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            wait_between_failures: DEFAULT_WAIT_BETWEEN_FAILURES,
            workers: 20,
        }
    }
}

/// Node source deploying onto a fixed list of hosts.
pub struct HostAllocationPool<A> {
    inner: Arc<PoolInner<A>>,
    kind: String,
}

struct PoolInner<A> {
    lifecycle: Arc<NodeLifecycle<PoolState>>,
    adapter: Arc<A>,
    naming: NodeNameBuilder,
    settings: PoolSettings,
    workers: WorkerPool,
}

impl<A> std::fmt::Debug for HostAllocationPool<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostAllocationPool")
            .field("kind", &self.kind)
            .field("lifecycle", &self.inner.lifecycle)
            .field("settings", &self.inner.settings)
            .finish()
    }
}

impl<A> HostAllocationPool<A>
where
    A: Adapter<PoolState, Target = HostTarget>,
{
    /// Open the pool for `hosts`, resuming from `snapshots` when a previous
    /// run left one.
    pub fn open(
        source: &str,
        hosts: &[HostTarget],
        adapter: A,
        settings: PoolSettings,
        snapshots: Option<Arc<dyn SnapshotStore>>,
    ) -> Result<Self> {
        if hosts.is_empty() {
            return Err(LifecycleError::Configuration(
                "a host pool needs at least one host".to_string(),
            ));
        }
        if settings.failure_threshold == 0 {
            return Err(LifecycleError::Configuration(
                "failure threshold must be at least 1".to_string(),
            ));
        }

        let adapter = Arc::new(adapter);
        let naming = NodeNameBuilder::new(source);
        let hooks = Arc::new(PoolHooks {
            adapter: Arc::clone(&adapter),
            naming: naming.clone(),
        });
        let lifecycle = NodeLifecycle::open(source, hooks, snapshots)?;

        let threshold = settings.failure_threshold;
        let recovered = lifecycle.recovered();
        lifecycle.update_backend(|state| {
            if recovered {
                for host in state.reclaim_abandoned() {
                    tracing::info!(
                        "Host {} had no running attempt after recovery, freeing it",
                        host
                    );
                }
            }
            state.seed(hosts, threshold);
        });

        let workers = WorkerPool::new(settings.workers);
        Ok(Self {
            inner: Arc::new(PoolInner {
                lifecycle,
                adapter,
                naming,
                settings,
                workers,
            }),
            kind: "hosts".to_string(),
        })
    }

    /// Registry tag reported by [`NodeSource::kind`].
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn lifecycle(&self) -> &Arc<NodeLifecycle<PoolState>> {
        &self.inner.lifecycle
    }

    pub fn adapter(&self) -> &A {
        &self.inner.adapter
    }

    /// Copy of the pool state.
    pub fn state(&self) -> PoolState {
        self.inner.lifecycle.with_backend(PoolState::clone)
    }

    /// Pop one free host and deploy on it from a worker. Returns false when
    /// no host is free.
    pub fn acquire_node(&self) -> bool {
        if self.inner.lifecycle.is_shutting_down() {
            return false;
        }
        let Some(target) = self.inner.lifecycle.update_backend(PoolState::take_next) else {
            return false;
        };

        tracing::info!(
            "Acquiring {} node(s) on host {}",
            target.count,
            target.address
        );
        let inner = Arc::clone(&self.inner);
        self.inner.workers.execute(async move {
            inner.deploy(target).await;
        });
        true
    }

    /// Acquire until the free-host table is empty.
    pub fn acquire_all_nodes(&self) -> usize {
        let mut dispatched = 0;
        while self.acquire_node() {
            dispatched += 1;
        }
        dispatched
    }

    /// Release an acquired node. The host is torn down, and its slots freed,
    /// once none of its nodes is alive.
    pub async fn remove_node(&self, node: &RegisteredNode) -> Diagnostics {
        let inner = &self.inner;
        inner
            .lifecycle
            .internal_remove_node(node, async {
                let released = inner
                    .lifecycle
                    .update_backend(|state| state.release_node(&node.name, &inner.naming))
                    .map_err(|e| LifecycleError::deployment(e.to_string()))?;
                match released {
                    Some(target) => {
                        tracing::info!(
                            "Host {} has no alive node left, tearing it down",
                            target.address
                        );
                        inner.adapter.kill_node(node, &target).await
                    }
                    None => Ok(()),
                }
            })
            .await
    }

    /// Mark a node down; tears the host down when it was its last alive node.
    pub async fn notify_down_node(&self, name: &NodeName) -> Diagnostics {
        let mut diagnostics = Diagnostics::default();
        let inner = &self.inner;

        match inner.lifecycle.update_backend(|state| state.mark_down(name)) {
            Err(e) => diagnostics.warn(Warning::untracked_node(format!(
                "Down node {} ignored: {}",
                name, e
            ))),
            Ok(None) => tracing::info!("Node {} is down", name),
            Ok(Some(target)) => {
                tracing::info!(
                    "Node {} is down and was the last alive node on {}",
                    name,
                    target.address
                );
                let node = RegisteredNode::new(name.clone(), String::new())
                    .with_host(target.address.clone());
                if let Err(e) = inner.adapter.kill_node(&node, &target).await {
                    diagnostics.warn(Warning::removal_cleanup(format!(
                        "Teardown of host {} failed: {}",
                        target.address, e
                    )));
                }
            }
        }

        diagnostics
    }

    /// A down node came back.
    pub fn on_down_node_reconnection(&self, name: &NodeName) -> Result<()> {
        self.inner
            .lifecycle
            .update_backend(|state| state.mark_reconnected(name))
            .map_err(|e| {
                tracing::warn!("Reconnection of {} ignored: {}", name, e);
                LifecycleError::UnexpectedNode(name.to_string())
            })
    }

    pub async fn wait_idle(&self) {
        self.inner.workers.wait_idle().await;
    }

    pub async fn shutdown(&self) {
        self.inner.lifecycle.shutdown().await;
        self.inner.workers.wait_idle().await;
    }
}

impl<A> PoolInner<A>
where
    A: Adapter<PoolState, Target = HostTarget>,
{
    /// Deploy on `target`, retrying from this worker until the attempt
    /// succeeds, the host is taken by someone else, or it is excluded.
    async fn deploy(&self, mut target: HostTarget) {
        let threshold = self.settings.failure_threshold;

        loop {
            if self.lifecycle.is_shutting_down() {
                return;
            }

            let address = target.address.clone();
            let alive_before = self
                .lifecycle
                .with_backend(|state| state.alive_on(&address));

            let error = match self.adapter.start_node(&self.lifecycle, &target).await {
                Ok(()) => {
                    self.lifecycle
                        .update_backend(|state| state.record_success(&address, threshold));
                    tracing::info!("Deployment on host {} succeeded", address);
                    return;
                }
                Err(e) => e,
            };

            let outcome = self.lifecycle.update_backend(|state| {
                state.record_failure(&address, target.count, alive_before, threshold)
            });
            match outcome {
                FailureOutcome::Satisfied => {
                    tracing::info!("Every node on {} registered despite: {}", address, error);
                    return;
                }
                FailureOutcome::Excluded => {
                    tracing::error!(
                        "Host {} failed {} times in a row and is excluded: {}",
                        address,
                        threshold,
                        error
                    );
                    return;
                }
                FailureOutcome::Retry { remaining } => {
                    tracing::warn!(
                        "Deployment on host {} failed ({} attempts left): {}",
                        address,
                        remaining,
                        error
                    );
                }
            }

            tokio::time::sleep(self.settings.wait_between_failures).await;

            let Some(next) = self
                .lifecycle
                .update_backend(|state| state.take_host(&address))
            else {
                tracing::debug!("Host {} was taken by another attempt", address);
                return;
            };
            self.discard_attempt(&address);
            target = next;
        }
    }

    /// Drop the deploying and lost records of earlier attempts on `address`.
    fn discard_attempt(&self, address: &str) {
        let nodes = self.lifecycle.nodes();
        let stale: Vec<DeployingNodeUrl> = nodes
            .deploying()
            .chain(nodes.lost())
            .filter(|record| self.naming.belongs_to(record.name.as_str(), address))
            .map(|record| record.url.clone())
            .collect();

        for url in stale {
            self.lifecycle.remove_deploying_node(&url);
        }
    }
}

#[async_trait]
impl<A> NodeSource for HostAllocationPool<A>
where
    A: Adapter<PoolState, Target = HostTarget>,
{
    fn name(&self) -> &str {
        self.inner.lifecycle.source()
    }

    fn kind(&self) -> &str {
        &self.kind
    }

    fn acquire_node(&self) -> Result<bool> {
        Ok(HostAllocationPool::acquire_node(self))
    }

    fn register_node(&self, node: &RegisteredNode) -> Result<()> {
        self.inner.lifecycle.register_acquired_node(node)
    }

    async fn remove_node(&self, node: &RegisteredNode) -> Diagnostics {
        HostAllocationPool::remove_node(self, node).await
    }

    async fn notify_down_node(&self, name: &NodeName) -> Diagnostics {
        HostAllocationPool::notify_down_node(self, name).await
    }

    async fn wait_idle(&self) {
        HostAllocationPool::wait_idle(self).await;
    }

    async fn shutdown(&self) {
        HostAllocationPool::shutdown(self).await;
    }

    fn status(&self) -> LifecycleStatus {
        self.inner.lifecycle.status()
    }

    fn nodes(&self) -> NodeTable {
        self.inner.lifecycle.nodes()
    }

    fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.inner.lifecycle.subscribe()
    }
}

/// Tracks registering nodes on their host before handing over to the adapter.
struct PoolHooks<A> {
    adapter: Arc<A>,
    naming: NodeNameBuilder,
}

impl<A> LifecycleHooks<PoolState> for PoolHooks<A>
where
    A: Adapter<PoolState, Target = HostTarget>,
{
    fn on_acquired_node(
        &self,
        state: &mut PoolState,
        node: &RegisteredNode,
    ) -> std::result::Result<(), RejectionError> {
        state
            .mark_alive(node, &self.naming)
            .map_err(|e| RejectionError::new(e.to_string()))?;

        if let Err(e) = self.adapter.on_acquired_node(state, node) {
            state.forget_alive(&node.name);
            return Err(e);
        }
        Ok(())
    }

    fn on_deploying_node_lost(&self, state: &mut PoolState, url: &DeployingNodeUrl) {
        self.adapter.on_deploying_node_lost(state, url);
    }
}
