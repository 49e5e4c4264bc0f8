// ABOUTME: The deploying/lost/acquired state machine shared by every node source.
// ABOUTME: All transitions run under the state lock; events and timer changes follow it.

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use super::error::{LifecycleError, RejectionError};
use super::events::{NodeEvent, NodeEventKind};
use super::hooks::LifecycleHooks;
use super::record::{DeployingNode, ManagerState, NodeCounts, NodeTable};
use super::timeout::{Expired, TimeoutSupervisor};
use crate::diagnostics::{Diagnostics, Warning};
use crate::state::{SnapshotStore, StateStore};
use crate::types::{DeployingNodeUrl, NodeName, RegisteredNode};

/// Capacity of the event channel; slow subscribers miss older events.
const EVENT_CAPACITY: usize = 1024;

/// Description given to deploying nodes forced to lost by a shutdown.
pub const SHUTDOWN_DESCRIPTION: &str = "Node source shut down before the node registered.";

/// Bounds every backend state type must meet to be persisted with the lifecycle.
pub trait BackendState: Serialize + DeserializeOwned + Default + Send + Sync + 'static {}

impl<T> BackendState for T where
    T: Serialize + DeserializeOwned + Default + Send + Sync + 'static
{
}

/// Side effects collected under the lock and applied once it is released.
enum Effect {
    Emit(NodeEvent),
    Cancel(DeployingNodeUrl),
}

/// Exclusive view of a lifecycle's state, handed to callbacks run under the lock.
pub struct LockedState<'a, S> {
    source: &'a str,
    state: &'a mut ManagerState<S>,
    hooks: &'a dyn LifecycleHooks<S>,
    effects: &'a mut Vec<Effect>,
}

impl<S: 'static> LockedState<'_, S> {
    pub fn nodes(&self) -> &NodeTable {
        &self.state.nodes
    }

    pub fn backend(&self) -> &S {
        &self.state.backend
    }

    pub fn backend_mut(&mut self) -> &mut S {
        &mut self.state.backend
    }

    pub fn is_acquired(&self, name: &NodeName) -> bool {
        self.state.nodes.is_acquired(name)
    }

    /// Move a deploying record to the lost collection.
    ///
    /// Returns false when the record is not deploying (already lost, removed,
    /// or promoted to acquired).
    pub fn declare_lost(&mut self, url: &DeployingNodeUrl, description: impl Into<String>) -> bool {
        let Some(mut record) = self.state.nodes.deploying.remove(url) else {
            return false;
        };

        record.lost = true;
        record.description = description.into();
        tracing::info!("Deploying node {} declared lost: {}", url, record.description);

        self.hooks
            .on_deploying_node_lost(&mut self.state.backend, url);

        self.effects.push(Effect::Cancel(url.clone()));
        self.effects.push(Effect::Emit(NodeEvent::new(
            NodeEventKind::Lost,
            self.source,
            record.name.as_str(),
            url.as_str(),
            record.description.clone(),
        )));
        self.state.nodes.lost.insert(url.clone(), record);
        true
    }
}

enum Registration {
    Accepted,
    Unexpected,
    Rejected(RejectionError),
}

/// Where a deploying node URL stands, read in one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodePhase {
    Deploying,
    Lost,
    Acquired,
    /// Removed, or never added.
    Unknown,
}

/// Point-in-time view of a lifecycle, for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct LifecycleStatus {
    pub source: String,
    pub counts: NodeCounts,
    pub shutting_down: bool,
    pub persistent: bool,
}

/// Node lifecycle controller for one node source.
pub struct NodeLifecycle<S> {
    source: String,
    store: StateStore<ManagerState<S>>,
    hooks: Arc<dyn LifecycleHooks<S>>,
    timeouts: TimeoutSupervisor,
    events: broadcast::Sender<NodeEvent>,
    tickets: AtomicU64,
    shutting_down: AtomicBool,
    expiry_loop: Mutex<Option<JoinHandle<()>>>,
}

impl<S> std::fmt::Debug for NodeLifecycle<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeLifecycle")
            .field("source", &self.source)
            .field("store", &self.store)
            .field("shutting_down", &self.shutting_down.load(Ordering::SeqCst))
            .finish()
    }
}

impl<S: BackendState> NodeLifecycle<S> {
    /// Lifecycle kept in memory only.
    pub fn new(
        source: &str,
        hooks: Arc<dyn LifecycleHooks<S>>,
    ) -> Result<Arc<Self>, LifecycleError> {
        Self::open(source, hooks, None)
    }

    /// Lifecycle persisted to `snapshots`, resuming from the last snapshot if any.
    ///
    /// Must be called within a tokio runtime: the timeout supervisor and the
    /// expiry loop are spawned here.
    pub fn open(
        source: &str,
        hooks: Arc<dyn LifecycleHooks<S>>,
        snapshots: Option<Arc<dyn SnapshotStore>>,
    ) -> Result<Arc<Self>, LifecycleError> {
        if source.is_empty() || source.chars().any(|c| c.is_whitespace() || c == '/') {
            return Err(LifecycleError::Configuration(format!(
                "invalid node source name '{source}'"
            )));
        }

        let store = StateStore::open(source, snapshots)?;
        let (expired_tx, expired_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let lifecycle = Arc::new(Self {
            source: source.to_string(),
            store,
            hooks,
            timeouts: TimeoutSupervisor::start(expired_tx),
            events,
            tickets: AtomicU64::new(1),
            shutting_down: AtomicBool::new(false),
            expiry_loop: Mutex::new(None),
        });

        let expiry = tokio::spawn(run_expiry_loop(Arc::downgrade(&lifecycle), expired_rx));
        *lifecycle.expiry_loop.lock() = Some(expiry);

        if lifecycle.store.recovered() {
            lifecycle.rearm_recovered();
        }

        Ok(lifecycle)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.events.subscribe()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Whether the state was restored from a snapshot.
    pub fn recovered(&self) -> bool {
        self.store.recovered()
    }

    // =========================================================================
    // Deploying nodes
    // =========================================================================

    /// Create a deploying node and arm its deadline.
    ///
    /// Fails with `DuplicateName` if the name is malformed or already tracked,
    /// `Configuration` for a zero timeout, and `ShuttingDown` once shutdown
    /// has started.
    pub fn add_deploying_node(
        &self,
        name: &str,
        command: &str,
        description: &str,
        timeout: Duration,
    ) -> Result<DeployingNodeUrl, LifecycleError> {
        if self.is_shutting_down() {
            return Err(LifecycleError::ShuttingDown(self.source.clone()));
        }

        let name = NodeName::new(name).map_err(|e| LifecycleError::DuplicateName {
            name: name.to_string(),
            reason: e.to_string(),
        })?;

        if timeout.is_zero() {
            return Err(LifecycleError::Configuration(format!(
                "timeout of deploying node {name} must be positive"
            )));
        }

        let url = DeployingNodeUrl::for_node(&self.source, &name);
        let ticket = self.tickets.fetch_add(1, Ordering::SeqCst);
        let record = DeployingNode {
            url: url.clone(),
            name: name.clone(),
            command: command.to_string(),
            description: description.to_string(),
            created_at: Utc::now(),
            timeout,
            lost: false,
            source: self.source.clone(),
            ticket,
        };

        self.transact(|locked| {
            // Re-checked under the lock so shutdown's forced pass sees every record
            if self.is_shutting_down() {
                return Err(LifecycleError::ShuttingDown(self.source.clone()));
            }

            let nodes = &mut locked.state.nodes;
            if nodes.get(&url).is_some() {
                return Err(LifecycleError::DuplicateName {
                    name: name.to_string(),
                    reason: "a deploying or lost node already uses this name".to_string(),
                });
            }
            if nodes.is_acquired(&name) {
                return Err(LifecycleError::DuplicateName {
                    name: name.to_string(),
                    reason: "a node with this name is already acquired".to_string(),
                });
            }

            nodes.using_deploying_nodes = true;
            nodes.deploying.insert(url.clone(), record);
            locked.effects.push(Effect::Emit(NodeEvent::new(
                NodeEventKind::Added,
                &self.source,
                name.as_str(),
                url.as_str(),
                description,
            )));
            Ok(())
        })?;

        tracing::info!("Deploying node {} added (timeout {:?})", url, timeout);
        self.timeouts.arm(url.clone(), ticket, timeout);
        Ok(url)
    }

    /// Replace the free-text description of a deploying or lost record.
    pub fn update_deploying_node_description(
        &self,
        url: &DeployingNodeUrl,
        description: impl Into<String>,
    ) -> bool {
        let description = description.into();
        self.mutate(|locked| {
            let nodes = &mut locked.state.nodes;
            match nodes.deploying.get_mut(url).or_else(|| nodes.lost.get_mut(url)) {
                Some(record) => {
                    record.description = description;
                    true
                }
                None => false,
            }
        })
    }

    /// Atomically move a deploying record to lost. Returns whether it did anything.
    pub fn declare_deploying_node_lost(
        &self,
        url: &DeployingNodeUrl,
        description: impl Into<String>,
    ) -> bool {
        let description = description.into();
        self.mutate(|locked| locked.declare_lost(url, description))
    }

    /// Remove a deploying or lost record.
    ///
    /// A record that was still deploying notifies the backend's lost hook,
    /// since its deployment will never complete.
    pub fn remove_deploying_node(&self, url: &DeployingNodeUrl) -> bool {
        self.mutate(|locked| {
            let record = match locked.state.nodes.deploying.remove(url) {
                Some(record) => {
                    locked
                        .hooks
                        .on_deploying_node_lost(&mut locked.state.backend, url);
                    locked.effects.push(Effect::Cancel(url.clone()));
                    record
                }
                None => match locked.state.nodes.lost.remove(url) {
                    Some(record) => record,
                    None => return false,
                },
            };

            locked.effects.push(Effect::Emit(NodeEvent::new(
                NodeEventKind::Removed,
                locked.source,
                record.name.as_str(),
                url.as_str(),
                record.description,
            )));
            true
        })
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Promote a registering node to acquired.
    ///
    /// With the deploying protocol in use, the node must match a record still
    /// in the deploying collection; otherwise `UnexpectedNode` is returned and
    /// the caller must reject the node. A node refused by the admission hook is
    /// moved to lost and `Rejected` is returned.
    pub fn register_acquired_node(&self, node: &RegisteredNode) -> Result<(), LifecycleError> {
        let outcome = self.mutate(|locked| {
            if !locked.state.nodes.using_deploying_nodes {
                return match locked
                    .hooks
                    .on_acquired_node(&mut locked.state.backend, node)
                {
                    Ok(()) => {
                        locked.acquire(node);
                        Registration::Accepted
                    }
                    Err(e) => Registration::Rejected(e),
                };
            }

            let url = DeployingNodeUrl::for_node(locked.source, &node.name);
            let Some(record) = locked.state.nodes.deploying.remove(&url) else {
                return Registration::Unexpected;
            };

            match locked
                .hooks
                .on_acquired_node(&mut locked.state.backend, node)
            {
                Ok(()) => {
                    locked.effects.push(Effect::Cancel(url.clone()));
                    locked.acquire(node);
                    Registration::Accepted
                }
                Err(e) => {
                    // Put it back so the rejection goes through the lost transition
                    locked.state.nodes.deploying.insert(url.clone(), record);
                    locked.declare_lost(&url, format!("Node rejected at registration: {e}"));
                    Registration::Rejected(e)
                }
            }
        });

        match outcome {
            Registration::Accepted => {
                tracing::info!("Node {} acquired ({})", node.name, node.url);
                Ok(())
            }
            Registration::Unexpected => {
                tracing::warn!("Not expected node {} registered, discarding it", node.name);
                Err(LifecycleError::UnexpectedNode(node.name.to_string()))
            }
            Registration::Rejected(source) => Err(LifecycleError::Rejected {
                node: node.name.to_string(),
                source,
            }),
        }
    }

    /// Test acquired membership and run exactly one callback, under the lock.
    ///
    /// Callback errors are logged and swallowed. Returns whether the node was
    /// acquired.
    pub fn check_node_is_acquired_and_do<F, G, E>(
        &self,
        name: &NodeName,
        on_found: F,
        on_not_found: G,
    ) -> bool
    where
        F: FnOnce(&mut LockedState<'_, S>) -> Result<(), E>,
        G: FnOnce(&mut LockedState<'_, S>) -> Result<(), E>,
        E: Display,
    {
        self.mutate(|locked| {
            let found = locked.is_acquired(name);
            let outcome = if found {
                on_found(locked)
            } else {
                on_not_found(locked)
            };
            if let Err(e) = outcome {
                tracing::error!("Callback for node {} failed: {}", name, e);
            }
            found
        })
    }

    // =========================================================================
    // Removal
    // =========================================================================

    /// Release an acquired node, then run the backend's removal.
    ///
    /// The bookkeeping removal is never undone: a failing `backend_removal`
    /// only produces a warning.
    pub async fn internal_remove_node<F>(
        &self,
        node: &RegisteredNode,
        backend_removal: F,
    ) -> Diagnostics
    where
        F: Future<Output = Result<(), LifecycleError>>,
    {
        let released = self.mutate(|locked| {
            if !locked.state.nodes.acquired.remove(&node.name) {
                return false;
            }
            locked.effects.push(Effect::Emit(NodeEvent::new(
                NodeEventKind::Released,
                locked.source,
                node.name.as_str(),
                node.url.as_str(),
                "Node released",
            )));
            true
        });

        let mut diagnostics = Diagnostics::default();
        if !released {
            diagnostics.warn(Warning::untracked_node(format!(
                "Node {} was not in the acquired set of {}",
                node.name, self.source
            )));
        }

        if let Err(e) = backend_removal.await {
            diagnostics.warn(Warning::removal_cleanup(format!(
                "Removal of node {} on {} failed: {}",
                node.name, self.source, e
            )));
        }

        diagnostics
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn deploying_nodes(&self) -> Vec<DeployingNode> {
        self.store
            .with_read(|state| state.nodes.deploying().cloned().collect())
    }

    pub fn lost_nodes(&self) -> Vec<DeployingNode> {
        self.store
            .with_read(|state| state.nodes.lost().cloned().collect())
    }

    /// Deploying or lost record for `url`.
    pub fn deploying_node(&self, url: &DeployingNodeUrl) -> Option<DeployingNode> {
        self.store.with_read(|state| state.nodes.get(url).cloned())
    }

    pub fn acquired_nodes(&self) -> Vec<NodeName> {
        self.store
            .with_read(|state| state.nodes.acquired().cloned().collect())
    }

    pub fn is_acquired(&self, name: &NodeName) -> bool {
        self.store.with_read(|state| state.nodes.is_acquired(name))
    }

    pub fn is_deploying(&self, url: &DeployingNodeUrl) -> bool {
        self.store.with_read(|state| state.nodes.is_deploying(url))
    }

    pub fn is_lost(&self, url: &DeployingNodeUrl) -> bool {
        self.store.with_read(|state| state.nodes.is_lost(url))
    }

    /// Phase of the node behind `url`, checked under one read lock so a
    /// concurrent registration is never seen half done.
    pub fn phase(&self, url: &DeployingNodeUrl) -> NodePhase {
        self.store.with_read(|state| {
            let nodes = &state.nodes;
            if nodes.is_deploying(url) {
                NodePhase::Deploying
            } else if nodes.is_lost(url) {
                NodePhase::Lost
            } else if url
                .node_name()
                .is_some_and(|name| nodes.acquired().any(|n| n.as_str() == name))
            {
                NodePhase::Acquired
            } else {
                NodePhase::Unknown
            }
        })
    }

    /// Copy of the node collections.
    pub fn nodes(&self) -> NodeTable {
        self.store.with_read(|state| state.nodes.clone())
    }

    pub fn status(&self) -> LifecycleStatus {
        LifecycleStatus {
            source: self.source.clone(),
            counts: self.store.with_read(|state| state.nodes.counts()),
            shutting_down: self.is_shutting_down(),
            persistent: self.store.is_persistent(),
        }
    }

    /// Read the backend state under the shared lock.
    pub fn with_backend<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        self.store.with_read(|state| f(&state.backend))
    }

    /// Mutate the backend state under the exclusive lock and persist.
    pub fn update_backend<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        self.store.update(|state| f(&mut state.backend))
    }

    /// Run `f` with exclusive access to nodes and backend state.
    pub fn with_locked<R>(&self, f: impl FnOnce(&mut LockedState<'_, S>) -> R) -> R {
        self.mutate(f)
    }

    /// Serialized form of the state as it would be persisted.
    pub fn snapshot_blob(&self) -> Result<Vec<u8>, LifecycleError> {
        Ok(self.store.to_blob()?)
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Stop accepting deploying nodes, cancel every deadline, and force every
    /// remaining deploying record to lost.
    ///
    /// In-flight attempts notice the lost record on their next poll.
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }

        self.timeouts.shutdown().await;

        let forced = self.mutate(|locked| {
            let urls: Vec<_> = locked.state.nodes.deploying.keys().cloned().collect();
            urls.iter()
                .filter(|url| locked.declare_lost(url, SHUTDOWN_DESCRIPTION))
                .count()
        });

        let expiry = self.expiry_loop.lock().take();
        if let Some(expiry) = expiry {
            expiry.abort();
        }

        tracing::info!(
            "Node source {} shut down, {} deploying nodes forced to lost",
            self.source,
            forced
        );
    }

    // =========================================================================
    // Internal Helpers
    // =========================================================================

    /// Fallible transition: persisted only when `f` succeeds.
    fn transact<R, E>(
        &self,
        f: impl FnOnce(&mut LockedState<'_, S>) -> Result<R, E>,
    ) -> Result<R, E> {
        let mut effects = Vec::new();
        let result = self.store.with_write(|state| {
            let mut locked = LockedState {
                source: &self.source,
                state,
                hooks: self.hooks.as_ref(),
                effects: &mut effects,
            };
            f(&mut locked)
        });
        self.apply(effects);
        result
    }

    /// Infallible transition, always persisted.
    fn mutate<R>(&self, f: impl FnOnce(&mut LockedState<'_, S>) -> R) -> R {
        let mut effects = Vec::new();
        let result = self.store.update(|state| {
            let mut locked = LockedState {
                source: &self.source,
                state,
                hooks: self.hooks.as_ref(),
                effects: &mut effects,
            };
            f(&mut locked)
        });
        self.apply(effects);
        result
    }

    fn apply(&self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Emit(event) => {
                    // No subscribers is fine
                    let _ = self.events.send(event);
                }
                Effect::Cancel(url) => self.timeouts.cancel(&url),
            }
        }
    }

    fn expire(&self, url: &DeployingNodeUrl, ticket: u64) {
        let lost = self.mutate(|locked| {
            let Some(record) = locked.state.nodes.deploying.get(url) else {
                return false;
            };
            if record.ticket != ticket {
                return false;
            }
            let description = format!(
                "Timeout occurred after {} ms.",
                record.timeout.as_millis()
            );
            locked.declare_lost(url, description)
        });

        if lost {
            tracing::warn!("Deploying node {} timed out", url);
        }
    }

    fn rearm_recovered(&self) {
        let now = Utc::now();
        let rearm: Vec<_> = self.mutate(|locked| {
            locked
                .state
                .nodes
                .deploying
                .values_mut()
                .map(|record| {
                    record.ticket = self.tickets.fetch_add(1, Ordering::SeqCst);
                    (record.url.clone(), record.ticket, record.remaining(now))
                })
                .collect()
        });

        for (url, ticket, remaining) in rearm {
            tracing::info!("Re-arming recovered deploying node {} ({:?} left)", url, remaining);
            self.timeouts.arm(url, ticket, remaining);
        }
    }
}

impl<S> LockedState<'_, S> {
    fn acquire(&mut self, node: &RegisteredNode) {
        self.state.nodes.acquired.insert(node.name.clone());
        self.effects.push(Effect::Emit(NodeEvent::new(
            NodeEventKind::Acquired,
            self.source,
            node.name.as_str(),
            node.url.as_str(),
            "Node registered",
        )));
    }
}

async fn run_expiry_loop<S: BackendState>(
    lifecycle: Weak<NodeLifecycle<S>>,
    mut expired: mpsc::UnboundedReceiver<Expired>,
) {
    while let Some(Expired { url, ticket }) = expired.recv().await {
        let Some(lifecycle) = lifecycle.upgrade() else {
            break;
        };
        lifecycle.expire(&url, ticket);
    }
}
