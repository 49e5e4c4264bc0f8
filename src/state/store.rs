// ABOUTME: Lock-guarded state shared by every acquisition attempt of a node source.
// ABOUTME: Writes are mirrored to the snapshot store; persistence failures are only logged.

use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;

use super::error::{StateError, StateResult};
use super::snapshot::{SnapshotMeta, SnapshotRef, SnapshotStore, read_snapshot};

/// Single source of truth for a node source.
///
/// Readers share the lock, writers hold it exclusively. After a successful
/// write the whole value is serialized and handed to the snapshot store as one
/// blob, still under the lock, so snapshots are written in mutation order.
pub struct StateStore<T> {
    source: String,
    state: RwLock<T>,
    snapshots: Option<Arc<dyn SnapshotStore>>,
    recovered: bool,
}

impl<T> std::fmt::Debug for StateStore<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("source", &self.source)
            .field("persistent", &self.snapshots.is_some())
            .field("recovered", &self.recovered)
            .finish()
    }
}

impl<T> StateStore<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    /// Open the store for `source`.
    ///
    /// With `snapshots` set, the last snapshot of the source is restored when
    /// present. Without it the store lives in memory only.
    pub fn open(
        source: impl Into<String>,
        snapshots: Option<Arc<dyn SnapshotStore>>,
    ) -> StateResult<Self> {
        let source = source.into();

        let restored = match &snapshots {
            Some(store) => read_snapshot::<T>(store.as_ref(), &source)?,
            None => None,
        };

        let recovered = restored.is_some();
        let state = match restored {
            Some(snapshot) => {
                tracing::info!(
                    "Restoring state of {} written by {} (pid {}) at {}",
                    source,
                    snapshot.meta.writer,
                    snapshot.meta.pid,
                    snapshot.meta.written_at
                );
                snapshot.state
            }
            None => T::default(),
        };

        Ok(Self {
            source,
            state: RwLock::new(state),
            snapshots,
            recovered,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether the initial state came from a snapshot.
    pub fn recovered(&self) -> bool {
        self.recovered
    }

    /// Whether writes are mirrored to durable storage.
    pub fn is_persistent(&self) -> bool {
        self.snapshots.is_some()
    }

    /// Run `f` under the shared lock.
    pub fn with_read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let guard = self.state.read();
        f(&guard)
    }

    /// Run `f` under the exclusive lock, persisting when it returns `Ok`.
    ///
    /// An `Err` from `f` skips persistence. Whatever `f` changed before failing
    /// stays in memory.
    pub fn with_write<R, E>(&self, f: impl FnOnce(&mut T) -> Result<R, E>) -> Result<R, E> {
        let mut guard = self.state.write();
        let result = f(&mut guard)?;
        self.persist(&guard);
        Ok(result)
    }

    /// Run an infallible mutation under the exclusive lock and persist.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.state.write();
        let result = f(&mut guard);
        self.persist(&guard);
        result
    }

    /// Serialize the current state without touching durable storage.
    pub fn to_blob(&self) -> StateResult<Vec<u8>> {
        let guard = self.state.read();
        encode(&*guard)
    }

    fn persist(&self, state: &T) {
        let Some(store) = &self.snapshots else {
            return;
        };

        let outcome = encode(state).and_then(|blob| store.store(&self.source, &blob));
        if let Err(e) = outcome {
            tracing::error!("Failed to persist state of {}: {}", self.source, e);
        }
    }
}

fn encode<T: Serialize>(state: &T) -> StateResult<Vec<u8>> {
    let snapshot = SnapshotRef {
        meta: SnapshotMeta::current(),
        state,
    };
    serde_json::to_vec(&snapshot).map_err(|e| StateError::Serialize(e.to_string()))
}
