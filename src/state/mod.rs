// ABOUTME: State store for node sources with snapshot-based recovery.
// ABOUTME: Exposes the lock-guarded store and the durable snapshot boundary.

mod error;
mod snapshot;
mod store;

pub use error::{StateError, StateResult};
pub use snapshot::{
    FileSnapshotStore, MemorySnapshotStore, STATE_DIR, Snapshot, SnapshotMeta, SnapshotStore,
    read_snapshot,
};
pub use store::StateStore;
