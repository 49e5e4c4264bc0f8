// ABOUTME: Durable snapshot boundary: one serialized blob per node source.
// ABOUTME: File-backed store under ~/.local/state/kahua/ plus an in-memory store.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::error::{StateError, StateResult};

/// Base directory for kahua state files (XDG Base Directory compliant).
pub const STATE_DIR: &str = ".local/state/kahua";

/// Where snapshots of a node source's state live.
///
/// Implementations must treat a missing blob as `Ok(None)`: a source that has
/// never persisted anything is a normal first start.
pub trait SnapshotStore: Send + Sync {
    fn load(&self, source: &str) -> StateResult<Option<Vec<u8>>>;
    fn store(&self, source: &str, blob: &[u8]) -> StateResult<()>;
    fn remove(&self, source: &str) -> StateResult<()>;
}

/// Information about who wrote a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMeta {
    /// Hostname of the machine running the manager.
    pub writer: String,
    /// Process ID of the manager.
    pub pid: u32,
    /// When the snapshot was written.
    pub written_at: DateTime<Utc>,
}

impl SnapshotMeta {
    pub fn current() -> Self {
        Self {
            writer: gethostname::gethostname().to_string_lossy().into_owned(),
            pid: std::process::id(),
            written_at: Utc::now(),
        }
    }
}

/// A snapshot as stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot<T> {
    pub meta: SnapshotMeta,
    pub state: T,
}

#[derive(Serialize)]
pub(super) struct SnapshotRef<'a, T> {
    pub meta: SnapshotMeta,
    pub state: &'a T,
}

/// Load and decode the snapshot of `source`, if one exists.
pub fn read_snapshot<T>(store: &dyn SnapshotStore, source: &str) -> StateResult<Option<Snapshot<T>>>
where
    T: for<'de> Deserialize<'de>,
{
    match store.load(source)? {
        None => Ok(None),
        Some(blob) => serde_json::from_slice(&blob)
            .map(Some)
            .map_err(|e| StateError::Deserialize(format!("snapshot of {source}: {e}"))),
    }
}

/// Snapshots stored as one JSON file per source.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store rooted at `$HOME/.local/state/kahua`.
    pub fn default_location() -> StateResult<Self> {
        let home = std::env::var("HOME")
            .map_err(|_| StateError::Location("HOME is not set".to_string()))?;
        Ok(Self::new(Path::new(&home).join(STATE_DIR)))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path to the snapshot file for a source.
    pub fn path_for(&self, source: &str) -> PathBuf {
        self.dir.join(format!("{source}.json"))
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn load(&self, source: &str) -> StateResult<Option<Vec<u8>>> {
        match std::fs::read(self.path_for(source)) {
            Ok(blob) => Ok(Some(blob)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StateError::Read {
                node_source: source.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    fn store(&self, source: &str, blob: &[u8]) -> StateResult<()> {
        let write_err = |e: std::io::Error| StateError::Write {
            node_source: source.to_string(),
            reason: e.to_string(),
        };

        std::fs::create_dir_all(&self.dir).map_err(write_err)?;

        // Readers never observe a half-written file
        let tmp = self.dir.join(format!(".{source}.json.tmp"));
        std::fs::write(&tmp, blob).map_err(write_err)?;
        std::fs::rename(&tmp, self.path_for(source)).map_err(write_err)
    }

    fn remove(&self, source: &str) -> StateResult<()> {
        match std::fs::remove_file(self.path_for(source)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StateError::Write {
                node_source: source.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

/// Snapshots kept in process memory.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sources with a stored snapshot.
    pub fn len(&self) -> usize {
        self.blobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.lock().is_empty()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn load(&self, source: &str) -> StateResult<Option<Vec<u8>>> {
        Ok(self.blobs.lock().get(source).cloned())
    }

    fn store(&self, source: &str, blob: &[u8]) -> StateResult<()> {
        self.blobs.lock().insert(source.to_string(), blob.to_vec());
        Ok(())
    }

    fn remove(&self, source: &str) -> StateResult<()> {
        self.blobs.lock().remove(source);
        Ok(())
    }
}
