// ABOUTME: Error types for the state store and its snapshot boundary.
// ABOUTME: Persistence failures are reported here but never roll back memory.

use thiserror::Error;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur while loading or writing state snapshots.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("state directory unavailable: {0}")]
    Location(String),

    #[error("failed to read snapshot for {node_source}: {reason}")]
    Read { node_source: String, reason: String },

    #[error("failed to write snapshot for {node_source}: {reason}")]
    Write { node_source: String, reason: String },

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),
}
