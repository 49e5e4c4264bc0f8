// ABOUTME: Errors of the SSH transport used to reach hosts and scheduler front ends.
// ABOUTME: Connection, authentication, and channel failures name the remote end.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot reach {host}: {reason}")]
    Connect { host: String, reason: String },

    #[error("no credential accepted for {user}@{host}")]
    AuthenticationFailed { user: String, host: String },

    #[error("ssh agent: {0}")]
    Agent(String),

    #[error("failed to load key from {path}: {reason}")]
    KeyLoadFailed { path: PathBuf, reason: String },

    #[error("channel error: {0}")]
    Channel(String),

    #[error("remote command timed out after {0:?}")]
    CommandTimeout(Duration),

    /// The channel closed before the remote command reported how it exited.
    #[error("remote command ended without an exit status")]
    NoExitStatus,

    #[error(transparent)]
    Protocol(#[from] russh::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
