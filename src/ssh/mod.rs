// ABOUTME: SSH client module for remote deployment hosts and batch front-ends.
// ABOUTME: Supports SSH agent and key-based authentication with known_hosts verification.

mod client;
mod error;

pub use client::{CommandOutput, HostKeyPolicy, Session, SessionConfig};
pub use error::{Error, Result};
