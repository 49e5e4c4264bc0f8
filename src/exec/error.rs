// ABOUTME: Command execution errors with SNAFU context selectors.
// ABOUTME: Every variant carries the command or host it failed on.

use snafu::Snafu;
use std::time::Duration;

/// Errors raised while launching or watching a command.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ExecError {
    #[snafu(display("failed to spawn `{command}`: {source}"))]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[snafu(display("failed to wait for `{command}`: {source}"))]
    Wait {
        command: String,
        source: std::io::Error,
    },

    #[snafu(display("connection to {host} failed: {source}"))]
    Connect {
        host: String,
        source: crate::ssh::Error,
    },

    #[snafu(display("remote execution of `{command}` failed: {source}"))]
    Remote {
        command: String,
        source: crate::ssh::Error,
    },

    #[snafu(display("`{command}` timed out after {timeout:?}"))]
    TimedOut { command: String, timeout: Duration },

    #[snafu(display("watcher of `{command}` ended abnormally: {reason}"))]
    Aborted { command: String, reason: String },
}

/// Error kind for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecErrorKind {
    /// The command could not be started.
    Launch,
    /// The command started but watching it failed.
    Monitor,
    /// The command did not finish in time.
    Timeout,
}

impl ExecError {
    /// Returns the error kind for programmatic handling.
    pub fn kind(&self) -> ExecErrorKind {
        match self {
            ExecError::Spawn { .. } | ExecError::Connect { .. } => ExecErrorKind::Launch,
            ExecError::Wait { .. } | ExecError::Remote { .. } | ExecError::Aborted { .. } => {
                ExecErrorKind::Monitor
            }
            ExecError::TimedOut { .. } => ExecErrorKind::Timeout,
        }
    }
}
