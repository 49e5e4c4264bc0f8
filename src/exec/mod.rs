// ABOUTME: Command execution seam used by deployment adapters.
// ABOUTME: Launches shell commands locally or over SSH and watches them without blocking.

mod connector;
mod error;
mod local;
mod remote;
mod template;

pub use connector::{Connector, SshOptions};
pub use error::{ExecError, ExecErrorKind};
pub use local::{LocalProcess, LocalRunner};
pub use remote::{RemoteProcess, RemoteRunner};
pub use template::{CommandTemplate, HIDDEN_CREDENTIALS, TemplateError, TemplateVars};

use async_trait::async_trait;
use std::time::Duration;

/// Result type for command execution.
pub type Result<T> = std::result::Result<T, ExecError>;

/// Output of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; -1 when the process was terminated by a signal.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Launches shell commands somewhere.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Where commands run, for logs and descriptions.
    fn location(&self) -> &str;

    /// Launch `command` and return a handle to watch it.
    async fn spawn(&self, command: &str) -> Result<Box<dyn RunningCommand>>;

    /// Run `command` to completion, killing it after `timeout`.
    async fn run(&self, command: &str, timeout: Duration) -> Result<CommandOutput> {
        let mut process = self.spawn(command).await?;
        match tokio::time::timeout(timeout, process.wait()).await {
            Ok(output) => output,
            Err(_) => {
                process.kill().await;
                Err(ExecError::TimedOut {
                    command: command.to_string(),
                    timeout,
                })
            }
        }
    }
}

/// A launched command.
#[async_trait]
pub trait RunningCommand: Send {
    /// Output if the command has exited, without waiting.
    async fn try_exit(&mut self) -> Result<Option<CommandOutput>>;

    /// Wait for the command to exit.
    async fn wait(&mut self) -> Result<CommandOutput>;

    /// Best-effort termination. No-op once the command has exited.
    async fn kill(&mut self);
}
