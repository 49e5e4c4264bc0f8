// ABOUTME: Runs shell commands on a remote machine over an established SSH session.
// ABOUTME: Each command executes in its own channel on a background task.

use async_trait::async_trait;
use snafu::ResultExt;
use std::sync::Arc;
use tokio::task::JoinHandle;

use super::error::{ConnectSnafu, ExecError, RemoteSnafu};
use super::{CommandOutput, CommandRunner, Result, RunningCommand};
use crate::ssh::{self, Session, SessionConfig};

/// Runs commands through one shared SSH session.
#[derive(Debug, Clone)]
pub struct RemoteRunner {
    session: Arc<Session>,
}

impl RemoteRunner {
    /// Open the session described by `config`.
    pub async fn connect(config: SessionConfig) -> Result<Self> {
        let host = config.host.clone();
        let session = Session::connect(config)
            .await
            .context(ConnectSnafu { host })?;
        Ok(Self::from_session(Arc::new(session)))
    }

    pub fn from_session(session: Arc<Session>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }
}

#[async_trait]
impl CommandRunner for RemoteRunner {
    fn location(&self) -> &str {
        self.session.host()
    }

    async fn spawn(&self, command: &str) -> Result<Box<dyn RunningCommand>> {
        let session = Arc::clone(&self.session);
        let owned = command.to_string();
        let task = tokio::spawn(async move { session.exec_unbounded(&owned).await });

        tracing::debug!("Spawned remote command on {}: {}", self.session.host(), command);

        Ok(Box::new(RemoteProcess {
            command: command.to_string(),
            task: Some(task),
            exited: None,
            failure: None,
        }))
    }
}

/// A command running in an SSH channel.
///
/// Killing aborts the channel task, which closes the channel; whether the
/// remote process dies with it depends on the remote shell.
pub struct RemoteProcess {
    command: String,
    task: Option<JoinHandle<ssh::Result<ssh::CommandOutput>>>,
    exited: Option<CommandOutput>,
    /// First failure of the channel task, reported again on every later check.
    failure: Option<String>,
}

impl RemoteProcess {
    fn aborted(&self, reason: &str) -> ExecError {
        ExecError::Aborted {
            command: self.command.clone(),
            reason: reason.to_string(),
        }
    }

    async fn collect(&mut self) -> Result<CommandOutput> {
        if let Some(output) = &self.exited {
            return Ok(output.clone());
        }
        if let Some(failure) = &self.failure {
            return Err(self.aborted(failure));
        }

        let Some(task) = self.task.take() else {
            return Err(self.aborted("killed"));
        };

        let result = match task.await {
            Ok(result) => result.context(RemoteSnafu {
                command: self.command.as_str(),
            }),
            Err(e) => Err(self.aborted(&e.to_string())),
        };
        let output = match result {
            Ok(output) => output,
            Err(e) => {
                self.failure = Some(e.to_string());
                return Err(e);
            }
        };

        let output = CommandOutput {
            exit_code: i32::try_from(output.exit_code).unwrap_or(-1),
            stdout: output.stdout,
            stderr: output.stderr,
        };
        self.exited = Some(output.clone());
        Ok(output)
    }
}

#[async_trait]
impl RunningCommand for RemoteProcess {
    async fn try_exit(&mut self) -> Result<Option<CommandOutput>> {
        let finished = match &self.task {
            Some(task) => task.is_finished(),
            None => true,
        };
        if !finished {
            return Ok(None);
        }
        self.collect().await.map(Some)
    }

    async fn wait(&mut self) -> Result<CommandOutput> {
        self.collect().await
    }

    async fn kill(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            tracing::debug!("Closed remote channel running: {}", self.command);
        }
    }
}
