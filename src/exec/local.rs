// ABOUTME: Runs shell commands on the manager's own machine via tokio::process.
// ABOUTME: Output is captured incrementally so exit can be observed without draining pipes.

use async_trait::async_trait;
use parking_lot::Mutex;
use snafu::ResultExt;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use super::error::{SpawnSnafu, WaitSnafu};
use super::{CommandOutput, CommandRunner, Result, RunningCommand};

/// How long to let output readers catch up after the process exits.
///
/// A launcher that backgrounds a long-lived child keeps the pipes open, so
/// readers are not awaited to completion.
const OUTPUT_GRACE: Duration = Duration::from_millis(200);

/// Runs commands through a local shell (`sh -c` by default).
#[derive(Debug, Clone)]
pub struct LocalRunner {
    shell: String,
}

impl Default for LocalRunner {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
        }
    }
}

impl LocalRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }

    /// Launch without boxing, for callers that keep the concrete handle.
    pub fn launch(&self, command: &str) -> Result<LocalProcess> {
        let mut child = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context(SpawnSnafu { command })?;

        let stdout = Captured::start(child.stdout.take());
        let stderr = Captured::start(child.stderr.take());

        tracing::debug!("Spawned local command (pid {:?}): {}", child.id(), command);

        Ok(LocalProcess {
            command: command.to_string(),
            child,
            stdout,
            stderr,
            exited: None,
        })
    }
}

#[async_trait]
impl CommandRunner for LocalRunner {
    fn location(&self) -> &str {
        "localhost"
    }

    async fn spawn(&self, command: &str) -> Result<Box<dyn RunningCommand>> {
        Ok(Box::new(self.launch(command)?))
    }
}

/// Output stream copied into a shared buffer as it arrives.
struct Captured {
    buffer: Arc<Mutex<Vec<u8>>>,
    reader: Option<JoinHandle<()>>,
}

impl Captured {
    fn start<R>(stream: Option<R>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let reader = stream.map(|mut stream| {
            let buffer = Arc::clone(&buffer);
            tokio::spawn(async move {
                let mut chunk = [0u8; 4096];
                loop {
                    match stream.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => buffer.lock().extend_from_slice(&chunk[..n]),
                    }
                }
            })
        });
        Self { buffer, reader }
    }

    async fn collect(&mut self) -> String {
        if let Some(reader) = self.reader.take() {
            let _ = tokio::time::timeout(OUTPUT_GRACE, reader).await;
        }
        String::from_utf8_lossy(&self.buffer.lock()).to_string()
    }
}

/// Handle to a command launched by [`LocalRunner`].
pub struct LocalProcess {
    command: String,
    child: Child,
    stdout: Captured,
    stderr: Captured,
    exited: Option<CommandOutput>,
}

impl std::fmt::Debug for LocalProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalProcess")
            .field("command", &self.command)
            .field("pid", &self.child.id())
            .field("exited", &self.exited.is_some())
            .finish()
    }
}

impl LocalProcess {
    async fn finish(&mut self, status: std::process::ExitStatus) -> CommandOutput {
        let output = CommandOutput {
            exit_code: status.code().unwrap_or(-1),
            stdout: self.stdout.collect().await,
            stderr: self.stderr.collect().await,
        };
        self.exited = Some(output.clone());
        output
    }
}

#[async_trait]
impl RunningCommand for LocalProcess {
    async fn try_exit(&mut self) -> Result<Option<CommandOutput>> {
        if let Some(output) = &self.exited {
            return Ok(Some(output.clone()));
        }

        let status = self.child.try_wait().context(WaitSnafu {
            command: self.command.as_str(),
        })?;
        match status {
            Some(status) => Ok(Some(self.finish(status).await)),
            None => Ok(None),
        }
    }

    async fn wait(&mut self) -> Result<CommandOutput> {
        if let Some(output) = &self.exited {
            return Ok(output.clone());
        }

        let status = self.child.wait().await.context(WaitSnafu {
            command: self.command.as_str(),
        })?;
        Ok(self.finish(status).await)
    }

    async fn kill(&mut self) {
        if self.exited.is_some() {
            return;
        }
        if let Err(e) = self.child.kill().await {
            tracing::debug!("Failed to kill `{}`: {}", self.command, e);
        }
    }
}
