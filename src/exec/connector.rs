// ABOUTME: Chooses where launch commands run: locally, over SSH, or through a given runner.
// ABOUTME: SSH sessions are opened per target host when an attempt needs one.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::{CommandRunner, LocalRunner, RemoteRunner, Result};
use crate::ssh::SessionConfig;

/// SSH settings shared by every host a connector reaches.
#[derive(Debug, Clone)]
pub struct SshOptions {
    pub user: String,
    pub port: u16,
    pub key_path: Option<PathBuf>,
    pub known_hosts_path: Option<PathBuf>,
    pub trust_first_connection: bool,
    pub connect_timeout: Duration,
}

impl SshOptions {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            port: 22,
            key_path: None,
            known_hosts_path: None,
            trust_first_connection: false,
            connect_timeout: Duration::from_secs(30),
        }
    }

    pub fn session_config(&self, host: &str) -> SessionConfig {
        let mut config = SessionConfig::new(host, &self.user)
            .port(self.port)
            .trust_on_first_use(self.trust_first_connection)
            .connect_timeout(self.connect_timeout);
        if let Some(key) = &self.key_path {
            config = config.key_path(key);
        }
        if let Some(known_hosts) = &self.known_hosts_path {
            config = config.known_hosts_path(known_hosts);
        }
        config
    }
}

/// Where a source's commands are executed.
#[derive(Clone)]
pub enum Connector {
    /// On the manager's machine; the target host only appears in the command.
    Local(LocalRunner),
    /// On the target host, through a fresh SSH session.
    Ssh(SshOptions),
    /// Through a runner supplied by the embedder.
    Runner(Arc<dyn CommandRunner>),
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Connector::Local(runner) => f.debug_tuple("Local").field(runner).finish(),
            Connector::Ssh(options) => f.debug_tuple("Ssh").field(options).finish(),
            Connector::Runner(runner) => f
                .debug_tuple("Runner")
                .field(&runner.location())
                .finish(),
        }
    }
}

impl Connector {
    /// Runner for commands aimed at `host`.
    pub async fn connect(&self, host: &str) -> Result<Arc<dyn CommandRunner>> {
        match self {
            Connector::Local(runner) => Ok(Arc::new(runner.clone())),
            Connector::Ssh(options) => {
                let runner = RemoteRunner::connect(options.session_config(host)).await?;
                Ok(Arc::new(runner))
            }
            Connector::Runner(runner) => Ok(Arc::clone(runner)),
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Connector::Ssh(_))
    }
}
