// ABOUTME: SSH settings of a node source: user, port, key, and host key policy.
// ABOUTME: Converted into the connector options used for every host of the source.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::exec::SshOptions;

#[derive(Debug, Clone, Deserialize)]
pub struct SshConfig {
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub key_path: Option<PathBuf>,
    #[serde(default)]
    pub known_hosts_path: Option<PathBuf>,
    /// Learn unknown host keys instead of refusing them.
    #[serde(default)]
    pub trust_first_connection: bool,
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,
}

fn default_port() -> u16 {
    22
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: None,
            port: default_port(),
            key_path: None,
            known_hosts_path: None,
            trust_first_connection: false,
            connect_timeout: default_connect_timeout(),
        }
    }
}

impl SshConfig {
    /// User to log in as; falls back to `$USER`, then `root`.
    pub fn user(&self) -> String {
        self.user
            .clone()
            .or_else(|| std::env::var("USER").ok())
            .unwrap_or_else(|| "root".to_string())
    }

    pub fn options(&self) -> SshOptions {
        SshOptions {
            user: self.user(),
            port: self.port,
            key_path: self.key_path.clone(),
            known_hosts_path: self.known_hosts_path.clone(),
            trust_first_connection: self.trust_first_connection,
            connect_timeout: self.connect_timeout,
        }
    }
}
