// ABOUTME: Settings of each infrastructure kind, parsed from the infrastructure section.
// ABOUTME: Host lists, command templates, batch limits, and their timing defaults.

use nonempty::NonEmpty;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::SshConfig;
use super::deserialize::{
    deserialize_hosts_option, deserialize_template, deserialize_template_option,
};
use crate::batch::{BatchSettings, DEFAULT_BATCH_NODE_TIMEOUT, POLL_INTERVAL};
use crate::error::{Error, Result};
use crate::exec::CommandTemplate;
use crate::hosts::{
    DEFAULT_FAILURE_THRESHOLD, DEFAULT_NODE_TIMEOUT, DEFAULT_WAIT_BETWEEN_FAILURES, HostTarget,
    PoolSettings, parse_hosts_file,
};

/// `ssh` and `script` kinds: a fixed list of hosts.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostsConfig {
    #[serde(default, deserialize_with = "deserialize_hosts_option")]
    pub hosts: Option<NonEmpty<HostTarget>>,

    /// One `host [count]` per line, relative to the configuration file.
    #[serde(default)]
    pub hosts_file: Option<PathBuf>,

    /// Run once per node.
    #[serde(deserialize_with = "deserialize_template")]
    pub command: CommandTemplate,

    /// Run on a host once its last node is removed.
    #[serde(default, deserialize_with = "deserialize_template_option")]
    pub removal_command: Option<CommandTemplate>,

    #[serde(default = "default_host_node_timeout", with = "humantime_serde")]
    pub node_timeout: Duration,

    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_wait_between_failures", with = "humantime_serde")]
    pub wait_between_failures: Duration,

    #[serde(default)]
    pub ssh: Option<SshConfig>,
}

fn default_host_node_timeout() -> Duration {
    DEFAULT_NODE_TIMEOUT
}

fn default_failure_threshold() -> u32 {
    DEFAULT_FAILURE_THRESHOLD
}

fn default_wait_between_failures() -> Duration {
    DEFAULT_WAIT_BETWEEN_FAILURES
}

impl HostsConfig {
    /// Inline hosts followed by the hosts file, if any.
    pub fn targets(&self, base_dir: &Path) -> Result<Vec<HostTarget>> {
        let mut targets: Vec<HostTarget> = self
            .hosts
            .iter()
            .flat_map(|hosts| hosts.iter().cloned())
            .collect();

        if let Some(file) = &self.hosts_file {
            let path = base_dir.join(file);
            let content = std::fs::read_to_string(&path)?;
            let listed = parse_hosts_file(&content).map_err(|source| Error::HostsFile {
                path: path.clone(),
                source,
            })?;
            targets.extend(listed);
        }

        if targets.is_empty() {
            return Err(Error::InvalidConfig(
                "either hosts or hosts_file must list at least one host".to_string(),
            ));
        }
        Ok(targets)
    }

    pub fn pool_settings(&self, workers: usize) -> PoolSettings {
        PoolSettings {
            failure_threshold: self.failure_threshold,
            wait_between_failures: self.wait_between_failures,
            workers,
        }
    }
}

/// `local` kind: nodes started on the manager's own machine.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocalConfig {
    #[serde(deserialize_with = "deserialize_template")]
    pub command: CommandTemplate,

    #[serde(default, deserialize_with = "deserialize_template_option")]
    pub removal_command: Option<CommandTemplate>,

    #[serde(default = "default_local_nodes")]
    pub nodes: u32,

    #[serde(default = "default_host_node_timeout", with = "humantime_serde")]
    pub node_timeout: Duration,
}

fn default_local_nodes() -> u32 {
    1
}

/// `pbs`, `lsf`, and `sge` kinds: one scheduler job per node.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchConfig {
    /// Host the submit and delete commands run on; local when absent.
    #[serde(default)]
    pub front_end: Option<String>,

    #[serde(default)]
    pub ssh: Option<SshConfig>,

    /// What the scheduler runs on the compute node.
    #[serde(deserialize_with = "deserialize_template")]
    pub command: CommandTemplate,

    #[serde(default)]
    pub submit_options: String,

    #[serde(default = "default_max_nodes")]
    pub max_nodes: u32,

    #[serde(default = "default_batch_node_timeout", with = "humantime_serde")]
    pub node_timeout: Duration,

    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
}

fn default_max_nodes() -> u32 {
    1
}

fn default_batch_node_timeout() -> Duration {
    DEFAULT_BATCH_NODE_TIMEOUT
}

fn default_poll_interval() -> Duration {
    POLL_INTERVAL
}

impl BatchConfig {
    pub fn batch_settings(&self, workers: usize) -> BatchSettings {
        BatchSettings {
            max_nodes: self.max_nodes,
            node_timeout: self.node_timeout,
            submit_options: self.submit_options.clone(),
            poll_interval: self.poll_interval,
            workers,
        }
    }
}
