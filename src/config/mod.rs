// ABOUTME: Configuration types and parsing for kahua.yml.
// ABOUTME: Handles YAML parsing, env-backed credentials, recovery, and the infrastructure section.

mod deserialize;
mod env_value;
mod infrastructure;
mod init;
mod ssh;

pub use env_value::EnvValue;
pub use infrastructure::{BatchConfig, HostsConfig, LocalConfig};
pub use init::{INFRASTRUCTURE_KINDS, generate_template_yaml, init_config};
pub use ssh::SshConfig;

use crate::error::{Error, Result};
use crate::state::FileSnapshotStore;
use deserialize::deserialize_source_name;
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const CONFIG_FILENAME: &str = "kahua.yml";
pub const CONFIG_FILENAME_ALT: &str = "kahua.yaml";
pub const CONFIG_FILENAME_DIR: &str = ".kahua/config.yml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Name of the node source; prefixes node names and deploying URLs.
    #[serde(deserialize_with = "deserialize_source_name")]
    pub source: String,

    /// Where launched nodes register.
    pub registration_url: String,

    /// Acquisition attempts running at once.
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default)]
    pub recovery: RecoveryConfig,

    /// Handed to launch commands through `{credentials}`; never logged.
    #[serde(default)]
    pub credentials: Option<EnvValue>,

    pub infrastructure: InfrastructureConfig,
}

fn default_workers() -> usize {
    20
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecoveryConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Defaults to `~/.local/state/kahua`.
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
}

impl RecoveryConfig {
    /// Snapshot store to persist to, if recovery is enabled.
    pub fn snapshot_store(&self, base_dir: &Path) -> Result<Option<FileSnapshotStore>> {
        if !self.enabled {
            return Ok(None);
        }
        let store = match &self.state_dir {
            Some(dir) => FileSnapshotStore::new(base_dir.join(dir)),
            None => FileSnapshotStore::default_location()?,
        };
        Ok(Some(store))
    }
}

/// `kind` picks the constructor; the other keys are its settings.
#[derive(Debug, Clone, Deserialize)]
pub struct InfrastructureConfig {
    pub kind: String,
    #[serde(flatten)]
    pub settings: serde_yaml::Mapping,
}

impl InfrastructureConfig {
    pub fn settings_value(&self) -> serde_yaml::Value {
        serde_yaml::Value::Mapping(self.settings.clone())
    }
}

impl Config {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// First configuration file found in `dir`.
    pub fn find(dir: &Path) -> Result<PathBuf> {
        let candidates = [
            dir.join(CONFIG_FILENAME),
            dir.join(CONFIG_FILENAME_ALT),
            dir.join(CONFIG_FILENAME_DIR),
        ];

        candidates
            .into_iter()
            .find(|path| path.exists())
            .ok_or_else(|| Error::ConfigNotFound(dir.to_path_buf()))
    }

    pub fn discover(dir: &Path) -> Result<Self> {
        Self::load(&Self::find(dir)?)
    }

    /// Resolved credentials, if any are configured.
    pub fn resolve_credentials(&self) -> Result<Option<String>> {
        self.credentials.as_ref().map(EnvValue::resolve).transpose()
    }

    fn validate(&self) -> Result<()> {
        if self.registration_url.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "registration_url cannot be empty".to_string(),
            ));
        }
        if self.workers == 0 {
            return Err(Error::InvalidConfig(
                "workers must be at least 1".to_string(),
            ));
        }
        if self.infrastructure.kind.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "infrastructure.kind cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}
