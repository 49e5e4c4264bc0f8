// ABOUTME: Maps infrastructure kind tags to the constructors building their node sources.
// ABOUTME: Ships ssh, script, local, pbs, lsf, and sge; embedders may register more.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::NodeSource;
use crate::batch::{BatchQueueAdapter, BatchQueueSource, Lsf, Pbs, QueueFamily, Sge};
use crate::config::{BatchConfig, Config, HostsConfig, LocalConfig};
use crate::error::{Error, Result};
use crate::exec::{Connector, LocalRunner};
use crate::hosts::{CommandDeployer, HostAllocationPool, HostTarget, PoolSettings};
use crate::state::SnapshotStore;

/// What every constructor gets besides its own settings.
#[derive(Clone)]
pub struct SourceContext {
    pub source: String,
    pub registration_url: String,
    pub credentials: Option<String>,
    pub snapshots: Option<Arc<dyn SnapshotStore>>,
    pub workers: usize,
    /// Relative paths in the settings resolve against this directory.
    pub base_dir: PathBuf,
}

impl std::fmt::Debug for SourceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceContext")
            .field("source", &self.source)
            .field("registration_url", &self.registration_url)
            .field("credentials", &self.credentials.as_ref().map(|_| "[hidden]"))
            .field("persistent", &self.snapshots.is_some())
            .field("workers", &self.workers)
            .field("base_dir", &self.base_dir)
            .finish()
    }
}

impl SourceContext {
    pub fn new(source: impl Into<String>, registration_url: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            registration_url: registration_url.into(),
            credentials: None,
            snapshots: None,
            workers: PoolSettings::default().workers,
            base_dir: PathBuf::from("."),
        }
    }

    /// Context for `config`, read from a file in `base_dir`.
    pub fn from_config(config: &Config, base_dir: &Path) -> Result<Self> {
        let snapshots = config
            .recovery
            .snapshot_store(base_dir)?
            .map(|store| Arc::new(store) as Arc<dyn SnapshotStore>);

        Ok(Self {
            source: config.source.clone(),
            registration_url: config.registration_url.clone(),
            credentials: config.resolve_credentials()?,
            snapshots,
            workers: config.workers,
            base_dir: base_dir.to_path_buf(),
        })
    }
}

/// Builds a node source from its context and the infrastructure settings.
pub type SourceConstructor = fn(&SourceContext, &serde_yaml::Value) -> Result<Arc<dyn NodeSource>>;

#[derive(Clone)]
pub struct Registry {
    constructors: BTreeMap<String, SourceConstructor>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.constructors.keys()).finish()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl Registry {
    pub fn empty() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register("ssh", ssh_source);
        registry.register("script", script_source);
        registry.register("local", local_source);
        registry.register("pbs", batch_source::<Pbs>);
        registry.register("lsf", batch_source::<Lsf>);
        registry.register("sge", batch_source::<Sge>);
        registry
    }

    /// Register `constructor` for `kind`, returning the one it replaces.
    pub fn register(
        &mut self,
        kind: impl Into<String>,
        constructor: SourceConstructor,
    ) -> Option<SourceConstructor> {
        self.constructors.insert(kind.into(), constructor)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.constructors.contains_key(kind)
    }

    pub fn create(
        &self,
        kind: &str,
        context: &SourceContext,
        settings: &serde_yaml::Value,
    ) -> Result<Arc<dyn NodeSource>> {
        let constructor = self
            .constructors
            .get(kind)
            .ok_or_else(|| Error::UnknownInfrastructure {
                kind: kind.to_string(),
                known: self.kinds().collect::<Vec<_>>().join(", "),
            })?;
        tracing::debug!("Creating {} node source {}", kind, context.source);
        constructor(context, settings)
    }

    /// Build the source described by `config`, read from a file in `base_dir`.
    pub fn create_from_config(
        &self,
        config: &Config,
        base_dir: &Path,
    ) -> Result<Arc<dyn NodeSource>> {
        let context = SourceContext::from_config(config, base_dir)?;
        self.create(
            &config.infrastructure.kind,
            &context,
            &config.infrastructure.settings_value(),
        )
    }
}

fn ssh_source(
    context: &SourceContext,
    settings: &serde_yaml::Value,
) -> Result<Arc<dyn NodeSource>> {
    let config: HostsConfig = serde_yaml::from_value(settings.clone())?;
    let connector = Connector::Ssh(config.ssh.clone().unwrap_or_default().options());
    let targets = config.targets(&context.base_dir)?;
    hosts_source(context, &config, &targets, connector, "ssh")
}

fn script_source(
    context: &SourceContext,
    settings: &serde_yaml::Value,
) -> Result<Arc<dyn NodeSource>> {
    let config: HostsConfig = serde_yaml::from_value(settings.clone())?;
    if config.ssh.is_some() {
        return Err(Error::InvalidConfig(
            "script sources run locally; use kind 'ssh' for ssh settings".to_string(),
        ));
    }
    let targets = config.targets(&context.base_dir)?;
    hosts_source(context, &config, &targets, Connector::Local(LocalRunner::new()), "script")
}

fn local_source(
    context: &SourceContext,
    settings: &serde_yaml::Value,
) -> Result<Arc<dyn NodeSource>> {
    let config: LocalConfig = serde_yaml::from_value(settings.clone())?;
    let host = gethostname::gethostname().to_string_lossy().into_owned();
    let targets = [HostTarget::new(host, config.nodes)];

    let mut deployer = CommandDeployer::new(
        Connector::Local(LocalRunner::new()),
        config.command.clone(),
        context.registration_url.clone(),
    )
    .with_node_timeout(config.node_timeout);
    if let Some(removal) = &config.removal_command {
        deployer = deployer.with_removal(removal.clone());
    }
    if let Some(credentials) = &context.credentials {
        deployer = deployer.with_credentials(credentials.clone());
    }

    let settings = PoolSettings {
        workers: context.workers,
        ..PoolSettings::default()
    };
    let pool = HostAllocationPool::open(
        &context.source,
        &targets,
        deployer,
        settings,
        context.snapshots.clone(),
    )?
    .with_kind("local");
    Ok(Arc::new(pool))
}

fn hosts_source(
    context: &SourceContext,
    config: &HostsConfig,
    targets: &[HostTarget],
    connector: Connector,
    kind: &str,
) -> Result<Arc<dyn NodeSource>> {
    let mut deployer = CommandDeployer::new(
        connector,
        config.command.clone(),
        context.registration_url.clone(),
    )
    .with_node_timeout(config.node_timeout);
    if let Some(removal) = &config.removal_command {
        deployer = deployer.with_removal(removal.clone());
    }
    if let Some(credentials) = &context.credentials {
        deployer = deployer.with_credentials(credentials.clone());
    }

    let pool = HostAllocationPool::open(
        &context.source,
        targets,
        deployer,
        config.pool_settings(context.workers),
        context.snapshots.clone(),
    )?
    .with_kind(kind);
    Ok(Arc::new(pool))
}

fn batch_source<F>(
    context: &SourceContext,
    settings: &serde_yaml::Value,
) -> Result<Arc<dyn NodeSource>>
where
    F: QueueFamily + Default,
{
    let config: BatchConfig = serde_yaml::from_value(settings.clone())?;
    let (connector, front_end) = match &config.front_end {
        Some(host) => (
            Connector::Ssh(config.ssh.clone().unwrap_or_default().options()),
            host.clone(),
        ),
        None if config.ssh.is_some() => {
            return Err(Error::InvalidConfig(
                "ssh settings need a front_end host".to_string(),
            ));
        }
        None => (Connector::Local(LocalRunner::new()), "localhost".to_string()),
    };

    let mut adapter = BatchQueueAdapter::new(
        F::default(),
        connector,
        front_end,
        config.command.clone(),
        context.registration_url.clone(),
    )
    .with_settings(config.batch_settings(context.workers));
    if let Some(credentials) = &context.credentials {
        adapter = adapter.with_credentials(credentials.clone());
    }

    let source = BatchQueueSource::open(&context.source, adapter, context.snapshots.clone())?;
    Ok(Arc::new(source))
}
