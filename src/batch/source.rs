// ABOUTME: Batch queue adapter and the node source driving it.
// ABOUTME: One job per node, bounded by max_nodes, submitted from a front-end host.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::family::QueueFamily;
use super::protocol::{MonitorSettings, POLL_INTERVAL, Submission, delete_job};
use super::state::BatchState;
use crate::adapter::Adapter;
use crate::diagnostics::Diagnostics;
use crate::exec::{CommandTemplate, Connector, TemplateVars};
use crate::hosts::NodeNameBuilder;
use crate::lifecycle::{
    LifecycleError, LifecycleHooks, LifecycleStatus, NodeEvent, NodeLifecycle, NodeTable,
    RejectionError, Result,
};
use crate::source::{NodeSource, WorkerPool};
use crate::state::SnapshotStore;
use crate::types::{DeployingNodeUrl, JobId, NodeName, RegisteredNode};

/// Deadline of a submitted node when none is configured.
pub const DEFAULT_BATCH_NODE_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct BatchSettings {
    /// Registered plus in-flight nodes allowed at once.
    pub max_nodes: u32,
    pub node_timeout: Duration,
    /// Extra arguments passed to the submit command.
    pub submit_options: String,
    pub poll_interval: Duration,
    pub workers: usize,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            max_nodes: 1,
            node_timeout: DEFAULT_BATCH_NODE_TIMEOUT,
            submit_options: String::new(),
            poll_interval: POLL_INTERVAL,
            workers: 20,
        }
    }
}

/// What one batch attempt works on: a fresh node index to submit, or the
/// job of a registered node to delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchSlot {
    Submit { index: u32 },
    Job(JobId),
}

/// Submits one job per node to a batch scheduler through its front-end host.
pub struct BatchQueueAdapter<F> {
    family: F,
    connector: Connector,
    front_end: String,
    job: CommandTemplate,
    registration_url: String,
    credentials: Option<String>,
    settings: BatchSettings,
}

impl<F> std::fmt::Debug for BatchQueueAdapter<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchQueueAdapter")
            .field("connector", &self.connector)
            .field("front_end", &self.front_end)
            .field("job", &self.job)
            .field("settings", &self.settings)
            .finish()
    }
}

impl<F: QueueFamily> BatchQueueAdapter<F> {
    /// `job` is the command the scheduler runs on the compute node; it must
    /// start a node that registers at `registration_url`.
    pub fn new(
        family: F,
        connector: Connector,
        front_end: impl Into<String>,
        job: CommandTemplate,
        registration_url: impl Into<String>,
    ) -> Self {
        Self {
            family,
            connector,
            front_end: front_end.into(),
            job,
            registration_url: registration_url.into(),
            credentials: None,
            settings: BatchSettings::default(),
        }
    }

    pub fn with_credentials(mut self, credentials: impl Into<String>) -> Self {
        self.credentials = Some(credentials.into());
        self
    }

    pub fn with_settings(mut self, settings: BatchSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn family(&self) -> &F {
        &self.family
    }

    pub fn settings(&self) -> &BatchSettings {
        &self.settings
    }

    fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            poll_interval: self.settings.poll_interval,
            delete_timeout: self.settings.node_timeout,
        }
    }

    async fn submit(&self, lifecycle: &NodeLifecycle<BatchState>, index: u32) -> Result<()> {
        let naming = NodeNameBuilder::new(lifecycle.source());
        let name = naming.name(&self.front_end, index);
        let vars = TemplateVars {
            host: &self.front_end,
            node: &name,
            source: lifecycle.source(),
            url: &self.registration_url,
            credentials: self.credentials.as_deref(),
        };
        let options = self.settings.submit_options.as_str();
        let command = self.family.submit_command(&self.job.render(&vars), options);
        let hidden = self
            .family
            .submit_command(&self.job.render_hidden(&vars), options);

        let submission = match Submission::prepare(
            lifecycle,
            &name,
            command,
            &hidden,
            self.settings.node_timeout,
        ) {
            Ok(submission) => submission,
            Err(e) => {
                // No deploying record exists, so no lost hook will free the slot
                lifecycle.update_backend(BatchState::release_deploying);
                return Err(e);
            }
        };

        let runner = match self.connector.connect(&self.front_end).await {
            Ok(runner) => runner,
            Err(e) => {
                let description = format!("Cannot reach front-end {}: {}", self.front_end, e);
                lifecycle.declare_deploying_node_lost(submission.url(), description.clone());
                return Err(LifecycleError::Deployment(description));
            }
        };

        let registered = submission
            .submit(lifecycle, runner.as_ref())
            .await?
            .monitor(
                lifecycle,
                &self.family,
                runner.as_ref(),
                &self.monitor_settings(),
            )
            .await?;

        for warning in registered.diagnostics().warnings() {
            tracing::warn!("{}", warning.message);
        }
        Ok(())
    }
}

impl<F: QueueFamily> LifecycleHooks<BatchState> for BatchQueueAdapter<F> {
    fn on_acquired_node(
        &self,
        state: &mut BatchState,
        node: &RegisteredNode,
    ) -> std::result::Result<(), RejectionError> {
        state.promote(node.name.clone(), None);
        Ok(())
    }

    fn on_deploying_node_lost(&self, state: &mut BatchState, _url: &DeployingNodeUrl) {
        state.release_deploying();
    }
}

#[async_trait]
impl<F: QueueFamily> Adapter<BatchState> for BatchQueueAdapter<F> {
    type Target = BatchSlot;

    async fn start_node(
        &self,
        lifecycle: &NodeLifecycle<BatchState>,
        target: &BatchSlot,
    ) -> Result<()> {
        match target {
            BatchSlot::Submit { index } => self.submit(lifecycle, *index).await,
            BatchSlot::Job(job) => Err(LifecycleError::deployment(format!(
                "job {job} is already submitted"
            ))),
        }
    }

    async fn kill_node(&self, node: &RegisteredNode, target: &BatchSlot) -> Result<()> {
        let BatchSlot::Job(job) = target else {
            return Err(LifecycleError::deployment(format!(
                "no job is known for node {}",
                node.name
            )));
        };
        let runner = self.connector.connect(&self.front_end).await.map_err(|e| {
            LifecycleError::deployment(format!("cannot reach {}: {}", self.front_end, e))
        })?;
        delete_job(&self.family, runner.as_ref(), job, self.settings.node_timeout).await
    }
}

/// Node source acquiring nodes through a [`BatchQueueAdapter`].
pub struct BatchQueueSource<F> {
    lifecycle: Arc<NodeLifecycle<BatchState>>,
    adapter: Arc<BatchQueueAdapter<F>>,
    workers: WorkerPool,
    kind: String,
}

impl<F> std::fmt::Debug for BatchQueueSource<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchQueueSource")
            .field("kind", &self.kind)
            .field("lifecycle", &self.lifecycle)
            .field("adapter", &self.adapter)
            .finish()
    }
}

impl<F: QueueFamily> BatchQueueSource<F> {
    pub fn open(
        source: &str,
        adapter: BatchQueueAdapter<F>,
        snapshots: Option<Arc<dyn SnapshotStore>>,
    ) -> Result<Self> {
        if adapter.settings.max_nodes == 0 {
            return Err(LifecycleError::Configuration(
                "max_nodes must be at least 1".to_string(),
            ));
        }

        let kind = adapter.family.name().to_string();
        let workers = WorkerPool::new(adapter.settings.workers);
        let adapter = Arc::new(adapter);
        let lifecycle = NodeLifecycle::open(source, adapter.clone(), snapshots)?;

        Ok(Self {
            lifecycle,
            adapter,
            workers,
            kind,
        })
    }

    pub fn lifecycle(&self) -> &Arc<NodeLifecycle<BatchState>> {
        &self.lifecycle
    }

    pub fn adapter(&self) -> &BatchQueueAdapter<F> {
        &self.adapter
    }

    /// Copy of the batch state.
    pub fn state(&self) -> BatchState {
        self.lifecycle.with_backend(BatchState::clone)
    }

    /// Submit one more job unless `max_nodes` are already in use.
    pub fn acquire_node(&self) -> bool {
        if self.lifecycle.is_shutting_down() {
            return false;
        }
        let max_nodes = self.adapter.settings.max_nodes;
        let Some(index) = self
            .lifecycle
            .update_backend(|state| state.reserve(max_nodes))
        else {
            tracing::debug!("{} already uses {} node(s)", self.lifecycle.source(), max_nodes);
            return false;
        };

        let lifecycle = Arc::clone(&self.lifecycle);
        let adapter = Arc::clone(&self.adapter);
        self.workers.execute(async move {
            let slot = BatchSlot::Submit { index };
            if let Err(e) = adapter.start_node(&lifecycle, &slot).await {
                tracing::warn!("Batch acquisition {} failed: {}", index, e);
            }
        });
        true
    }

    /// Forget a node and delete its job.
    pub async fn remove_node(&self, node: &RegisteredNode) -> Diagnostics {
        let lifecycle = &self.lifecycle;
        let adapter = &self.adapter;
        lifecycle
            .internal_remove_node(node, async {
                match lifecycle.update_backend(|state| state.remove_node(&node.name)) {
                    None => Err(LifecycleError::deployment(format!(
                        "node {} is not tracked by this batch source",
                        node.name
                    ))),
                    Some(None) => Err(LifecycleError::deployment(format!(
                        "no job id is known for node {}; its job cannot be deleted",
                        node.name
                    ))),
                    Some(Some(job)) => adapter.kill_node(node, &BatchSlot::Job(job)).await,
                }
            })
            .await
    }
}

#[async_trait]
impl<F: QueueFamily> NodeSource for BatchQueueSource<F> {
    fn name(&self) -> &str {
        self.lifecycle.source()
    }

    fn kind(&self) -> &str {
        &self.kind
    }

    fn acquire_node(&self) -> Result<bool> {
        Ok(BatchQueueSource::acquire_node(self))
    }

    fn register_node(&self, node: &RegisteredNode) -> Result<()> {
        self.lifecycle.register_acquired_node(node)
    }

    async fn remove_node(&self, node: &RegisteredNode) -> Diagnostics {
        BatchQueueSource::remove_node(self, node).await
    }

    /// A batch node that went down is not coming back: its job is deleted.
    async fn notify_down_node(&self, name: &NodeName) -> Diagnostics {
        let node = RegisteredNode::new(name.clone(), String::new());
        BatchQueueSource::remove_node(self, &node).await
    }

    async fn wait_idle(&self) {
        self.workers.wait_idle().await;
    }

    async fn shutdown(&self) {
        self.lifecycle.shutdown().await;
        self.workers.wait_idle().await;
    }

    fn status(&self) -> LifecycleStatus {
        self.lifecycle.status()
    }

    fn nodes(&self) -> NodeTable {
        self.lifecycle.nodes()
    }

    fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.lifecycle.subscribe()
    }
}
