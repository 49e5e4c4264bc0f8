// ABOUTME: Hosts adapter that deploys nodes by running a command template per node.
// ABOUTME: Watches every launched process until its node registers, times out, or exits.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::convert::Infallible;
use std::time::Duration;

use super::naming::NodeNameBuilder;
use super::state::{HostTarget, PoolState};
use crate::adapter::Adapter;
use crate::exec::{
    CommandOutput, CommandRunner, CommandTemplate, Connector, RunningCommand, TemplateVars,
};
use crate::lifecycle::{LifecycleError, LifecycleHooks, NodeLifecycle, NodePhase, Result};
use crate::types::{DeployingNodeUrl, NodeName, RegisteredNode};

/// Deadline of a deploying node when none is configured.
pub const DEFAULT_NODE_TIMEOUT: Duration = Duration::from_secs(60);

/// Interval between two checks of a launched process.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Monitoring faults tolerated per process before giving up on it.
pub const MONITOR_BREAKER: u32 = 5;

/// One node being launched.
struct Launch {
    url: DeployingNodeUrl,
    node: NodeName,
    command: String,
}

/// Deploys nodes by running `launch` once per node, locally or on the host.
pub struct CommandDeployer {
    connector: Connector,
    launch: CommandTemplate,
    removal: Option<CommandTemplate>,
    registration_url: String,
    credentials: Option<String>,
    node_timeout: Duration,
    poll_interval: Duration,
    /// Launch processes of registered nodes, per host, killed on teardown.
    processes: Mutex<HashMap<String, Vec<Box<dyn RunningCommand>>>>,
}

impl std::fmt::Debug for CommandDeployer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandDeployer")
            .field("connector", &self.connector)
            .field("launch", &self.launch)
            .field("removal", &self.removal)
            .field("registration_url", &self.registration_url)
            .field("node_timeout", &self.node_timeout)
            .finish()
    }
}

impl CommandDeployer {
    pub fn new(
        connector: Connector,
        launch: CommandTemplate,
        registration_url: impl Into<String>,
    ) -> Self {
        Self {
            connector,
            launch,
            removal: None,
            registration_url: registration_url.into(),
            credentials: None,
            node_timeout: DEFAULT_NODE_TIMEOUT,
            poll_interval: POLL_INTERVAL,
            processes: Mutex::new(HashMap::new()),
        }
    }

    /// Command run on the host when its last node is removed.
    pub fn with_removal(mut self, removal: CommandTemplate) -> Self {
        self.removal = Some(removal);
        self
    }

    pub fn with_credentials(mut self, credentials: impl Into<String>) -> Self {
        self.credentials = Some(credentials.into());
        self
    }

    pub fn with_node_timeout(mut self, timeout: Duration) -> Self {
        self.node_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn node_timeout(&self) -> Duration {
        self.node_timeout
    }

    /// Number of launch processes kept for `host`.
    pub fn running_on(&self, host: &str) -> usize {
        self.processes.lock().get(host).map_or(0, Vec::len)
    }

    fn vars<'a>(&'a self, host: &'a str, node: &'a str, source: &'a str) -> TemplateVars<'a> {
        TemplateVars {
            host,
            node,
            source,
            url: &self.registration_url,
            credentials: self.credentials.as_deref(),
        }
    }

    fn declare_all_lost(
        lifecycle: &NodeLifecycle<PoolState>,
        launches: &[Launch],
        description: &str,
    ) {
        for launch in launches {
            lifecycle.declare_deploying_node_lost(&launch.url, description);
        }
    }

    async fn launch_and_monitor(
        &self,
        lifecycle: &NodeLifecycle<PoolState>,
        runner: &dyn CommandRunner,
        host: &str,
        launch: Launch,
    ) -> Result<()> {
        let mut process = match runner.spawn(&launch.command).await {
            Ok(process) => process,
            Err(e) => {
                let description = format!("Deployment command could not be started: {e}");
                lifecycle.declare_deploying_node_lost(&launch.url, description.clone());
                return Err(LifecycleError::Deployment(description));
            }
        };
        lifecycle.update_deploying_node_description(
            &launch.url,
            format!("Deployment command started on {}", runner.location()),
        );

        let mut breaker = MONITOR_BREAKER;
        loop {
            match lifecycle.phase(&launch.url) {
                NodePhase::Acquired => {
                    tracing::debug!("Node {} registered, keeping its process", launch.node);
                    self.processes
                        .lock()
                        .entry(host.to_string())
                        .or_default()
                        .push(process);
                    return Ok(());
                }
                NodePhase::Lost | NodePhase::Unknown => {
                    process.kill().await;
                    return Err(LifecycleError::Timeout { url: launch.url });
                }
                NodePhase::Deploying => {}
            }

            match process.try_exit().await {
                Ok(None) => {}
                Ok(Some(output)) => {
                    let description = exit_description(&output);
                    let url = launch.url.clone();
                    let lost_description = description.clone();
                    let registered = lifecycle.check_node_is_acquired_and_do(
                        &launch.node,
                        |_| Ok::<(), Infallible>(()),
                        |locked| {
                            locked.declare_lost(&url, lost_description);
                            Ok(())
                        },
                    );
                    if registered {
                        tracing::info!(
                            "Node {} registered right before its command exited",
                            launch.node
                        );
                        return Ok(());
                    }
                    return Err(LifecycleError::Deployment(description));
                }
                Err(e) => {
                    breaker -= 1;
                    tracing::warn!(
                        "Monitoring of {} failed ({} faults left): {}",
                        launch.node,
                        breaker,
                        e
                    );
                    if breaker == 0 {
                        lifecycle.declare_deploying_node_lost(
                            &launch.url,
                            format!("Monitoring failed {MONITOR_BREAKER} times in a row: {e}"),
                        );
                        process.kill().await;
                        return Err(LifecycleError::CircuitBreakerExhausted {
                            faults: MONITOR_BREAKER,
                            last: e.to_string(),
                        });
                    }
                }
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

fn exit_description(output: &CommandOutput) -> String {
    let detail = output
        .stdout
        .lines()
        .chain(output.stderr.lines())
        .rev()
        .find(|line| !line.trim().is_empty())
        .map(str::trim);
    match detail {
        Some(line) => format!(
            "Deployment command exited with code {} before the node registered: {}",
            output.exit_code, line
        ),
        None => format!(
            "Deployment command exited with code {} before the node registered",
            output.exit_code
        ),
    }
}

impl LifecycleHooks<PoolState> for CommandDeployer {}

#[async_trait]
impl Adapter<PoolState> for CommandDeployer {
    type Target = HostTarget;

    async fn start_node(
        &self,
        lifecycle: &NodeLifecycle<PoolState>,
        target: &HostTarget,
    ) -> Result<()> {
        let naming = NodeNameBuilder::new(lifecycle.source());
        let host = target.address.as_str();
        let mut launches = Vec::new();

        // Every deploying record exists before anything runs
        for _ in 0..target.count {
            let name = lifecycle.update_backend(|state| state.next_node_name(host, &naming));
            let node = match NodeName::new(&name) {
                Ok(node) => node,
                Err(e) => {
                    Self::declare_all_lost(lifecycle, &launches, "Sibling node name was invalid");
                    return Err(LifecycleError::DuplicateName {
                        name,
                        reason: e.to_string(),
                    });
                }
            };
            let vars = self.vars(host, &name, lifecycle.source());
            let added = lifecycle.add_deploying_node(
                &name,
                &self.launch.render_hidden(&vars),
                &format!("Deploying node {name} on host {host}"),
                self.node_timeout,
            );
            match added {
                Ok(url) => launches.push(Launch {
                    url,
                    command: self.launch.render(&vars),
                    node,
                }),
                Err(e) => {
                    Self::declare_all_lost(
                        lifecycle,
                        &launches,
                        &format!("Sibling node failed: {e}"),
                    );
                    return Err(e);
                }
            }
        }

        let runner = match self.connector.connect(host).await {
            Ok(runner) => runner,
            Err(e) => {
                let description = format!("Cannot reach host {host}: {e}");
                Self::declare_all_lost(lifecycle, &launches, &description);
                return Err(LifecycleError::Deployment(description));
            }
        };

        let monitors = launches
            .into_iter()
            .map(|launch| self.launch_and_monitor(lifecycle, runner.as_ref(), host, launch));
        futures::future::join_all(monitors)
            .await
            .into_iter()
            .collect::<Result<()>>()
    }

    async fn kill_node(&self, node: &RegisteredNode, target: &HostTarget) -> Result<()> {
        let processes = self
            .processes
            .lock()
            .remove(&target.address)
            .unwrap_or_default();
        for mut process in processes {
            process.kill().await;
        }

        let Some(removal) = &self.removal else {
            return Ok(());
        };

        let runner = self
            .connector
            .connect(&target.address)
            .await
            .map_err(|e| {
                LifecycleError::deployment(format!("cannot reach {}: {}", target.address, e))
            })?;

        // Node names start with {source}__
        let source = node
            .name
            .as_str()
            .split_once("__")
            .map_or("", |(source, _)| source);
        let vars = self.vars(&target.address, node.name.as_str(), source);
        let output = runner
            .run(&removal.render(&vars), self.node_timeout)
            .await
            .map_err(|e| LifecycleError::deployment(e.to_string()))?;

        if !output.success() {
            return Err(LifecycleError::deployment(format!(
                "removal command on {} exited with code {}",
                target.address, output.exit_code
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_description_uses_last_line() {
        let output = CommandOutput {
            exit_code: 127,
            stdout: String::new(),
            stderr: "line one\nstart-node: not found\n".to_string(),
        };
        assert_eq!(
            exit_description(&output),
            concat!(
                "Deployment command exited with code 127 before the node registered: ",
                "start-node: not found"
            )
        );
    }

    #[test]
    fn exit_description_without_output() {
        let output = CommandOutput {
            exit_code: 0,
            ..Default::default()
        };
        assert!(exit_description(&output).ends_with("before the node registered"));
    }
}
