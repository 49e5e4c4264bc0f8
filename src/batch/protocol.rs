// ABOUTME: Submission protocol of one batch acquisition attempt as a type-state machine.
// ABOUTME: Submitting -> Monitoring -> Registered, with lost nodes reported as errors.

use std::convert::Infallible;
use std::time::Duration;

use super::family::QueueFamily;
use super::job::BatchJobDescriptor;
use super::state::BatchState;
use crate::diagnostics::{Diagnostics, Warning};
use crate::exec::{CommandOutput, CommandRunner, RunningCommand};
use crate::lifecycle::{LifecycleError, NodeLifecycle, NodePhase, Result};
use crate::types::{DeployingNodeUrl, JobId, NodeName};

/// Interval between two checks of a submission.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Monitoring faults tolerated before a submission is abandoned.
pub const MONITOR_BREAKER: u32 = 5;

/// Deploying record created; nothing submitted yet.
/// Available actions: `submit()`
#[derive(Debug)]
pub struct Submitting {
    command: String,
}

/// Submit command launched.
/// Available actions: `monitor()`
pub struct Monitoring {
    process: Box<dyn RunningCommand>,
    job: Option<BatchJobDescriptor>,
    exited: bool,
}

/// The node registered; its job id, if known, is recorded in the backend state.
#[derive(Debug)]
pub struct Registered {
    job: Option<BatchJobDescriptor>,
}

/// Timing of the monitoring phase.
#[derive(Debug, Clone, Copy)]
pub struct MonitorSettings {
    pub poll_interval: Duration,
    /// Bound on the delete command run when an attempt is abandoned.
    pub delete_timeout: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval: POLL_INTERVAL,
            delete_timeout: Duration::from_secs(300),
        }
    }
}

/// One acquisition attempt through a batch scheduler.
pub struct Submission<S> {
    url: DeployingNodeUrl,
    node: NodeName,
    diagnostics: Diagnostics,
    state: S,
}

impl<S> Submission<S> {
    pub fn url(&self) -> &DeployingNodeUrl {
        &self.url
    }

    pub fn node(&self) -> &NodeName {
        &self.node
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    fn transition<T>(self, state: T) -> Submission<T> {
        Submission {
            url: self.url,
            node: self.node,
            diagnostics: self.diagnostics,
            state,
        }
    }
}

impl Submission<Submitting> {
    /// Create the deploying record of the attempt.
    ///
    /// `hidden_command` is what the record shows; `command` is what runs.
    pub fn prepare(
        lifecycle: &NodeLifecycle<BatchState>,
        node: &str,
        command: String,
        hidden_command: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let name = NodeName::new(node).map_err(|e| LifecycleError::DuplicateName {
            name: node.to_string(),
            reason: e.to_string(),
        })?;
        let url = lifecycle.add_deploying_node(
            node,
            hidden_command,
            "Waiting for the job to be submitted",
            timeout,
        )?;

        Ok(Submission {
            url,
            node: name,
            diagnostics: Diagnostics::default(),
            state: Submitting { command },
        })
    }

    /// Launch the submit command. A launch failure declares the node lost.
    pub async fn submit(
        self,
        lifecycle: &NodeLifecycle<BatchState>,
        runner: &dyn CommandRunner,
    ) -> Result<Submission<Monitoring>> {
        let process = match runner.spawn(&self.state.command).await {
            Ok(process) => process,
            Err(e) => {
                let description = format!("Job submission could not be started: {e}");
                lifecycle.declare_deploying_node_lost(&self.url, description.clone());
                return Err(LifecycleError::Deployment(description));
            }
        };

        lifecycle.update_deploying_node_description(
            &self.url,
            format!("Job submitted on {}, waiting for the node to register", runner.location()),
        );
        tracing::debug!("Submitted job for node {}", self.node);

        Ok(self.transition(Monitoring {
            process,
            job: None,
            exited: false,
        }))
    }
}

impl Submission<Monitoring> {
    pub fn job(&self) -> Option<&BatchJobDescriptor> {
        self.state.job.as_ref()
    }

    /// Poll until the node registers, is lost, or monitoring keeps failing.
    ///
    /// A lost node or exhausted breaker deletes the job, if one is known, and
    /// kills the submit command.
    pub async fn monitor(
        mut self,
        lifecycle: &NodeLifecycle<BatchState>,
        family: &dyn QueueFamily,
        runner: &dyn CommandRunner,
        settings: &MonitorSettings,
    ) -> Result<Submission<Registered>> {
        let mut breaker = MONITOR_BREAKER;

        loop {
            match lifecycle.phase(&self.url) {
                NodePhase::Acquired => return Ok(self.register(lifecycle, family).await),
                NodePhase::Lost | NodePhase::Unknown => {
                    self.abandon(family, runner, settings).await;
                    return Err(LifecycleError::Timeout { url: self.url });
                }
                NodePhase::Deploying => {}
            }

            if !self.state.exited {
                match self.state.process.try_exit().await {
                    Ok(None) => {}
                    Ok(Some(output)) => {
                        self.state.exited = true;
                        self.on_exit(lifecycle, family, &output)?;
                    }
                    Err(e) => {
                        breaker -= 1;
                        tracing::warn!(
                            "Monitoring job of {} failed ({} faults left): {}",
                            self.node,
                            breaker,
                            e
                        );
                        if breaker == 0 {
                            lifecycle.declare_deploying_node_lost(
                                &self.url,
                                format!("Monitoring failed {MONITOR_BREAKER} times in a row: {e}"),
                            );
                            self.abandon(family, runner, settings).await;
                            return Err(LifecycleError::CircuitBreakerExhausted {
                                faults: MONITOR_BREAKER,
                                last: e.to_string(),
                            });
                        }
                    }
                }
            }

            tokio::time::sleep(settings.poll_interval).await;
        }
    }

    /// Classify a finished submit command.
    ///
    /// A non-zero exit that still printed a job id keeps the attempt alive:
    /// some remote login clients report failure for jobs that were queued.
    fn on_exit(
        &mut self,
        lifecycle: &NodeLifecycle<BatchState>,
        family: &dyn QueueFamily,
        output: &CommandOutput,
    ) -> Result<()> {
        let combined = format!("{}\n{}", output.stdout, output.stderr);
        let extracted = family
            .extract_job_id(&output.stdout)
            .or_else(|| family.extract_job_id(&combined));

        if output.success() {
            match extracted {
                Some(job) => {
                    tracing::info!("Job {} queued for node {}", job, self.node);
                    lifecycle.update_deploying_node_description(
                        &self.url,
                        format!("Job {job} queued, waiting for the node to register"),
                    );
                    self.state.job = Some(BatchJobDescriptor::confirmed(job, self.url.clone()));
                }
                None => tracing::warn!(
                    "Submission for node {} printed no job id; the job cannot be deleted",
                    self.node
                ),
            }
            return Ok(());
        }

        if let Some(job) = extracted {
            self.diagnostics.warn(Warning::ambiguous_recovery(format!(
                "Submission for node {} exited with code {} but printed job id {}; keeping it",
                self.node, output.exit_code, job
            )));
            lifecycle.update_deploying_node_description(
                &self.url,
                format!(
                    "Job {job} possibly queued (submission exited with code {})",
                    output.exit_code
                ),
            );
            self.state.job = Some(BatchJobDescriptor::tentative(job, self.url.clone()));
            return Ok(());
        }

        let summary = summarize(output);
        let description = format!(
            "Job submission failed with exit code {}: {}",
            output.exit_code, summary
        );
        let url = self.url.clone();
        let registered = lifecycle.check_node_is_acquired_and_do(
            &self.node,
            |_| Ok::<(), Infallible>(()),
            |locked| {
                locked.declare_lost(&url, description);
                Ok(())
            },
        );
        if registered {
            return Ok(());
        }

        Err(LifecycleError::SubmissionFailed {
            node: self.node.to_string(),
            exit_code: output.exit_code,
            output: summary,
        })
    }

    /// Read the output of a submit command that finished after the last poll.
    ///
    /// Registration or a deadline can overtake the exit; the job id must not
    /// be lost with the unread output.
    async fn collect_exit(&mut self, family: &dyn QueueFamily) {
        if self.state.exited || self.state.job.is_some() {
            return;
        }
        let output = match self.state.process.try_exit().await {
            Ok(Some(output)) => output,
            Ok(None) => return,
            Err(e) => {
                tracing::debug!("Final check of the submission of {} failed: {}", self.node, e);
                return;
            }
        };
        self.state.exited = true;

        let combined = format!("{}\n{}", output.stdout, output.stderr);
        let Some(job) = family
            .extract_job_id(&output.stdout)
            .or_else(|| family.extract_job_id(&combined))
        else {
            return;
        };
        if output.success() {
            self.state.job = Some(BatchJobDescriptor::confirmed(job, self.url.clone()));
        } else {
            self.diagnostics.warn(Warning::ambiguous_recovery(format!(
                "Submission for node {} exited with code {} but printed job id {}",
                self.node, output.exit_code, job
            )));
            self.state.job = Some(BatchJobDescriptor::tentative(job, self.url.clone()));
        }
    }

    async fn register(
        mut self,
        lifecycle: &NodeLifecycle<BatchState>,
        family: &dyn QueueFamily,
    ) -> Submission<Registered> {
        self.collect_exit(family).await;
        if let Some(job) = &self.state.job {
            let job_id = job.job_id.clone();
            let node = self.node.clone();
            lifecycle.check_node_is_acquired_and_do(
                &self.node,
                |locked| {
                    locked.backend_mut().record_job(&node, job_id);
                    Ok::<(), Infallible>(())
                },
                |_| Ok(()),
            );
        }

        self.state.process.kill().await;

        match &self.state.job {
            Some(job) if job.tentative => tracing::info!(
                "Node {} registered; job {} recovered despite the failed submission",
                self.node,
                job.job_id
            ),
            Some(job) => tracing::info!("Node {} registered from job {}", self.node, job.job_id),
            None => tracing::info!("Node {} registered", self.node),
        }

        let job = self.state.job.take();
        self.transition(Registered { job })
    }

    async fn abandon(
        &mut self,
        family: &dyn QueueFamily,
        runner: &dyn CommandRunner,
        settings: &MonitorSettings,
    ) {
        self.collect_exit(family).await;
        self.state.process.kill().await;
        if let Some(job) = &self.state.job
            && let Err(e) = delete_job(family, runner, &job.job_id, settings.delete_timeout).await
        {
            tracing::warn!("Could not delete job {} of node {}: {}", job.job_id, self.node, e);
        }
    }
}

impl Submission<Registered> {
    pub fn job(&self) -> Option<&BatchJobDescriptor> {
        self.state.job.as_ref()
    }

    /// Whether the job id came from a submission that reported failure.
    pub fn recovered(&self) -> bool {
        self.state.job.as_ref().is_some_and(|job| job.tentative)
    }

    pub fn into_diagnostics(self) -> Diagnostics {
        self.diagnostics
    }
}

/// Run the family's delete command for `job`.
pub async fn delete_job(
    family: &dyn QueueFamily,
    runner: &dyn CommandRunner,
    job: &JobId,
    timeout: Duration,
) -> Result<()> {
    let command = family.delete_command(job);
    let output = runner
        .run(&command, timeout)
        .await
        .map_err(|e| LifecycleError::deployment(e.to_string()))?;
    if !output.success() {
        return Err(LifecycleError::deployment(format!(
            "`{}` exited with code {}: {}",
            command,
            output.exit_code,
            summarize(&output)
        )));
    }
    tracing::info!("Deleted job {}", job);
    Ok(())
}

/// Last meaningful line of a command's output.
fn summarize(output: &CommandOutput) -> String {
    output
        .stdout
        .lines()
        .chain(output.stderr.lines())
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("no output")
        .to_string()
}
