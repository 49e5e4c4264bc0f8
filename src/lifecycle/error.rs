// ABOUTME: Error taxonomy for node lifecycle transitions and acquisition attempts.
// ABOUTME: Each error maps to a kind so callers can tell fatal from recoverable failures.

use crate::state::StateError;
use crate::types::DeployingNodeUrl;

/// Raised by an admission hook to refuse a registering node.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct RejectionError(pub String);

impl RejectionError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Errors that can occur while driving the node lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// Bad parameters at setup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Name is malformed or already tracked.
    #[error("invalid deploying node name '{name}': {reason}")]
    DuplicateName { name: String, reason: String },

    /// A node registered without a matching deploying record.
    #[error("not expected node registered, discarding it: {0}")]
    UnexpectedNode(String),

    /// The node source no longer accepts new deploying nodes.
    #[error("node source {0} is shutting down")]
    ShuttingDown(String),

    /// Remote command failed to start or exited abnormally.
    #[error("deployment failed: {0}")]
    Deployment(String),

    /// The deploying node's deadline fired, or it was removed, before registration.
    #[error("deploying node {url} is not expected anymore")]
    Timeout { url: DeployingNodeUrl },

    /// Too many consecutive faults while monitoring an attempt.
    #[error("circuit breaker exhausted after {faults} monitoring faults, last: {last}")]
    CircuitBreakerExhausted { faults: u32, last: String },

    /// The submission command failed and produced no usable job identifier.
    #[error("submission for node {node} failed with exit code {exit_code}: {output}")]
    SubmissionFailed {
        node: String,
        exit_code: i32,
        output: String,
    },

    /// The admission hook refused a registering node.
    #[error("node {node} rejected: {source}")]
    Rejected {
        node: String,
        #[source]
        source: RejectionError,
    },

    /// Snapshot could not be restored.
    #[error("state error: {0}")]
    State(#[from] StateError),
}

/// Error kind for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleErrorKind {
    Configuration,
    DuplicateName,
    UnexpectedNode,
    ShuttingDown,
    Deployment,
    Timeout,
    CircuitBreakerExhausted,
    SubmissionFailed,
    Rejected,
    State,
}

impl LifecycleError {
    /// Returns the error kind for programmatic handling.
    pub fn kind(&self) -> LifecycleErrorKind {
        match self {
            LifecycleError::Configuration(_) => LifecycleErrorKind::Configuration,
            LifecycleError::DuplicateName { .. } => LifecycleErrorKind::DuplicateName,
            LifecycleError::UnexpectedNode(_) => LifecycleErrorKind::UnexpectedNode,
            LifecycleError::ShuttingDown(_) => LifecycleErrorKind::ShuttingDown,
            LifecycleError::Deployment(_) => LifecycleErrorKind::Deployment,
            LifecycleError::Timeout { .. } => LifecycleErrorKind::Timeout,
            LifecycleError::CircuitBreakerExhausted { .. } => {
                LifecycleErrorKind::CircuitBreakerExhausted
            }
            LifecycleError::SubmissionFailed { .. } => LifecycleErrorKind::SubmissionFailed,
            LifecycleError::Rejected { .. } => LifecycleErrorKind::Rejected,
            LifecycleError::State(_) => LifecycleErrorKind::State,
        }
    }

    /// Whether the failure only concerns the current acquisition attempt.
    ///
    /// Configuration and state errors must reach the caller; everything else
    /// ends in a lost node and a log entry.
    pub fn is_attempt_local(&self) -> bool {
        !matches!(
            self.kind(),
            LifecycleErrorKind::Configuration | LifecycleErrorKind::State
        )
    }

    pub fn deployment(message: impl Into<String>) -> Self {
        LifecycleError::Deployment(message.into())
    }
}
