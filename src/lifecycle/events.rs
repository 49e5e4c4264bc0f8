// ABOUTME: Node lifecycle events broadcast to subscribers.
// ABOUTME: Emitted after the state lock is released, in transition order.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// What happened to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeEventKind {
    /// A deploying node was created.
    Added,
    /// A deploying node was declared lost.
    Lost,
    /// A node registered and joined the acquired set.
    Acquired,
    /// A deploying or lost record was removed.
    Removed,
    /// An acquired node was released.
    Released,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeEvent {
    pub kind: NodeEventKind,
    pub source: String,
    /// Node name.
    pub node: String,
    /// Deploying URL, or the runtime URL for acquired nodes.
    pub url: String,
    pub description: String,
    pub at: DateTime<Utc>,
}

impl NodeEvent {
    pub fn new(
        kind: NodeEventKind,
        source: &str,
        node: impl Into<String>,
        url: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            source: source.to_string(),
            node: node.into(),
            url: url.into(),
            description: description.into(),
            at: Utc::now(),
        }
    }
}
