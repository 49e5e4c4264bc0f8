// ABOUTME: Deploying node records and the node collections of a lifecycle.
// ABOUTME: Deploying, lost, and acquired membership is kept mutually exclusive.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use crate::types::{DeployingNodeUrl, NodeName};

/// A node that has been asked for but not yet confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployingNode {
    pub url: DeployingNodeUrl,
    pub name: NodeName,
    /// Command used to deploy the node, with secrets obfuscated.
    pub command: String,
    /// Free-text status shown to operators.
    pub description: String,
    pub created_at: DateTime<Utc>,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    pub lost: bool,
    /// Name of the owning node source.
    pub source: String,
    /// Identifies the armed deadline; re-issued on recovery.
    #[serde(skip)]
    pub(crate) ticket: u64,
}

impl DeployingNode {
    /// Time left before the deadline, measured from `created_at`.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        let elapsed = (now - self.created_at).to_std().unwrap_or(Duration::ZERO);
        self.timeout.saturating_sub(elapsed)
    }
}

/// Node collections of one node source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeTable {
    pub(crate) deploying: BTreeMap<DeployingNodeUrl, DeployingNode>,
    pub(crate) lost: BTreeMap<DeployingNodeUrl, DeployingNode>,
    pub(crate) acquired: BTreeSet<NodeName>,
    pub(crate) using_deploying_nodes: bool,
}

impl NodeTable {
    pub fn deploying(&self) -> impl Iterator<Item = &DeployingNode> {
        self.deploying.values()
    }

    pub fn lost(&self) -> impl Iterator<Item = &DeployingNode> {
        self.lost.values()
    }

    pub fn acquired(&self) -> impl Iterator<Item = &NodeName> {
        self.acquired.iter()
    }

    pub fn is_deploying(&self, url: &DeployingNodeUrl) -> bool {
        self.deploying.contains_key(url)
    }

    pub fn is_lost(&self, url: &DeployingNodeUrl) -> bool {
        self.lost.contains_key(url)
    }

    pub fn is_acquired(&self, name: &NodeName) -> bool {
        self.acquired.contains(name)
    }

    /// Record in either the deploying or the lost collection.
    pub fn get(&self, url: &DeployingNodeUrl) -> Option<&DeployingNode> {
        self.deploying.get(url).or_else(|| self.lost.get(url))
    }

    pub fn uses_deploying_nodes(&self) -> bool {
        self.using_deploying_nodes
    }

    pub fn counts(&self) -> NodeCounts {
        NodeCounts {
            deploying: self.deploying.len(),
            lost: self.lost.len(),
            acquired: self.acquired.len(),
        }
    }
}

/// Sizes of the node collections.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCounts {
    pub deploying: usize,
    pub lost: usize,
    pub acquired: usize,
}

/// Everything a lifecycle persists: node collections plus backend state.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ManagerState<S> {
    pub(crate) nodes: NodeTable,
    pub(crate) backend: S,
}

impl<S> ManagerState<S> {
    pub fn nodes(&self) -> &NodeTable {
        &self.nodes
    }

    pub fn backend(&self) -> &S {
        &self.backend
    }
}
