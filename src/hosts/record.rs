// ABOUTME: Per-host bookkeeping of alive, down, and removed nodes.
// ABOUTME: Enforces that a node is in one set at most and the host's capacity is never exceeded.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

use crate::types::NodeName;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostRecordError {
    #[error("host {host} already tracks {configured} nodes")]
    Full { host: String, configured: u32 },

    #[error("node {node} is already alive on {host}")]
    AlreadyAlive { host: String, node: String },

    #[error("node {node} is not alive on {host}")]
    NotAlive { host: String, node: String },

    #[error("node {node} is not tracked on {host}")]
    Unknown { host: String, node: String },

    #[error("node {node} does not belong to any configured host")]
    NoHost { node: String },
}

/// What a host has run since its slots were last handed out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRecord {
    address: String,
    configured: u32,
    alive: BTreeSet<NodeName>,
    down: BTreeSet<NodeName>,
    removed: BTreeSet<NodeName>,
    /// Slots are back in the free table and wait for a new deployment.
    needs_nodes: bool,
    next_index: u32,
}

impl HostRecord {
    pub fn new(address: impl Into<String>, configured: u32) -> Self {
        Self {
            address: address.into(),
            configured: configured.max(1),
            alive: BTreeSet::new(),
            down: BTreeSet::new(),
            removed: BTreeSet::new(),
            needs_nodes: true,
            next_index: 0,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn configured(&self) -> u32 {
        self.configured
    }

    pub fn alive(&self) -> impl Iterator<Item = &NodeName> {
        self.alive.iter()
    }

    pub fn down(&self) -> impl Iterator<Item = &NodeName> {
        self.down.iter()
    }

    pub fn removed(&self) -> impl Iterator<Item = &NodeName> {
        self.removed.iter()
    }

    pub fn needs_nodes(&self) -> bool {
        self.needs_nodes
    }

    pub fn has_alive(&self) -> bool {
        !self.alive.is_empty()
    }

    pub fn alive_count(&self) -> u32 {
        count(&self.alive)
    }

    pub fn tracked(&self) -> u32 {
        count(&self.alive) + count(&self.down) + count(&self.removed)
    }

    pub fn contains(&self, node: &NodeName) -> bool {
        self.alive.contains(node) || self.down.contains(node) || self.removed.contains(node)
    }

    /// Next unused node index on this host.
    pub(crate) fn allocate_index(&mut self) -> u32 {
        let index = self.next_index;
        self.next_index += 1;
        index
    }

    pub(crate) fn set_needs_nodes(&mut self, needs_nodes: bool) {
        self.needs_nodes = needs_nodes;
    }

    /// Undo a registration the backend refused after the node was marked alive.
    pub(crate) fn forget_alive(&mut self, node: &NodeName) {
        self.alive.remove(node);
    }

    /// A node registered, or a down node reconnected.
    pub fn mark_alive(&mut self, node: &NodeName) -> Result<(), HostRecordError> {
        if self.alive.contains(node) {
            return Err(HostRecordError::AlreadyAlive {
                host: self.address.clone(),
                node: node.to_string(),
            });
        }
        if self.down.remove(node) {
            self.alive.insert(node.clone());
            return Ok(());
        }
        if self.removed.contains(node) || self.tracked() >= self.configured {
            return Err(HostRecordError::Full {
                host: self.address.clone(),
                configured: self.configured,
            });
        }
        self.alive.insert(node.clone());
        Ok(())
    }

    pub fn mark_down(&mut self, node: &NodeName) -> Result<(), HostRecordError> {
        if !self.alive.remove(node) {
            return Err(HostRecordError::NotAlive {
                host: self.address.clone(),
                node: node.to_string(),
            });
        }
        self.down.insert(node.clone());
        Ok(())
    }

    pub fn mark_removed(&mut self, node: &NodeName) -> Result<(), HostRecordError> {
        if !self.alive.remove(node) && !self.down.remove(node) {
            return Err(HostRecordError::Unknown {
                host: self.address.clone(),
                node: node.to_string(),
            });
        }
        self.removed.insert(node.clone());
        Ok(())
    }

    /// Forget every removed and down node and report how many slots they held.
    ///
    /// Only valid once no node is alive; returns zero otherwise.
    pub(crate) fn release(&mut self) -> u32 {
        if self.has_alive() {
            return 0;
        }
        let released = count(&self.removed) + count(&self.down);
        self.removed.clear();
        self.down.clear();
        self.needs_nodes = true;
        released
    }
}

fn count(set: &BTreeSet<NodeName>) -> u32 {
    u32::try_from(set.len()).unwrap_or(u32::MAX)
}
