// ABOUTME: Persisted state of a host allocation pool.
// ABOUTME: Free-host table, failure counters, exclusions, and per-host records in one struct.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::naming::NodeNameBuilder;
use super::record::{HostRecord, HostRecordError};
use crate::types::{NodeName, RegisteredNode};

/// A host and the number of nodes to deploy on it in one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostTarget {
    pub address: String,
    pub count: u32,
}

impl HostTarget {
    pub fn new(address: impl Into<String>, count: u32) -> Self {
        Self {
            address: address.into(),
            count: count.max(1),
        }
    }
}

/// Result of booking a failed attempt against a host's counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Slots went back to the free table; `remaining` attempts are left.
    Retry { remaining: u32 },
    /// The counter reached zero; the host is never handed out again.
    Excluded,
    /// Every requested node registered despite the error.
    Satisfied,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolState {
    free_hosts: BTreeMap<String, u32>,
    failure_counters: BTreeMap<String, u32>,
    excluded: BTreeSet<String>,
    hosts: BTreeMap<String, HostRecord>,
}

impl PoolState {
    /// Slots currently waiting for a deployment, per host.
    pub fn free_hosts(&self) -> &BTreeMap<String, u32> {
        &self.free_hosts
    }

    pub fn free_slots(&self) -> u32 {
        self.free_hosts.values().sum()
    }

    pub fn failure_counter(&self, host: &str) -> Option<u32> {
        self.failure_counters.get(host).copied()
    }

    pub fn is_excluded(&self, host: &str) -> bool {
        self.excluded.contains(host)
    }

    pub fn excluded(&self) -> impl Iterator<Item = &str> {
        self.excluded.iter().map(String::as_str)
    }

    pub fn host(&self, address: &str) -> Option<&HostRecord> {
        self.hosts.get(address)
    }

    pub fn hosts(&self) -> impl Iterator<Item = &HostRecord> {
        self.hosts.values()
    }

    // =========================================================================
    // Allocation
    // =========================================================================

    /// Add configured hosts that this state does not know yet.
    pub(crate) fn seed(&mut self, targets: &[HostTarget], threshold: u32) {
        for target in targets {
            if self.hosts.contains_key(&target.address) {
                continue;
            }
            self.hosts.insert(
                target.address.clone(),
                HostRecord::new(&target.address, target.count),
            );
            self.failure_counters
                .insert(target.address.clone(), threshold);
            self.free_hosts.insert(target.address.clone(), target.count);
        }
    }

    /// Return the slots of hosts whose attempt died with a previous process.
    ///
    /// Such a host is neither free, excluded, nor running anything.
    pub(crate) fn reclaim_abandoned(&mut self) -> Vec<String> {
        let mut reclaimed = Vec::new();
        for (address, record) in &mut self.hosts {
            if self.free_hosts.contains_key(address)
                || self.excluded.contains(address)
                || record.tracked() > 0
            {
                continue;
            }
            record.set_needs_nodes(true);
            self.free_hosts
                .insert(address.clone(), record.configured());
            reclaimed.push(address.clone());
        }
        reclaimed
    }

    /// Pop the next free host.
    pub(crate) fn take_next(&mut self) -> Option<HostTarget> {
        while let Some((address, count)) = self.free_hosts.pop_first() {
            if self.excluded.contains(&address) || count == 0 {
                continue;
            }
            if let Some(record) = self.hosts.get_mut(&address) {
                record.set_needs_nodes(false);
            }
            return Some(HostTarget { address, count });
        }
        None
    }

    /// Pop one specific host, if it is still free.
    pub(crate) fn take_host(&mut self, address: &str) -> Option<HostTarget> {
        if self.excluded.contains(address) {
            return None;
        }
        let count = self.free_hosts.remove(address)?;
        if let Some(record) = self.hosts.get_mut(address) {
            record.set_needs_nodes(false);
        }
        Some(HostTarget {
            address: address.to_string(),
            count,
        })
    }

    pub(crate) fn next_node_name(&mut self, address: &str, naming: &NodeNameBuilder) -> String {
        let record = self
            .hosts
            .entry(address.to_string())
            .or_insert_with(|| HostRecord::new(address, 1));
        naming.name(address, record.allocate_index())
    }

    pub(crate) fn alive_on(&self, address: &str) -> u32 {
        self.hosts
            .get(address)
            .map(HostRecord::alive_count)
            .unwrap_or(0)
    }

    pub(crate) fn record_success(&mut self, address: &str, threshold: u32) {
        self.failure_counters
            .insert(address.to_string(), threshold);
    }

    /// Book a failed attempt of `requested` nodes that started with
    /// `alive_before` nodes alive on the host.
    pub(crate) fn record_failure(
        &mut self,
        address: &str,
        requested: u32,
        alive_before: u32,
        threshold: u32,
    ) -> FailureOutcome {
        let registered = self.alive_on(address).saturating_sub(alive_before);
        let missing = requested.saturating_sub(registered);
        if missing == 0 {
            self.record_success(address, threshold);
            return FailureOutcome::Satisfied;
        }

        let counter = self
            .failure_counters
            .entry(address.to_string())
            .or_insert(threshold);
        *counter = counter.saturating_sub(1);

        if *counter > 0 {
            let remaining = *counter;
            *self.free_hosts.entry(address.to_string()).or_insert(0) += missing;
            FailureOutcome::Retry { remaining }
        } else {
            self.free_hosts.remove(address);
            self.excluded.insert(address.to_string());
            FailureOutcome::Excluded
        }
    }

    // =========================================================================
    // Node tracking
    // =========================================================================

    /// Host a node belongs to: the host tracking it, else the host it
    /// reported, else the host its name was built for.
    fn host_of(
        &self,
        node: &NodeName,
        reported: Option<&str>,
        naming: &NodeNameBuilder,
    ) -> Option<String> {
        if let Some(record) = self.hosts.values().find(|r| r.contains(node)) {
            return Some(record.address().to_string());
        }
        if let Some(host) = reported
            && self.hosts.contains_key(host)
        {
            return Some(host.to_string());
        }
        self.hosts
            .keys()
            .find(|address| naming.belongs_to(node.as_str(), address))
            .cloned()
    }

    fn tracking_host(&self, node: &NodeName) -> Option<String> {
        self.hosts
            .values()
            .find(|r| r.contains(node))
            .map(|r| r.address().to_string())
    }

    pub(crate) fn mark_alive(
        &mut self,
        node: &RegisteredNode,
        naming: &NodeNameBuilder,
    ) -> Result<(), HostRecordError> {
        let address = self
            .host_of(&node.name, node.host.as_deref(), naming)
            .ok_or_else(|| HostRecordError::NoHost {
                node: node.name.to_string(),
            })?;
        match self.hosts.get_mut(&address) {
            Some(record) => record.mark_alive(&node.name),
            None => Err(HostRecordError::NoHost {
                node: node.name.to_string(),
            }),
        }
    }

    pub(crate) fn forget_alive(&mut self, node: &NodeName) {
        for record in self.hosts.values_mut() {
            record.forget_alive(node);
        }
    }

    /// Mark a node removed; hands back the host's slots when it was the last
    /// alive node.
    ///
    /// A node whose host was already released (after going down) is accepted
    /// without effect.
    pub(crate) fn release_node(
        &mut self,
        node: &NodeName,
        naming: &NodeNameBuilder,
    ) -> Result<Option<HostTarget>, HostRecordError> {
        let Some(address) = self.tracking_host(node) else {
            return match self.host_of(node, None, naming) {
                Some(_) => Ok(None),
                None => Err(HostRecordError::NoHost {
                    node: node.to_string(),
                }),
            };
        };

        if let Some(record) = self.hosts.get_mut(&address) {
            record.mark_removed(node)?;
        }
        Ok(self.release_if_idle(&address))
    }

    pub(crate) fn mark_down(
        &mut self,
        node: &NodeName,
    ) -> Result<Option<HostTarget>, HostRecordError> {
        let address = self.tracking_host(node).ok_or_else(|| HostRecordError::NoHost {
            node: node.to_string(),
        })?;
        if let Some(record) = self.hosts.get_mut(&address) {
            record.mark_down(node)?;
        }
        Ok(self.release_if_idle(&address))
    }

    pub(crate) fn mark_reconnected(&mut self, node: &NodeName) -> Result<(), HostRecordError> {
        let address = self.tracking_host(node).ok_or_else(|| HostRecordError::NoHost {
            node: node.to_string(),
        })?;
        match self.hosts.get_mut(&address) {
            Some(record) if record.down().any(|n| n == node) => record.mark_alive(node),
            Some(_) => Err(HostRecordError::Unknown {
                host: address,
                node: node.to_string(),
            }),
            None => Err(HostRecordError::NoHost {
                node: node.to_string(),
            }),
        }
    }

    /// Once a host has no alive node, its removed and down slots return to the
    /// free table (unless the host is excluded) and the host must be torn down.
    fn release_if_idle(&mut self, address: &str) -> Option<HostTarget> {
        let record = self.hosts.get_mut(address)?;
        if record.has_alive() {
            return None;
        }
        let released = record.release();
        if released == 0 {
            return None;
        }
        if !self.excluded.contains(address) {
            *self.free_hosts.entry(address.to_string()).or_insert(0) += released;
        }
        Some(HostTarget {
            address: address.to_string(),
            count: released,
        })
    }
}
