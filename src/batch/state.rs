// ABOUTME: Persisted state of a batch queue source.
// ABOUTME: Registered nodes with their job ids, and the number of submissions in flight.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::{JobId, NodeName};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchState {
    /// Registered nodes; the job id is unknown when the submission printed none.
    current_nodes: BTreeMap<NodeName, Option<JobId>>,
    /// Submissions whose node has not registered or been lost yet.
    deploying: u32,
    /// Source of node indexes.
    next_index: u32,
}

impl BatchState {
    pub fn current_nodes(&self) -> &BTreeMap<NodeName, Option<JobId>> {
        &self.current_nodes
    }

    pub fn job_of(&self, node: &NodeName) -> Option<&JobId> {
        self.current_nodes.get(node).and_then(Option::as_ref)
    }

    pub fn deploying(&self) -> u32 {
        self.deploying
    }

    /// Registered plus in-flight nodes.
    pub fn in_use(&self) -> u32 {
        u32::try_from(self.current_nodes.len())
            .unwrap_or(u32::MAX)
            .saturating_add(self.deploying)
    }

    /// Reserve room for one more submission. Returns its node index, or
    /// None when `max_nodes` are already in use.
    pub(crate) fn reserve(&mut self, max_nodes: u32) -> Option<u32> {
        if self.in_use() >= max_nodes {
            return None;
        }
        self.deploying += 1;
        let index = self.next_index;
        self.next_index += 1;
        Some(index)
    }

    /// A submission ended without a registered node.
    pub(crate) fn release_deploying(&mut self) {
        self.deploying = self.deploying.saturating_sub(1);
    }

    /// A submission's node registered.
    pub(crate) fn promote(&mut self, node: NodeName, job: Option<JobId>) {
        self.release_deploying();
        self.current_nodes.insert(node, job);
    }

    /// Attach the job id of a registered node. Returns false for unknown nodes.
    pub(crate) fn record_job(&mut self, node: &NodeName, job: JobId) -> bool {
        match self.current_nodes.get_mut(node) {
            Some(slot) => {
                *slot = Some(job);
                true
            }
            None => false,
        }
    }

    pub(crate) fn remove_node(&mut self, node: &NodeName) -> Option<Option<JobId>> {
        self.current_nodes.remove(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_respects_max_nodes() {
        let mut state = BatchState::default();
        assert_eq!(state.reserve(2), Some(0));
        assert_eq!(state.reserve(2), Some(1));
        assert_eq!(state.reserve(2), None);

        state.release_deploying();
        assert_eq!(state.reserve(2), Some(2));
    }

    #[test]
    fn promote_moves_from_deploying_to_current() {
        let mut state = BatchState::default();
        state.reserve(1).unwrap();
        let node = NodeName::new("batch__0").unwrap();
        state.promote(node.clone(), Some(JobId::new("12345")));

        assert_eq!(state.deploying(), 0);
        assert_eq!(state.job_of(&node).unwrap().as_str(), "12345");
        assert_eq!(state.in_use(), 1);
        assert_eq!(state.reserve(1), None);
    }

    #[test]
    fn record_job_only_for_registered_nodes() {
        let mut state = BatchState::default();
        let node = NodeName::new("batch__0").unwrap();
        assert!(!state.record_job(&node, JobId::new("1")));

        state.promote(node.clone(), None);
        assert!(state.job_of(&node).is_none());
        assert!(state.record_job(&node, JobId::new("1")));
        assert_eq!(state.job_of(&node).unwrap().as_str(), "1");
    }

    #[test]
    fn release_never_underflows() {
        let mut state = BatchState::default();
        state.release_deploying();
        assert_eq!(state.deploying(), 0);
    }
}
