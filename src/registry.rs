//! C4: NodeRegistry — the only mutable shared cluster-membership state.
//! Every other component reaches node state through these narrow,
//! typed accessors; nothing outside this module ever gets a raw
//! reference into an entry.

use crate::error::{ClusterError, ClusterResult};
use crate::model::{NodeCapabilities, NodeEntry, NodeId, NodeStatus, ResourceSample};
use dashmap::DashMap;
use std::time::Instant;

pub struct NodeRegistry {
    entries: DashMap<NodeId, NodeEntry>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Inserts or refreshes an entry. Idempotent: re-registering an id
    /// replaces capabilities and resets status/heartbeat, matching
    /// `Register(n,c); Register(n,c')` leaving capabilities = `c'`.
    pub fn register(&self, node_id: NodeId, capabilities: NodeCapabilities) -> ClusterResult<()> {
        if node_id.as_str().is_empty() {
            return Err(ClusterError::ConfigInvalid("node id must not be empty".into()));
        }
        self.entries.insert(
            node_id.clone(),
            NodeEntry {
                node_id,
                capabilities,
                status: NodeStatus::Healthy,
                last_heartbeat: Instant::now(),
                latest_sample: None,
                live_connections: 0,
            },
        );
        Ok(())
    }

    /// Updates the sample and heartbeat timestamp for a registered node.
    /// A successful heartbeat from a previously-failed node restores it to
    /// Healthy (resurrection), making it eligible for dispatch again.
    pub fn heartbeat(&self, node_id: &NodeId, sample: ResourceSample) -> ClusterResult<()> {
        let mut entry = self
            .entries
            .get_mut(node_id)
            .ok_or_else(|| ClusterError::NotRegistered(node_id.to_string()))?;
        sample.validate().map_err(ClusterError::InvalidSample)?;
        entry.last_heartbeat = Instant::now();
        entry.latest_sample = Some(sample);
        if entry.status == NodeStatus::Failed {
            entry.status = NodeStatus::Healthy;
        }
        Ok(())
    }

    pub fn inc_conn(&self, node_id: &NodeId) -> ClusterResult<u64> {
        let mut entry = self
            .entries
            .get_mut(node_id)
            .ok_or_else(|| ClusterError::NotRegistered(node_id.to_string()))?;
        entry.live_connections += 1;
        Ok(entry.live_connections)
    }

    pub fn dec_conn(&self, node_id: &NodeId) -> ClusterResult<u64> {
        let mut entry = self
            .entries
            .get_mut(node_id)
            .ok_or_else(|| ClusterError::NotRegistered(node_id.to_string()))?;
        entry.live_connections = entry.live_connections.saturating_sub(1);
        Ok(entry.live_connections)
    }

    /// Transitions a node to Failed. Idempotent — returns `true` only the
    /// first time (the transition actually happened), so the caller can
    /// raise the NodeFailure alert exactly once.
    pub fn mark_failed(&self, node_id: &NodeId) -> bool {
        match self.entries.get_mut(node_id) {
            Some(mut entry) if entry.status != NodeStatus::Failed => {
                entry.status = NodeStatus::Failed;
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, node_id: &NodeId) -> Option<NodeEntry> {
        self.entries.get(node_id).map(|e| e.clone())
    }

    pub fn healthy_node_ids_supporting(&self, validator_kind: Option<&str>) -> Vec<NodeId> {
        self.entries
            .iter()
            .filter(|e| e.status == NodeStatus::Healthy)
            .filter(|e| match validator_kind {
                Some(kind) => e.capabilities.supported_validators.contains(kind),
                None => true,
            })
            .map(|e| e.node_id.clone())
            .collect()
    }

    /// Point-in-time view of every entry; never blocks writers.
    pub fn snapshot(&self) -> Vec<NodeEntry> {
        self.entries.iter().map(|e| e.clone()).collect()
    }

    pub fn last_heartbeat(&self, node_id: &NodeId) -> Option<Instant> {
        self.entries.get(node_id).map(|e| e.last_heartbeat)
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
