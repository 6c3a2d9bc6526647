//! Live, mutable cluster state.
//!
//! `ClusterState` is the in-process, `RwLock`-guarded store that heartbeats,
//! joins, and routing-table updates mutate. The allocator never touches it
//! directly — callers take a [`ClusterStateSnapshot`] via [`ClusterState::snapshot`]
//! and feed that immutable copy to `allocator::allocate_shards` /
//! `allocator::rebalance_shards`.

use crate::model::{ClusterStateSnapshot, IndexMetadata, Node, NodeStatus, ShardRoutingEntry};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// A node's liveness bookkeeping, layered on top of the plain [`Node`] data.
#[derive(Debug, Clone)]
struct NodeEntry {
    node: Node,
    last_heartbeat: u64,
}

/// Cluster-wide mutable state: nodes, indices, and the shard routing table.
#[derive(Debug)]
pub struct ClusterState {
    cluster_uuid: String,
    heartbeat_timeout_secs: u64,
    nodes: RwLock<HashMap<String, NodeEntry>>,
    indices: RwLock<HashMap<String, IndexMetadata>>,
    shard_routing: RwLock<HashMap<String, ShardRoutingEntry>>,
    version: RwLock<u64>,
}

impl ClusterState {
    pub fn new(cluster_uuid: impl Into<String>, heartbeat_timeout_secs: u64) -> Self {
        Self {
            cluster_uuid: cluster_uuid.into(),
            heartbeat_timeout_secs,
            nodes: RwLock::new(HashMap::new()),
            indices: RwLock::new(HashMap::new()),
            shard_routing: RwLock::new(HashMap::new()),
            version: RwLock::new(0),
        }
    }

    fn bump_version(&self) -> u64 {
        let mut version = self.version.write();
        *version += 1;
        *version
    }

    /// Register a node, or replace its recorded info if it already exists.
    pub fn join_node(&self, node: Node) {
        let node_id = node.node_id.clone();
        self.nodes.write().insert(
            node_id.clone(),
            NodeEntry {
                node,
                last_heartbeat: now_secs(),
            },
        );
        self.bump_version();
        tracing::info!(node_id, "node joined");
    }

    /// Remove a node from the cluster entirely.
    pub fn leave_node(&self, node_id: &str) -> bool {
        let removed = self.nodes.write().remove(node_id).is_some();
        if removed {
            self.bump_version();
            tracing::info!(node_id, "node left");
        }
        removed
    }

    /// Record a heartbeat, marking the node healthy if it was previously
    /// unhealthy.
    pub fn record_heartbeat(&self, node_id: &str) -> bool {
        let mut nodes = self.nodes.write();
        match nodes.get_mut(node_id) {
            Some(entry) => {
                entry.last_heartbeat = now_secs();
                if entry.node.status == NodeStatus::Unhealthy {
                    entry.node.status = NodeStatus::Healthy;
                }
                crate::metrics::record_heartbeat(node_id);
                true
            }
            None => false,
        }
    }

    /// Mark any node whose heartbeat is older than the configured timeout as
    /// unhealthy. Returns the node ids that transitioned.
    pub fn sweep_timeouts(&self) -> Vec<String> {
        let now = now_secs();
        let mut timed_out = Vec::new();
        let mut nodes = self.nodes.write();
        for (node_id, entry) in nodes.iter_mut() {
            if entry.node.status == NodeStatus::Healthy
                && now.saturating_sub(entry.last_heartbeat) >= self.heartbeat_timeout_secs
            {
                entry.node.status = NodeStatus::Unhealthy;
                crate::metrics::record_node_timed_out(node_id);
                timed_out.push(node_id.clone());
            }
        }
        drop(nodes);
        if !timed_out.is_empty() {
            self.bump_version();
        }
        timed_out
    }

    /// Mark a node as draining: still reachable, no longer eligible for new
    /// shard assignments.
    pub fn drain_node(&self, node_id: &str) -> bool {
        let marked = self
            .nodes
            .write()
            .get_mut(node_id)
            .map(|entry| entry.node.status = NodeStatus::Draining)
            .is_some();
        if marked {
            self.bump_version();
        }
        marked
    }

    /// Register or replace an index's metadata.
    pub fn put_index(&self, metadata: IndexMetadata) {
        self.indices.write().insert(metadata.name.clone(), metadata);
        self.bump_version();
    }

    /// Apply allocation/rebalance decisions by writing routing entries. Does
    /// not validate the decisions — the allocator is assumed to have already
    /// enforced placement invariants.
    pub fn apply_routing_entries(&self, entries: Vec<ShardRoutingEntry>) {
        if entries.is_empty() {
            return;
        }
        let mut routing = self.shard_routing.write();
        for entry in entries {
            let key = crate::model::routing_entry_key(&entry.index_name, entry.shard_id, entry.slot);
            routing.insert(key, entry);
        }
        drop(routing);
        self.bump_version();
    }

    /// Take an immutable, point-in-time copy of the cluster state for the
    /// allocator to read.
    pub fn snapshot(&self) -> ClusterStateSnapshot {
        ClusterStateSnapshot {
            version: *self.version.read(),
            cluster_uuid: self.cluster_uuid.clone(),
            nodes: self
                .nodes
                .read()
                .iter()
                .map(|(id, entry)| (id.clone(), entry.node.clone()))
                .collect(),
            indices: self.indices.read().clone(),
            shard_routing: self.shard_routing.read().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NodeKind, StorageTier};

    fn data_node(id: &str) -> Node {
        Node {
            node_id: id.to_string(),
            kind: NodeKind::Data,
            status: NodeStatus::Healthy,
            tier: StorageTier::Hot,
            max_shards: None,
        }
    }

    #[test]
    fn join_and_snapshot_roundtrip() {
        let state = ClusterState::new("uuid-1", 30);
        state.join_node(data_node("n1"));
        let snapshot = state.snapshot();
        assert_eq!(snapshot.nodes.len(), 1);
        assert_eq!(snapshot.version, 1);
    }

    #[test]
    fn leave_removes_node() {
        let state = ClusterState::new("uuid-1", 30);
        state.join_node(data_node("n1"));
        assert!(state.leave_node("n1"));
        assert!(state.snapshot().nodes.is_empty());
    }

    #[test]
    fn sweep_marks_unhealthy_after_timeout() {
        let state = ClusterState::new("uuid-1", 0);
        state.join_node(data_node("n1"));
        std::thread::sleep(std::time::Duration::from_millis(1100));
        let timed_out = state.sweep_timeouts();
        assert_eq!(timed_out, vec!["n1".to_string()]);
        assert_eq!(
            state.snapshot().nodes["n1"].status,
            NodeStatus::Unhealthy
        );
    }

    #[test]
    fn drain_excludes_from_eligibility() {
        let state = ClusterState::new("uuid-1", 30);
        state.join_node(data_node("n1"));
        state.drain_node("n1");
        assert!(state.snapshot().eligible_nodes().is_empty());
    }
}
