//! Cluster data model: nodes, indices, shard routing.
//!
//! These types are the read-only view the allocator consumes. They are
//! intentionally plain data — no behavior beyond small predicate helpers —
//! so that a snapshot can be passed by value into a pure function.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Kind of a cluster node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Master,
    Coordination,
    Data,
}

/// Health status of a node, as last observed via heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Healthy,
    Unhealthy,
    /// Still reachable but not accepting new shard assignments.
    Draining,
}

/// Storage tier a node's disks belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageTier {
    Hot,
    Warm,
    Cold,
}

/// A node in the cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub node_id: String,
    pub kind: NodeKind,
    pub status: NodeStatus,
    pub tier: StorageTier,
    /// Upper bound on shards this node will accept. `None` means unbounded.
    #[serde(default)]
    pub max_shards: Option<u32>,
}

impl Node {
    /// Eligibility predicate used throughout the allocator: `kind=data ∧
    /// status=healthy`. Draining and unhealthy data nodes are excluded.
    pub fn is_eligible(&self) -> bool {
        self.kind == NodeKind::Data && self.status == NodeStatus::Healthy
    }
}

/// Immutable metadata about an index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub name: String,
    pub created_at_version: u64,
    pub shard_count: u32,
    pub replica_count: u32,
}

/// A slot within a shard: the primary, or one numbered replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardSlot {
    Primary,
    Replica(u32),
}

impl ShardSlot {
    pub fn is_primary(&self) -> bool {
        matches!(self, ShardSlot::Primary)
    }
}

/// A single entry in the shard routing table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardRoutingEntry {
    pub index_name: String,
    pub shard_id: u32,
    pub slot: ShardSlot,
    pub node_id: String,
    pub epoch: u64,
}

/// Key used to group all slots of one shard: `"{index}:{shard_id}"`. Several
/// [`ShardRoutingEntry`] values (one primary, zero or more replicas) share
/// this key — use [`routing_entry_key`] for the `ClusterStateSnapshot`
/// storage key, which must be unique per entry.
pub fn routing_key(index_name: &str, shard_id: u32) -> String {
    format!("{}:{}", index_name, shard_id)
}

/// Storage key for one routing entry, unique per `(index, shard, slot)`.
pub fn routing_entry_key(index_name: &str, shard_id: u32, slot: ShardSlot) -> String {
    match slot {
        ShardSlot::Primary => format!("{}:primary", routing_key(index_name, shard_id)),
        ShardSlot::Replica(ordinal) => {
            format!("{}:replica{}", routing_key(index_name, shard_id), ordinal)
        }
    }
}

/// A desired new placement of one shard slot on one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationDecision {
    pub index_name: String,
    pub shard_id: u32,
    pub is_primary: bool,
    pub node_id: String,
}

/// A desired move of an already-placed shard between two nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebalanceDecision {
    pub index_name: String,
    pub shard_id: u32,
    pub from_node: String,
    pub to_node: String,
}

/// Immutable, serializable snapshot of replicated cluster state — the sole
/// input the allocator operates on. Taken by value (or shared reference);
/// the allocator never mutates it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterStateSnapshot {
    pub version: u64,
    pub cluster_uuid: String,
    pub nodes: HashMap<String, Node>,
    pub indices: HashMap<String, IndexMetadata>,
    pub shard_routing: HashMap<String, ShardRoutingEntry>,
}

impl ClusterStateSnapshot {
    /// All nodes satisfying the allocator's eligibility predicate, sorted by
    /// node id for deterministic iteration order.
    pub fn eligible_nodes(&self) -> Vec<&Node> {
        let mut nodes: Vec<&Node> = self.nodes.values().filter(|n| n.is_eligible()).collect();
        nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        nodes
    }

    /// Routing entries belonging to a given `(index, shard_id)`.
    pub fn shard_entries(&self, index_name: &str, shard_id: u32) -> Vec<&ShardRoutingEntry> {
        self.shard_routing
            .values()
            .filter(|e| e.index_name == index_name && e.shard_id == shard_id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_node(id: &str, kind: NodeKind, status: NodeStatus) -> Node {
        Node {
            node_id: id.to_string(),
            kind,
            status,
            tier: StorageTier::Hot,
            max_shards: None,
        }
    }

    #[test]
    fn eligible_requires_data_and_healthy() {
        assert!(make_node("n1", NodeKind::Data, NodeStatus::Healthy).is_eligible());
        assert!(!make_node("n1", NodeKind::Data, NodeStatus::Draining).is_eligible());
        assert!(!make_node("n1", NodeKind::Master, NodeStatus::Healthy).is_eligible());
    }

    #[test]
    fn eligible_nodes_sorted_by_id() {
        let mut snapshot = ClusterStateSnapshot::default();
        for id in ["n3", "n1", "n2"] {
            snapshot.nodes.insert(
                id.to_string(),
                make_node(id, NodeKind::Data, NodeStatus::Healthy),
            );
        }
        let ids: Vec<&str> = snapshot
            .eligible_nodes()
            .iter()
            .map(|n| n.node_id.as_str())
            .collect();
        assert_eq!(ids, vec!["n1", "n2", "n3"]);
    }
}
