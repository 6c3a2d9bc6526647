//! Allocator observability metrics.
//!
//! Prometheus-compatible counters and gauges for allocation decisions,
//! rebalance moves, and live cluster-state shape. The allocator algorithms
//! themselves emit the decision/move counters inline (see
//! `allocator::algorithm`); this module covers state-derived gauges.

use crate::model::ClusterStateSnapshot;
use std::time::{Duration, Instant};

/// Update gauges describing the current shape of the cluster state.
pub fn update_cluster_state_metrics(snapshot: &ClusterStateSnapshot) {
    let healthy = snapshot
        .nodes
        .values()
        .filter(|n| matches!(n.status, crate::model::NodeStatus::Healthy))
        .count();
    let unhealthy = snapshot
        .nodes
        .values()
        .filter(|n| matches!(n.status, crate::model::NodeStatus::Unhealthy))
        .count();
    let draining = snapshot
        .nodes
        .values()
        .filter(|n| matches!(n.status, crate::model::NodeStatus::Draining))
        .count();

    metrics::gauge!("cluster_core_nodes_healthy").set(healthy as f64);
    metrics::gauge!("cluster_core_nodes_unhealthy").set(unhealthy as f64);
    metrics::gauge!("cluster_core_nodes_draining").set(draining as f64);
    metrics::gauge!("cluster_core_nodes_total").set(snapshot.nodes.len() as f64);

    metrics::gauge!("cluster_core_shard_routing_entries").set(snapshot.shard_routing.len() as f64);
    metrics::gauge!("cluster_core_indices_total").set(snapshot.indices.len() as f64);
    metrics::gauge!("cluster_core_state_version").set(snapshot.version as f64);
}

/// Record a heartbeat received from a node.
pub fn record_heartbeat(node_id: &str) {
    metrics::counter!(
        "cluster_core_heartbeats_total",
        "node_id" => node_id.to_string(),
    )
    .increment(1);
}

/// Record a node transitioning to unhealthy due to missed heartbeats.
pub fn record_node_timed_out(node_id: &str) {
    metrics::counter!(
        "cluster_core_node_timeouts_total",
        "node_id" => node_id.to_string(),
    )
    .increment(1);
}

/// Guard for timing an allocation or rebalance pass.
pub struct AllocationTimer {
    operation: String,
    start: Instant,
}

impl AllocationTimer {
    pub fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            start: Instant::now(),
        }
    }

    pub fn finish(self) -> Duration {
        let duration = self.start.elapsed();
        metrics::histogram!(
            "cluster_core_operation_duration_seconds",
            "operation" => self.operation.clone(),
        )
        .record(duration.as_secs_f64());
        duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Node, NodeKind, NodeStatus, StorageTier};

    #[test]
    fn update_cluster_state_metrics_does_not_panic() {
        let mut snapshot = ClusterStateSnapshot::default();
        snapshot.nodes.insert(
            "n1".to_string(),
            Node {
                node_id: "n1".to_string(),
                kind: NodeKind::Data,
                status: NodeStatus::Healthy,
                tier: StorageTier::Hot,
                max_shards: None,
            },
        );
        update_cluster_state_metrics(&snapshot);
    }

    #[test]
    fn allocation_timer_records() {
        let timer = AllocationTimer::new("allocate_shards");
        std::thread::sleep(Duration::from_millis(1));
        let elapsed = timer.finish();
        assert!(elapsed.as_millis() >= 1);
    }
}
