//! Cluster commands — run the allocator/rebalancer against a cluster state
//! snapshot loaded from disk and print the resulting decisions as JSON.
//!
//! There is no running server in this repo's scope (the REST gateway and
//! Raft replication are external collaborators). These commands operate
//! directly on a point-in-time snapshot file, the same shape the allocator
//! receives from the replicated state store in a live deployment.

use anyhow::{Context, Result};
use cluster_core::{allocate_shards, rebalance_shards, ClusterStateSnapshot};
use std::collections::HashMap;
use std::path::Path;

fn load_snapshot(path: &Path) -> Result<ClusterStateSnapshot> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading cluster state snapshot {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("parsing cluster state snapshot {}", path.display()))
}

/// Compute placement decisions for a new index and print them as JSON.
pub fn run_allocate(state_file: &Path, index: &str, shard_count: u32, replica_count: u32) -> Result<()> {
    let snapshot = load_snapshot(state_file)?;
    let decisions = allocate_shards(&snapshot, index, shard_count, replica_count)?;
    tracing::info!(index, shard_count, replica_count, decisions = decisions.len(), "allocation complete");
    println!("{}", serde_json::to_string_pretty(&decisions)?);
    Ok(())
}

/// Compute rebalance decisions for the cluster and print them as JSON.
pub fn run_rebalance(state_file: &Path) -> Result<()> {
    let snapshot = load_snapshot(state_file)?;
    let decisions = rebalance_shards(&snapshot);
    tracing::info!(decisions = decisions.len(), "rebalance complete");
    println!("{}", serde_json::to_string_pretty(&decisions)?);
    Ok(())
}

/// Print a human-readable summary of node health and shard-count skew.
pub fn run_status(state_file: &Path) -> Result<()> {
    let snapshot = load_snapshot(state_file)?;
    let eligible = snapshot.eligible_nodes();

    println!("Cluster {}  (version {})", snapshot.cluster_uuid, snapshot.version);
    println!("{:<20} {:<12} {:<10} {:<6} {:<8}", "NODE", "KIND", "STATUS", "TIER", "SHARDS");
    println!("{}", "-".repeat(60));

    let mut counts: HashMap<&str, u32> = HashMap::new();
    for entry in snapshot.shard_routing.values() {
        *counts.entry(entry.node_id.as_str()).or_insert(0) += 1;
    }

    let mut nodes: Vec<_> = snapshot.nodes.values().collect();
    nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
    for node in nodes {
        println!(
            "{:<20} {:<12?} {:<10?} {:<6?} {:<8}",
            node.node_id,
            node.kind,
            node.status,
            node.tier,
            counts.get(node.node_id.as_str()).copied().unwrap_or(0),
        );
    }

    println!();
    println!("Eligible data nodes: {}", eligible.len());
    if let (Some(max), Some(min)) = (counts.values().max(), counts.values().min()) {
        println!("Shard-count skew: {}", max - min);
    }
    Ok(())
}
