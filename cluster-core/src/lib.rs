//! Cluster core - deterministic shard placement and rebalancing.
//!
//! This crate owns the cluster's data model, the live mutable
//! [`state::ClusterState`], and the pure [`allocator`] algorithms that turn
//! a point-in-time snapshot into placement and rebalance decisions.
//!
//! # Architecture
//!
//! - **model**: plain data types describing nodes, indices, and shard
//!   routing — the shape the allocator consumes and the state store holds.
//! - **state**: `RwLock`-guarded live store; callers mutate it via
//!   heartbeats/joins/leaves and take a snapshot before allocating.
//! - **allocator**: pure `allocate_shards`/`rebalance_shards` functions over
//!   a `ClusterStateSnapshot`. Never mutates state, never touches the
//!   network.
//! - **config**: serde-driven configuration for heartbeat timeouts and
//!   rebalancing behavior.
//! - **metrics**: Prometheus-compatible counters/gauges for allocation and
//!   cluster-state observability.

pub mod allocator;
pub mod config;
pub mod error;
pub mod metrics;
pub mod model;
pub mod state;

pub use allocator::{allocate_shards, rebalance_shards};
pub use config::{AllocatorConfig, RebalancingConfig};
pub use error::{AllocatorError, Result};
pub use model::{
    AllocationDecision, ClusterStateSnapshot, IndexMetadata, Node, NodeKind, NodeStatus,
    RebalanceDecision, ShardRoutingEntry, ShardSlot, StorageTier,
};
pub use state::ClusterState;
