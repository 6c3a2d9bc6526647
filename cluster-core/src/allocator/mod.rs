//! Shard allocation and rebalancing.
//!
//! The allocator is a pure function over a [`ClusterStateSnapshot`]: given
//! a snapshot and an index's shard/replica counts, it decides which
//! eligible data node each shard slot should live on. It never mutates
//! state itself — callers apply the returned decisions.

mod algorithm;

pub use algorithm::{allocate_shards, rebalance_shards};
