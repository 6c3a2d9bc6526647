//! Allocator-specific error types

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while computing placement or rebalancing decisions.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocatorError {
    #[error("no healthy data nodes available")]
    NoHealthyDataNodes,

    #[error("shard_count must be greater than zero")]
    InvalidShardCount,

    /// Reserved for future replica_count validation. `replica_count` is
    /// `u32` so it can never be negative; no code path constructs this
    /// today, but the variant is kept to match the allocator's documented
    /// error surface.
    #[error("replica_count is invalid")]
    InvalidReplicaCount,
}

impl AllocatorError {
    /// Error type as a string for metrics labeling.
    pub fn error_type(&self) -> &'static str {
        match self {
            AllocatorError::NoHealthyDataNodes => "no_healthy_data_nodes",
            AllocatorError::InvalidShardCount => "invalid_shard_count",
            AllocatorError::InvalidReplicaCount => "invalid_replica_count",
        }
    }
}

pub type Result<T> = std::result::Result<T, AllocatorError>;
