//! Allocator and cluster-state configuration

use serde::{Deserialize, Serialize};

/// Top-level configuration for the allocator core.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AllocatorConfig {
    /// Heartbeat timeout before a node is considered unreachable, in seconds.
    #[serde(default = "default_heartbeat_timeout_secs")]
    pub heartbeat_timeout_secs: u64,

    /// Rebalancing behavior.
    #[serde(default)]
    pub rebalancing: RebalancingConfig,
}

fn default_heartbeat_timeout_secs() -> u64 {
    30
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_secs: default_heartbeat_timeout_secs(),
            rebalancing: RebalancingConfig::default(),
        }
    }
}

/// Configuration for automatic shard rebalancing.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RebalancingConfig {
    /// Enable automatic rebalancing.
    #[serde(default = "default_rebalancing_enabled")]
    pub enabled: bool,

    /// Stop rebalancing once `max - min` shard count across eligible nodes
    /// reaches or drops below this skew.
    #[serde(default = "default_max_skew")]
    pub max_skew: u32,

    /// Minimum time between automatic rebalance runs, in seconds.
    #[serde(default = "default_rebalance_cooldown")]
    pub cooldown_secs: u64,
}

fn default_rebalancing_enabled() -> bool {
    false
}

fn default_max_skew() -> u32 {
    1
}

fn default_rebalance_cooldown() -> u64 {
    300
}

impl Default for RebalancingConfig {
    fn default() -> Self {
        Self {
            enabled: default_rebalancing_enabled(),
            max_skew: default_max_skew(),
            cooldown_secs: default_rebalance_cooldown(),
        }
    }
}
