//! UDF runtime configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration for the UDF execution engine.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UdfRuntimeConfig {
    /// Name of the guest entry function every module must export.
    #[serde(default = "default_entry_function")]
    pub entry_function: String,

    /// Fixed size of each `(name, version)`'s module pool.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Resource limits applied to every compiled module.
    #[serde(default)]
    pub resource_limits: ResourceLimitsConfig,

    /// Capacity of the bounded audit log ring buffer.
    #[serde(default = "default_audit_log_capacity")]
    pub audit_log_capacity: usize,
}

fn default_entry_function() -> String {
    "filter".to_string()
}

fn default_pool_size() -> usize {
    8
}

fn default_audit_log_capacity() -> usize {
    10_000
}

impl Default for UdfRuntimeConfig {
    fn default() -> Self {
        Self {
            entry_function: default_entry_function(),
            pool_size: default_pool_size(),
            resource_limits: ResourceLimitsConfig::default(),
            audit_log_capacity: default_audit_log_capacity(),
        }
    }
}

/// Serializable form of [`crate::security::limits::ResourceLimits`].
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResourceLimitsConfig {
    #[serde(default = "default_max_memory_pages")]
    pub max_memory_pages: u32,

    #[serde(default = "default_max_wall_clock_secs")]
    pub max_wall_clock_secs: u64,

    #[serde(default = "default_max_call_frames")]
    pub max_call_frames: u32,

    #[serde(default = "default_max_instances_per_udf")]
    pub max_instances_per_udf: u32,
}

fn default_max_memory_pages() -> u32 {
    256
}

fn default_max_wall_clock_secs() -> u64 {
    5
}

fn default_max_call_frames() -> u32 {
    1024
}

fn default_max_instances_per_udf() -> u32 {
    100
}

impl Default for ResourceLimitsConfig {
    fn default() -> Self {
        Self {
            max_memory_pages: default_max_memory_pages(),
            max_wall_clock_secs: default_max_wall_clock_secs(),
            max_call_frames: default_max_call_frames(),
            max_instances_per_udf: default_max_instances_per_udf(),
        }
    }
}

impl ResourceLimitsConfig {
    pub fn max_wall_clock(&self) -> Duration {
        Duration::from_secs(self.max_wall_clock_secs)
    }
}
