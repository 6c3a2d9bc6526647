//! Resource limits and the per-UDF instance concurrency limiter.

use crate::config::ResourceLimitsConfig;
use crate::error::{Result, UdfError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Resource limits enforced on every compiled module.
#[derive(Debug, Clone, Copy)]
pub struct ResourceLimits {
    pub max_memory_pages: u32,
    pub max_wall_clock: Duration,
    pub max_call_frames: u32,
    pub max_instances_per_udf: u32,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        ResourceLimitsConfig::default().into()
    }
}

impl From<ResourceLimitsConfig> for ResourceLimits {
    fn from(cfg: ResourceLimitsConfig) -> Self {
        Self {
            max_memory_pages: cfg.max_memory_pages,
            max_wall_clock: cfg.max_wall_clock(),
            max_call_frames: cfg.max_call_frames,
            max_instances_per_udf: cfg.max_instances_per_udf,
        }
    }
}

/// Tracks the number of live instances per `(name, version)` key and rejects
/// acquisitions past `max_instances_per_udf`.
#[derive(Debug, Default)]
pub struct InstanceLimiter {
    counts: Mutex<HashMap<String, u32>>,
    max_instances_per_udf: u32,
}

impl InstanceLimiter {
    pub fn new(max_instances_per_udf: u32) -> Self {
        Self {
            counts: Mutex::new(HashMap::new()),
            max_instances_per_udf,
        }
    }

    /// Acquire a slot for `key`, returning a guard that releases on drop.
    pub fn acquire(self: &Arc<Self>, key: &str) -> Result<LimiterGuard> {
        let mut counts = self.counts.lock();
        let count = counts.entry(key.to_string()).or_insert(0);
        if *count >= self.max_instances_per_udf {
            return Err(UdfError::InstanceLimitExceeded(key.to_string()));
        }
        *count += 1;
        Ok(LimiterGuard {
            limiter: self.clone(),
            key: key.to_string(),
        })
    }

    fn release(&self, key: &str) {
        let mut counts = self.counts.lock();
        if let Some(count) = counts.get_mut(key) {
            *count = count.saturating_sub(1);
        }
    }

    /// Current outstanding instance count for `key`, for tests and metrics.
    pub fn outstanding(&self, key: &str) -> u32 {
        self.counts.lock().get(key).copied().unwrap_or(0)
    }
}

/// RAII handle released by `Drop`, decrementing the limiter's counter.
pub struct LimiterGuard {
    limiter: Arc<InstanceLimiter>,
    key: String,
}

impl Drop for LimiterGuard {
    fn drop(&mut self) {
        self.limiter.release(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_fails_past_limit() {
        let limiter = Arc::new(InstanceLimiter::new(1));
        let _first = limiter.acquire("udf@1").unwrap();
        assert!(limiter.acquire("udf@1").is_err());
    }

    #[test]
    fn release_on_drop_frees_a_slot() {
        let limiter = Arc::new(InstanceLimiter::new(1));
        {
            let _guard = limiter.acquire("udf@1").unwrap();
            assert_eq!(limiter.outstanding("udf@1"), 1);
        }
        assert_eq!(limiter.outstanding("udf@1"), 0);
        assert!(limiter.acquire("udf@1").is_ok());
    }
}
