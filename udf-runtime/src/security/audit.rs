//! Bounded audit log of register/call/unregister operations.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;

/// One recorded operation against the registry.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub operation: String,
    pub udf_name: String,
    pub version: String,
    pub user: Option<String>,
    pub success: bool,
    pub error: Option<String>,
    pub duration: Duration,
    pub metadata: serde_json::Value,
}

/// Bounded ring buffer of audit entries, evicting oldest-first once full.
#[derive(Debug)]
pub struct AuditLog {
    entries: RwLock<VecDeque<AuditEntry>>,
    capacity: usize,
}

impl AuditLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    /// Record an entry, logging it to `tracing` alongside storage.
    pub fn record(&self, entry: AuditEntry) {
        tracing::info!(
            target: "udf::audit",
            operation = %entry.operation,
            udf_name = %entry.udf_name,
            version = %entry.version,
            user = ?entry.user,
            success = entry.success,
            error = ?entry.error,
            duration_ms = entry.duration.as_millis() as u64,
            "audit"
        );

        let mut entries = self.entries.write();
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// All entries, oldest first.
    pub fn all(&self) -> Vec<AuditEntry> {
        self.entries.read().iter().cloned().collect()
    }

    /// Entries for a specific UDF name, oldest first.
    pub fn for_udf(&self, name: &str) -> Vec<AuditEntry> {
        self.entries
            .read()
            .iter()
            .filter(|e| e.udf_name == name)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str) -> AuditEntry {
        AuditEntry {
            timestamp: chrono::Utc::now(),
            operation: "call".to_string(),
            udf_name: name.to_string(),
            version: "1.0.0".to_string(),
            user: None,
            success: true,
            error: None,
            duration: Duration::from_millis(1),
            metadata: serde_json::json!({}),
        }
    }

    #[test]
    fn evicts_oldest_past_capacity() {
        let log = AuditLog::new(2);
        log.record(entry("a"));
        log.record(entry("b"));
        log.record(entry("c"));
        let names: Vec<String> = log.all().iter().map(|e| e.udf_name.clone()).collect();
        assert_eq!(names, vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn filters_by_udf_name() {
        let log = AuditLog::new(10);
        log.record(entry("a"));
        log.record(entry("b"));
        log.record(entry("a"));
        assert_eq!(log.for_udf("a").len(), 2);
    }
}
