//! Capability-based permissions gating the host ABI.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A single capability a UDF may be granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    ReadDocument,
    WriteLog,
    NetworkAccess,
    FileAccess,
    SystemCall,
}

/// A set of granted capabilities. Unimplemented capabilities
/// (`NetworkAccess`, `FileAccess`, `SystemCall`) are reserved: even when
/// present in the set, no host ABI function currently honors them, so they
/// fail closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet(HashSet<Capability>);

impl Default for CapabilitySet {
    /// `{read_document, write_log}`, matching §4.7's default grant.
    fn default() -> Self {
        Self(HashSet::from([Capability::ReadDocument, Capability::WriteLog]))
    }
}

impl CapabilitySet {
    pub fn new(capabilities: impl IntoIterator<Item = Capability>) -> Self {
        Self(capabilities.into_iter().collect())
    }

    pub fn empty() -> Self {
        Self(HashSet::new())
    }

    pub fn grants(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }
}
