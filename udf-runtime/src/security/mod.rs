//! Permissions, resource limits, signature verification, and audit logging
//! for the UDF execution engine.

pub mod audit;
pub mod limits;
pub mod permissions;
pub mod signature;

pub use audit::{AuditEntry, AuditLog};
pub use limits::{InstanceLimiter, LimiterGuard, ResourceLimits};
pub use permissions::{Capability, CapabilitySet};
pub use signature::{NoopVerifier, SignatureVerifier, UdfSignature};
