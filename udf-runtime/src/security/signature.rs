//! WASM binary signature verification.
//!
//! The concrete asymmetric-signature scheme is left to the deployment (see
//! DESIGN.md's open question); this module only fixes the shape of a
//! signature record and a pluggable verifier trait.

use serde::{Deserialize, Serialize};

/// A signature over a registered UDF's WASM bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UdfSignature {
    pub wasm_sha256: String,
    pub signature: String,
    pub public_key: String,
    pub signer: String,
    pub signed_at: chrono::DateTime<chrono::Utc>,
}

/// Verifies a UDF signature against its binary hash. Implementations decide
/// whether an absent signature is acceptable.
pub trait SignatureVerifier: Send + Sync {
    /// `wasm_sha256` is the hash the registry itself computed from the
    /// submitted bytes; `signature` is the caller-supplied record, if any.
    fn verify(&self, wasm_sha256: &str, signature: Option<&UdfSignature>) -> bool;
}

/// Permissive default: accepts any binary whose recorded hash matches the
/// computed one, and does not cryptographically verify `signature` at all.
/// Per §9's Design Notes, deployments that need real trust boundaries must
/// supply their own `SignatureVerifier`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopVerifier;

impl SignatureVerifier for NoopVerifier {
    fn verify(&self, wasm_sha256: &str, signature: Option<&UdfSignature>) -> bool {
        match signature {
            Some(sig) => sig.wasm_sha256 == wasm_sha256,
            None => true,
        }
    }
}
