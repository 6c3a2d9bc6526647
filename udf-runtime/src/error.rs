//! UDF engine error types

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by the WASM runtime, pool, registry, and security layer.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum UdfError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("udf not found: {0}")]
    NotFound(String),

    #[error("udf already exists: {0}")]
    AlreadyExists(String),

    #[error("compile error: {0}")]
    CompileError(String),

    #[error("instance limit exceeded for {0}")]
    InstanceLimitExceeded(String),

    #[error("call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("call cancelled")]
    Cancelled,

    #[error("host memory fault: {0}")]
    HostMemoryFault(String),

    #[error("signature mismatch for {0}")]
    SignatureMismatch(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl UdfError {
    /// Error type as a string for metrics labeling.
    pub fn error_type(&self) -> &'static str {
        match self {
            UdfError::InvalidInput(_) => "invalid_input",
            UdfError::NotFound(_) => "not_found",
            UdfError::AlreadyExists(_) => "already_exists",
            UdfError::CompileError(_) => "compile_error",
            UdfError::InstanceLimitExceeded(_) => "instance_limit_exceeded",
            UdfError::Timeout(_) => "timeout",
            UdfError::Cancelled => "cancelled",
            UdfError::HostMemoryFault(_) => "host_memory_fault",
            UdfError::SignatureMismatch(_) => "signature_mismatch",
            UdfError::Internal(_) => "internal",
        }
    }
}

pub type Result<T> = std::result::Result<T, UdfError>;
