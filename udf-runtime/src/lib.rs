//! Sandboxed WASM user-defined-function execution engine.
//!
//! A per-document filter UDF is compiled once, cached, and invoked many
//! times through a bounded instance pool. The pieces:
//!
//! - **metadata** / **compiler**: the typed `UdfMetadata` record, and a
//!   regex-based extractor that pulls one out of higher-level UDF source.
//! - **runtime**: the process-wide `wasmtime::Engine`, module compilation,
//!   and instantiation.
//! - **pool**: a bounded, pre-warmed pool of instances per `(name,version)`.
//! - **registry**: the versioned catalog tying metadata, compiled module,
//!   and pool together, and the `Call` entry point query execution uses.
//! - **host_abi**: the `env` module guest code imports to read document
//!   fields and call parameters.
//! - **membuf**: a size-classed buffer cache for marshalling across the ABI.
//! - **security**: capabilities, resource limits, signature verification,
//!   and the audit log.

pub mod compiler;
pub mod config;
pub mod error;
pub mod host_abi;
pub mod membuf;
pub mod metadata;
pub mod pool;
pub mod registry;
pub mod runtime;
pub mod security;

pub use config::UdfRuntimeConfig;
pub use error::{Result, UdfError};
pub use host_abi::DocumentContext;
pub use metadata::{ParamType, ReturnSpec, UdfMetadata, UdfParameter};
pub use pool::{Lease, ModulePool};
pub use registry::UdfRegistry;
pub use runtime::{CompiledModule, ModuleInstance, WasmRuntime};
