//! The host function table guest modules import from `env`.
//!
//! Per-call state — the current document context and parameter map — lives
//! in the `Store`'s data (`StoreData`), not in any process-global table.
//! Because wasmtime gives every `Store` its own data, concurrent calls on
//! distinct instances are isolated for free; the `ctx_id` argument threaded
//! through every host function exists for guest-side bookkeeping only, it
//! is never used to look anything up on the host side.

use crate::security::permissions::{Capability, CapabilitySet};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use wasmtime::{Caller, Linker, Memory, StoreLimits, StoreLimitsBuilder};

/// The document a UDF call is being evaluated against.
#[derive(Debug, Clone)]
pub struct DocumentContext {
    pub doc_id: String,
    pub score: f32,
    pub fields: Arc<HashMap<String, Value>>,
}

/// State bound to one call: which document, which parameters, which
/// capabilities the call is allowed to exercise.
#[derive(Debug, Clone)]
pub struct PerCallState {
    pub ctx_id: u64,
    pub document: Arc<DocumentContext>,
    pub params: HashMap<String, Value>,
    pub capabilities: CapabilitySet,
}

/// The `Store`'s data: the guest's `memory` export (cached after
/// instantiation), the state of whichever call is currently in flight, and
/// the `ResourceLimiter` bounding that store's linear memory growth to
/// `ResourceLimits::max_memory_pages` (§4.7). `limits` starts unbounded and
/// is replaced with a real cap by `WasmRuntime::instantiate` before the
/// module is instantiated.
pub struct StoreData {
    pub memory: Option<Memory>,
    pub per_call: Option<PerCallState>,
    pub limits: StoreLimits,
}

impl Default for StoreData {
    fn default() -> Self {
        Self {
            memory: None,
            per_call: None,
            limits: StoreLimitsBuilder::new().build(),
        }
    }
}

impl StoreData {
    pub fn memory(&self) -> Memory {
        self.memory.expect("memory is set right after instantiation")
    }
}

#[derive(Clone, Copy)]
enum Source {
    Field,
    Param,
}

fn lookup<'a>(state: &'a PerCallState, source: Source, name: &str) -> Option<&'a Value> {
    match source {
        Source::Field => state.document.fields.get(name),
        Source::Param => state.params.get(name),
    }
}

/// Read `len` bytes at `ptr` from the guest's linear memory, validating the
/// range first. `None` on out-of-range access.
fn read_bytes(caller: &mut Caller<'_, StoreData>, ptr: i32, len: i32) -> Option<Vec<u8>> {
    if ptr < 0 || len < 0 {
        return None;
    }
    let memory = caller.data().memory();
    let (ptr, len) = (ptr as usize, len as usize);
    let data = memory.data(&caller);
    data.get(ptr..ptr.checked_add(len)?).map(|s| s.to_vec())
}

fn read_string(caller: &mut Caller<'_, StoreData>, ptr: i32, len: i32) -> Option<String> {
    read_bytes(caller, ptr, len).and_then(|bytes| String::from_utf8(bytes).ok())
}

/// Write `bytes` at `ptr`, validating the range first. Returns `false` on
/// out-of-range access.
fn write_bytes(caller: &mut Caller<'_, StoreData>, ptr: i32, bytes: &[u8]) -> bool {
    if ptr < 0 {
        return false;
    }
    let memory = caller.data().memory();
    let ptr = ptr as usize;
    let Some(end) = ptr.checked_add(bytes.len()) else {
        return false;
    };
    let data = memory.data_mut(caller);
    if end > data.len() {
        return false;
    }
    data[ptr..end].copy_from_slice(bytes);
    true
}

fn write_i32(caller: &mut Caller<'_, StoreData>, ptr: i32, value: i32) -> bool {
    write_bytes(caller, ptr, &value.to_le_bytes())
}

fn has_capability(caller: &Caller<'_, StoreData>, capability: Capability) -> bool {
    caller
        .data()
        .per_call
        .as_ref()
        .map(|s| s.capabilities.grants(capability))
        .unwrap_or(false)
}

/// Host-side non-zero status codes returned to the guest. `0` always means
/// success; these are not Rust errors, they cross the ABI boundary as an
/// `i32` return value.
mod status {
    pub const OK: i32 = 0;
    pub const MISSING_OR_MISMATCH: i32 = 1;
    pub const MEMORY_FAULT: i32 = 2;
    pub const PERMISSION_DENIED: i32 = 3;
}

fn get_field_generic(
    mut caller: Caller<'_, StoreData>,
    source: Source,
    name_ptr: i32,
    name_len: i32,
    extract: impl FnOnce(&Value) -> Option<Vec<u8>>,
    out_ptr: i32,
) -> i32 {
    if !has_capability(&caller, Capability::ReadDocument) {
        return status::PERMISSION_DENIED;
    }
    let Some(name) = read_string(&mut caller, name_ptr, name_len) else {
        return status::MEMORY_FAULT;
    };
    let Some(state) = caller.data().per_call.clone() else {
        return status::MISSING_OR_MISMATCH;
    };
    let Some(value) = lookup(&state, source, &name) else {
        return status::MISSING_OR_MISMATCH;
    };
    let Some(bytes) = extract(value) else {
        return status::MISSING_OR_MISMATCH;
    };
    if write_bytes(&mut caller, out_ptr, &bytes) {
        status::OK
    } else {
        status::MEMORY_FAULT
    }
}

/// Install the `env` module's function table into `linker`.
pub fn add_to_linker(linker: &mut Linker<StoreData>) -> anyhow::Result<()> {
    linker.func_wrap(
        "env",
        "has_field",
        |mut caller: Caller<'_, StoreData>, _ctx_id: i64, name_ptr: i32, name_len: i32| -> i32 {
            if !has_capability(&caller, Capability::ReadDocument) {
                return 0;
            }
            let Some(name) = read_string(&mut caller, name_ptr, name_len) else {
                return 0;
            };
            match caller.data().per_call.as_ref() {
                Some(state) => lookup(state, Source::Field, &name).is_some() as i32,
                None => 0,
            }
        },
    )?;

    linker.func_wrap(
        "env",
        "get_field_string",
        |mut caller: Caller<'_, StoreData>,
         _ctx_id: i64,
         name_ptr: i32,
         name_len: i32,
         out_ptr: i32,
         out_len_ptr: i32|
         -> i32 {
            if !has_capability(&caller, Capability::ReadDocument) {
                return status::PERMISSION_DENIED;
            }
            let Some(name) = read_string(&mut caller, name_ptr, name_len) else {
                return status::MEMORY_FAULT;
            };
            let Some(state) = caller.data().per_call.clone() else {
                return status::MISSING_OR_MISMATCH;
            };
            let Some(value) = lookup(&state, Source::Field, &name) else {
                return status::MISSING_OR_MISMATCH;
            };
            let Some(text) = value.as_str() else {
                return status::MISSING_OR_MISMATCH;
            };
            let bytes = text.as_bytes().to_vec();
            if !write_bytes(&mut caller, out_ptr, &bytes) {
                return status::MEMORY_FAULT;
            }
            if write_i32(&mut caller, out_len_ptr, bytes.len() as i32) {
                status::OK
            } else {
                status::MEMORY_FAULT
            }
        },
    )?;

    linker.func_wrap(
        "env",
        "get_field_i64",
        |caller: Caller<'_, StoreData>, _ctx_id: i64, name_ptr: i32, name_len: i32, out_ptr: i32| -> i32 {
            get_field_generic(caller, Source::Field, name_ptr, name_len, |v| v.as_i64().map(|n| n.to_le_bytes().to_vec()), out_ptr)
        },
    )?;

    linker.func_wrap(
        "env",
        "get_field_f64",
        |caller: Caller<'_, StoreData>, _ctx_id: i64, name_ptr: i32, name_len: i32, out_ptr: i32| -> i32 {
            get_field_generic(caller, Source::Field, name_ptr, name_len, |v| v.as_f64().map(|n| n.to_le_bytes().to_vec()), out_ptr)
        },
    )?;

    linker.func_wrap(
        "env",
        "get_field_bool",
        |caller: Caller<'_, StoreData>, _ctx_id: i64, name_ptr: i32, name_len: i32, out_ptr: i32| -> i32 {
            get_field_generic(caller, Source::Field, name_ptr, name_len, |v| v.as_bool().map(|b| vec![b as u8]), out_ptr)
        },
    )?;

    linker.func_wrap(
        "env",
        "get_param_string",
        |mut caller: Caller<'_, StoreData>,
         _ctx_id: i64,
         name_ptr: i32,
         name_len: i32,
         out_ptr: i32,
         out_len_ptr: i32|
         -> i32 {
            if !has_capability(&caller, Capability::ReadDocument) {
                return status::PERMISSION_DENIED;
            }
            let Some(name) = read_string(&mut caller, name_ptr, name_len) else {
                return status::MEMORY_FAULT;
            };
            let Some(state) = caller.data().per_call.clone() else {
                return status::MISSING_OR_MISMATCH;
            };
            let Some(value) = lookup(&state, Source::Param, &name) else {
                return status::MISSING_OR_MISMATCH;
            };
            let Some(text) = value.as_str() else {
                return status::MISSING_OR_MISMATCH;
            };
            let bytes = text.as_bytes().to_vec();
            if !write_bytes(&mut caller, out_ptr, &bytes) {
                return status::MEMORY_FAULT;
            }
            if write_i32(&mut caller, out_len_ptr, bytes.len() as i32) {
                status::OK
            } else {
                status::MEMORY_FAULT
            }
        },
    )?;

    linker.func_wrap(
        "env",
        "get_param_i64",
        |caller: Caller<'_, StoreData>, _ctx_id: i64, name_ptr: i32, name_len: i32, out_ptr: i32| -> i32 {
            get_field_generic(caller, Source::Param, name_ptr, name_len, |v| v.as_i64().map(|n| n.to_le_bytes().to_vec()), out_ptr)
        },
    )?;

    linker.func_wrap(
        "env",
        "get_param_f64",
        |caller: Caller<'_, StoreData>, _ctx_id: i64, name_ptr: i32, name_len: i32, out_ptr: i32| -> i32 {
            get_field_generic(caller, Source::Param, name_ptr, name_len, |v| v.as_f64().map(|n| n.to_le_bytes().to_vec()), out_ptr)
        },
    )?;

    linker.func_wrap(
        "env",
        "get_param_bool",
        |caller: Caller<'_, StoreData>, _ctx_id: i64, name_ptr: i32, name_len: i32, out_ptr: i32| -> i32 {
            get_field_generic(caller, Source::Param, name_ptr, name_len, |v| v.as_bool().map(|b| vec![b as u8]), out_ptr)
        },
    )?;

    linker.func_wrap(
        "env",
        "log",
        |mut caller: Caller<'_, StoreData>, level: i32, msg_ptr: i32, msg_len: i32| {
            if !has_capability(&caller, Capability::WriteLog) {
                return;
            }
            let Some(message) = read_string(&mut caller, msg_ptr, msg_len) else {
                return;
            };
            match level {
                0 => tracing::debug!(target: "udf::guest", "{message}"),
                1 => tracing::info!(target: "udf::guest", "{message}"),
                2 => tracing::warn!(target: "udf::guest", "{message}"),
                _ => tracing::error!(target: "udf::guest", "{message}"),
            }
        },
    )?;

    Ok(())
}
