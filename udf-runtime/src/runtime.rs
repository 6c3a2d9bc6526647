//! Process-wide WASM execution environment.
//!
//! Owns the single [`wasmtime::Engine`], compiles and caches guest modules by
//! logical name, and manufactures instances bound to the host ABI's `env`
//! module. Compiled modules are immutable and shared (`Arc`); instances are
//! exclusively owned between [`WasmRuntime::new_instance`] and the caller
//! returning them to a pool.

use crate::error::{Result, UdfError};
use crate::host_abi::{self, StoreData};
use crate::security::limits::ResourceLimits;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use wasmtime::{Config, Engine, Linker, Module, Store, StoreLimitsBuilder, UpdateDeadline};

/// How often the background ticker increments the engine's epoch. Per-store
/// deadline callbacks fire at roughly this granularity, so it doubles as the
/// minimum resolution of the wall-clock timeout.
const EPOCH_TICK: Duration = Duration::from_millis(1);

/// Marker trap raised by a `Store`'s epoch deadline callback once that
/// store's own call has exceeded its wall-clock budget. Downcast out of the
/// `wasmtime::Error` returned by a trapped call to distinguish a timeout from
/// any other guest trap.
#[derive(Debug)]
struct DeadlineExceeded;

impl fmt::Display for DeadlineExceeded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "call exceeded its wall-clock deadline")
    }
}

impl std::error::Error for DeadlineExceeded {}

/// A validated, ready-to-instantiate WASM artifact plus the name it was
/// compiled under. `(name, version)` identity lives one layer up, in the
/// registry; the runtime only knows the flat `name` it was compiled under.
#[derive(Clone)]
pub struct CompiledModule {
    pub name: String,
    pub entry_function: String,
    module: Module,
    linker: Arc<Linker<StoreData>>,
}

/// An exclusively-owned WASM instantiation. Never shared across concurrent
/// callers; ownership transfer is explicit via [`crate::pool::ModulePool`].
pub struct ModuleInstance {
    pub compiled: CompiledModule,
    store: Store<StoreData>,
    instance: wasmtime::Instance,
    /// Set on any trap; a poisoned instance is disposed rather than
    /// returned to its pool.
    pub poisoned: bool,
    /// Set specifically when the trap was the epoch-deadline interrupt,
    /// so the registry can surface `Timeout` rather than a generic error.
    pub timed_out: bool,
}

impl ModuleInstance {
    /// Bind per-call state (document context, params, capabilities) visible
    /// to the host ABI for the duration of one call.
    pub fn bind_call_state(&mut self, state: host_abi::PerCallState) {
        self.store.data_mut().per_call = Some(state);
    }

    fn clear_call_state(&mut self) {
        self.store.data_mut().per_call = None;
    }

    /// Invoke the entry function with the document context id, per §4.5's
    /// wire contract: `(i64) -> i32`. The engine's epoch is ticked by a
    /// background thread shared across every store; this store's deadline
    /// callback judges *its own* elapsed time against `timeout` on each
    /// tick and only traps this call, so one slow call never trips the
    /// deadline of any other concurrently-executing store.
    pub fn call_entry(&mut self, ctx_id: i64, timeout: Duration) -> Result<i32> {
        let start = Instant::now();
        self.store.set_epoch_deadline(1);
        self.store.epoch_deadline_callback(move |_store| {
            if start.elapsed() >= timeout {
                Err(anyhow::Error::new(DeadlineExceeded))
            } else {
                Ok(UpdateDeadline::Continue(1))
            }
        });

        let entry = self
            .instance
            .get_typed_func::<i64, i32>(&mut self.store, &self.compiled.entry_function)
            .map_err(|e| UdfError::Internal(format!("entry function lookup failed: {e}")))?;
        let result = entry.call(&mut self.store, ctx_id);
        self.clear_call_state();
        match result {
            Ok(value) => Ok(value),
            Err(trap) => {
                self.poisoned = true;
                if trap.downcast_ref::<DeadlineExceeded>().is_some() {
                    self.timed_out = true;
                }
                Err(UdfError::Internal(format!("guest trapped: {trap}")))
            }
        }
    }

    /// Consume remaining fuel-based call budget; used by the security layer
    /// to decide whether a call frame limit was exceeded. Wasmtime surfaces
    /// this as a trap during `call_entry`, so this is presently a no-op hook
    /// kept for callers that want to pre-check before invoking.
    pub fn frames_remaining(&mut self) -> Option<u64> {
        self.store.get_fuel().ok()
    }
}

/// Owns the engine, the name -> compiled module cache, and the background
/// epoch ticker thread.
pub struct WasmRuntime {
    engine: Engine,
    modules: RwLock<HashMap<String, CompiledModule>>,
    entry_function: String,
    limits: ResourceLimits,
    ticker_stop: Arc<AtomicBool>,
}

impl WasmRuntime {
    pub fn new(entry_function: impl Into<String>, limits: ResourceLimits) -> Result<Self> {
        let mut config = Config::new();
        config.wasm_reference_types(false);
        config.wasm_simd(true);
        config.wasm_bulk_memory(true);
        config.wasm_multi_value(false);
        config.wasm_multi_memory(false);
        config.wasm_threads(false);
        config.consume_fuel(true);
        // Epoch interruption is how the wall-clock deadline (§4.7) is
        // enforced: a background thread ticks the engine's epoch at a fixed
        // cadence, and each store's own deadline callback (armed in
        // `ModuleInstance::call_entry`) decides on every tick whether *its*
        // call has overrun, independent of every other concurrently running
        // store sharing the same engine.
        config.epoch_interruption(true);
        config.cranelift_opt_level(wasmtime::OptLevel::SpeedAndSize);

        let engine = Engine::new(&config)
            .map_err(|e| UdfError::Internal(format!("failed to construct engine: {e}")))?;

        let ticker_stop = Arc::new(AtomicBool::new(false));
        let ticker_engine = engine.clone();
        let ticker_stop_flag = ticker_stop.clone();
        std::thread::spawn(move || {
            while !ticker_stop_flag.load(Ordering::Relaxed) {
                std::thread::sleep(EPOCH_TICK);
                ticker_engine.increment_epoch();
            }
        });

        Ok(Self {
            engine,
            modules: RwLock::new(HashMap::new()),
            entry_function: entry_function.into(),
            limits,
            ticker_stop,
        })
    }

    /// Validate and compile `bytes` under `name`. Overwriting an existing
    /// name evicts the previous compiled module; instances already lent out
    /// under the old binary remain valid until `Put` closes them.
    pub fn compile_module(&self, name: &str, bytes: &[u8]) -> Result<CompiledModule> {
        let module = Module::new(&self.engine, bytes)
            .map_err(|e| UdfError::CompileError(format!("wasm validation failed: {e}")))?;

        let has_memory = module
            .exports()
            .any(|e| e.name() == "memory" && e.ty().memory().is_some());
        if !has_memory {
            return Err(UdfError::CompileError(
                "module does not export a memory named 'memory'".to_string(),
            ));
        }

        let has_entry = module.exports().any(|e| {
            e.name() == self.entry_function
                && e.ty()
                    .func()
                    .map(|f| f.params().len() == 1 && f.results().len() == 1)
                    .unwrap_or(false)
        });
        if !has_entry {
            return Err(UdfError::CompileError(format!(
                "module does not export entry function '{}' with signature (i64) -> i32",
                self.entry_function
            )));
        }

        let mut linker = Linker::new(&self.engine);
        host_abi::add_to_linker(&mut linker)
            .map_err(|e| UdfError::CompileError(format!("failed to link host abi: {e}")))?;

        let compiled = CompiledModule {
            name: name.to_string(),
            entry_function: self.entry_function.clone(),
            module,
            linker: Arc::new(linker),
        };

        self.modules
            .write()
            .insert(name.to_string(), compiled.clone());
        tracing::info!(name, "compiled wasm module");
        Ok(compiled)
    }

    /// Instantiate a fresh linear memory for a previously compiled module.
    pub fn new_instance(&self, name: &str) -> Result<ModuleInstance> {
        let compiled = self
            .modules
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| UdfError::NotFound(name.to_string()))?;
        self.instantiate(compiled)
    }

    fn instantiate(&self, compiled: CompiledModule) -> Result<ModuleInstance> {
        let mut store = Store::new(&self.engine, StoreData::default());
        store
            .set_fuel(self.limits.max_call_frames as u64 * 1_000)
            .map_err(|e| UdfError::Internal(format!("failed to set fuel: {e}")))?;

        // Cap linear memory growth at `max_memory_pages` (§4.7); wasm pages
        // are fixed at 64 KiB. Must be installed before instantiation so it
        // also bounds the memory the module declares at instantiation time.
        store.data_mut().limits = StoreLimitsBuilder::new()
            .memory_size(self.limits.max_memory_pages as usize * 65_536)
            .build();
        store.limiter(|data| &mut data.limits);

        let instance = compiled
            .linker
            .instantiate(&mut store, &compiled.module)
            .map_err(|e| UdfError::CompileError(format!("instantiation failed: {e}")))?;

        let memory = instance
            .get_memory(&mut store, "memory")
            .ok_or_else(|| UdfError::CompileError("instance has no 'memory' export".to_string()))?;
        store.data_mut().memory = Some(memory);

        Ok(ModuleInstance {
            compiled,
            store,
            instance,
            poisoned: false,
            timed_out: false,
        })
    }

    /// Release all compiled modules. Idempotent; instances already lent out
    /// remain independently valid until dropped.
    pub fn close(&self) {
        self.modules.write().clear();
    }
}

impl Drop for WasmRuntime {
    fn drop(&mut self) {
        self.ticker_stop.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID_WAT: &str = r#"
        (module
            (memory (export "memory") 1)
            (func (export "filter") (param i64) (result i32)
                i32.const 1)
        )
    "#;

    fn runtime() -> WasmRuntime {
        WasmRuntime::new("filter", ResourceLimits::default()).unwrap()
    }

    #[test]
    fn compiles_valid_module() {
        let rt = runtime();
        let bytes = wat::parse_str(VALID_WAT).unwrap();
        assert!(rt.compile_module("m1", &bytes).is_ok());
    }

    #[test]
    fn rejects_missing_memory_export() {
        let rt = runtime();
        let wat = r#"(module (func (export "filter") (param i64) (result i32) i32.const 1))"#;
        let bytes = wat::parse_str(wat).unwrap();
        let err = rt.compile_module("m2", &bytes).unwrap_err();
        assert!(matches!(err, UdfError::CompileError(_)));
    }

    #[test]
    fn rejects_missing_entry_function() {
        let rt = runtime();
        let wat = r#"(module (memory (export "memory") 1))"#;
        let bytes = wat::parse_str(wat).unwrap();
        let err = rt.compile_module("m3", &bytes).unwrap_err();
        assert!(matches!(err, UdfError::CompileError(_)));
    }

    #[test]
    fn new_instance_of_unknown_name_fails() {
        let rt = runtime();
        assert!(matches!(rt.new_instance("nope"), Err(UdfError::NotFound(_))));
    }

    #[test]
    fn instance_calls_entry_function() {
        let rt = runtime();
        let bytes = wat::parse_str(VALID_WAT).unwrap();
        rt.compile_module("m4", &bytes).unwrap();
        let mut instance = rt.new_instance("m4").unwrap();
        let result = instance.call_entry(42, Duration::from_secs(5)).unwrap();
        assert_eq!(result, 1);
    }

    #[test]
    fn close_evicts_compiled_modules() {
        let rt = runtime();
        let bytes = wat::parse_str(VALID_WAT).unwrap();
        rt.compile_module("m5", &bytes).unwrap();
        rt.close();
        assert!(matches!(rt.new_instance("m5"), Err(UdfError::NotFound(_))));
    }

    const SPIN_WAT: &str = r#"
        (module
            (memory (export "memory") 1)
            (func (export "filter") (param i64) (result i32)
                (loop $l (br $l))
                (i32.const 1))
        )
    "#;

    /// The epoch counter is shared across every store on the engine; a
    /// deadline-exceeded trap for one store's call must not trip the
    /// deadline of a second store concurrently running on the same engine.
    #[test]
    fn timeout_traps_only_the_offending_instance() {
        let rt = Arc::new(
            WasmRuntime::new(
                "filter",
                ResourceLimits {
                    max_memory_pages: 16,
                    max_call_frames: 50_000_000,
                    ..ResourceLimits::default()
                },
            )
            .unwrap(),
        );
        let spin_bytes = wat::parse_str(SPIN_WAT).unwrap();
        rt.compile_module("spin", &spin_bytes).unwrap();
        let fast_bytes = wat::parse_str(VALID_WAT).unwrap();
        rt.compile_module("fast", &fast_bytes).unwrap();

        let spin_rt = rt.clone();
        let spinner = std::thread::spawn(move || {
            let mut instance = spin_rt.new_instance("spin").unwrap();
            let result = instance.call_entry(1, Duration::from_millis(20));
            (result, instance.timed_out)
        });

        // Let the spinner's call start before the fast call races it, so
        // their epoch ticks genuinely overlap.
        std::thread::sleep(Duration::from_millis(5));
        let mut fast_instance = rt.new_instance("fast").unwrap();
        let fast_result = fast_instance.call_entry(2, Duration::from_secs(5));

        let (spin_result, spin_timed_out) = spinner.join().unwrap();
        assert!(spin_result.is_err());
        assert!(spin_timed_out);
        assert_eq!(fast_result.unwrap(), 1);
    }
}
