//! Bounded pool of ready-to-call instances for one `(name, version)`.
//!
//! Pre-creates a fixed number of instances eagerly. `get` hands out an
//! instance, creating an overflow instance past the configured size rather
//! than blocking; `put` returns an instance to the free list or closes it if
//! the pool is already full. Instance ownership between `get` and `put` is a
//! move — callers should route through [`Lease`], which returns the instance
//! automatically on drop, to make double-put and use-after-put structurally
//! impossible.

use crate::runtime::{CompiledModule, ModuleInstance, WasmRuntime};
use parking_lot::Mutex;
use std::sync::Arc;

/// Fixed-size pool of instances for one compiled module.
pub struct ModulePool {
    runtime: Arc<WasmRuntime>,
    compiled: CompiledModule,
    size: usize,
    free: Mutex<Vec<ModuleInstance>>,
    closed: Mutex<bool>,
}

impl ModulePool {
    /// Create a pool, eagerly instantiating `size` instances.
    pub fn new(runtime: Arc<WasmRuntime>, compiled: CompiledModule, size: usize) -> crate::error::Result<Self> {
        let mut free = Vec::with_capacity(size);
        for _ in 0..size {
            free.push(runtime.new_instance(&compiled.name)?);
        }
        Ok(Self {
            runtime,
            compiled,
            size,
            free: Mutex::new(free),
            closed: Mutex::new(false),
        })
    }

    /// Lend an instance. Transparently creates an overflow instance, logged
    /// as a pool-exhausted warning, if the free list is drained.
    pub fn get(&self) -> crate::error::Result<ModuleInstance> {
        if let Some(instance) = self.free.lock().pop() {
            return Ok(instance);
        }
        tracing::warn!(module = %self.compiled.name, pool_size = self.size, "module pool exhausted, creating overflow instance");
        metrics::counter!(
            "udf_runtime_pool_overflow_total",
            "module" => self.compiled.name.clone(),
        )
        .increment(1);
        self.runtime.new_instance(&self.compiled.name)
    }

    /// Return an instance to the pool, or close it if the pool is at
    /// capacity, already closed, or the instance was poisoned by a timeout.
    pub fn put(&self, instance: ModuleInstance) {
        if instance.poisoned || *self.closed.lock() {
            return;
        }
        let mut free = self.free.lock();
        if free.len() < self.size {
            free.push(instance);
        }
        // else: drop closes the instance's Store.
    }

    /// Number of instances currently idle in the free list.
    pub fn idle_count(&self) -> usize {
        self.free.lock().len()
    }

    /// Drain and close all idle instances. Instances currently lent out
    /// close themselves when `put` observes `closed`.
    pub fn close(&self) {
        *self.closed.lock() = true;
        self.free.lock().clear();
    }
}

/// RAII lease on a pool instance: encodes the `Get`/`Put` ownership move
/// explicitly so double-put and use-after-put are structurally unreachable.
pub struct Lease<'a> {
    pool: &'a ModulePool,
    instance: Option<ModuleInstance>,
}

impl<'a> Lease<'a> {
    pub fn acquire(pool: &'a ModulePool) -> crate::error::Result<Self> {
        Ok(Self {
            pool,
            instance: Some(pool.get()?),
        })
    }

    pub fn instance(&mut self) -> &mut ModuleInstance {
        self.instance.as_mut().expect("lease holds an instance until drop")
    }

    /// Mark the leased instance poisoned, so it is disposed rather than
    /// returned to the pool when the lease drops.
    pub fn poison(&mut self) {
        if let Some(instance) = self.instance.as_mut() {
            instance.poisoned = true;
        }
    }
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        if let Some(instance) = self.instance.take() {
            self.pool.put(instance);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::limits::ResourceLimits;

    const VALID_WAT: &str = r#"
        (module
            (memory (export "memory") 1)
            (func (export "filter") (param i64) (result i32)
                i32.const 1)
        )
    "#;

    fn make_pool(size: usize) -> (Arc<WasmRuntime>, ModulePool) {
        let runtime = Arc::new(WasmRuntime::new("filter", ResourceLimits::default()).unwrap());
        let bytes = wat::parse_str(VALID_WAT).unwrap();
        let compiled = runtime.compile_module("m", &bytes).unwrap();
        let pool = ModulePool::new(runtime.clone(), compiled, size).unwrap();
        (runtime, pool)
    }

    #[test]
    fn eagerly_creates_size_instances() {
        let (_rt, pool) = make_pool(3);
        assert_eq!(pool.idle_count(), 3);
    }

    #[test]
    fn get_drains_then_overflows() {
        let (_rt, pool) = make_pool(1);
        let a = pool.get().unwrap();
        assert_eq!(pool.idle_count(), 0);
        // Overflow: pool is empty but get() still succeeds.
        let b = pool.get().unwrap();
        pool.put(a);
        pool.put(b);
        // Only one slot is retained; the overflow instance is dropped.
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn lease_returns_instance_on_drop() {
        let (_rt, pool) = make_pool(1);
        {
            let _lease = Lease::acquire(&pool).unwrap();
            assert_eq!(pool.idle_count(), 0);
        }
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn poisoned_lease_is_not_returned() {
        let (_rt, pool) = make_pool(1);
        {
            let mut lease = Lease::acquire(&pool).unwrap();
            lease.poison();
        }
        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn close_drains_idle_instances() {
        let (_rt, pool) = make_pool(2);
        pool.close();
        assert_eq!(pool.idle_count(), 0);
    }
}
