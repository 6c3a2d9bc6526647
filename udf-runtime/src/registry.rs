//! Named catalog mapping `(name, version)` to a compiled module, its
//! metadata, and a dedicated instance pool.

use crate::config::UdfRuntimeConfig;
use crate::error::{Result, UdfError};
use crate::host_abi::{DocumentContext, PerCallState};
use crate::membuf::MemoryPool;
use crate::metadata::{ParamType, UdfMetadata};
use crate::pool::{Lease, ModulePool};
use crate::runtime::WasmRuntime;
use crate::security::audit::{AuditEntry, AuditLog};
use crate::security::limits::{InstanceLimiter, ResourceLimits};
use crate::security::permissions::CapabilitySet;
use crate::security::signature::{SignatureVerifier, UdfSignature};
use parking_lot::RwLock;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn registry_key(name: &str, version: &str) -> String {
    format!("{name}@{version}")
}

struct RegisteredUdf {
    metadata: UdfMetadata,
    pool: Arc<ModulePool>,
    capabilities: CapabilitySet,
}

/// Versioned catalog of named UDFs. Owns the runtime, limiter, audit log,
/// and memory pool that every registered UDF shares.
pub struct UdfRegistry {
    runtime: Arc<WasmRuntime>,
    entries: RwLock<HashMap<String, RegisteredUdf>>,
    limiter: Arc<InstanceLimiter>,
    audit: Arc<AuditLog>,
    verifier: Arc<dyn SignatureVerifier>,
    memory_pool: MemoryPool,
    pool_size: usize,
    call_timeout: Duration,
}

impl UdfRegistry {
    pub fn new(config: &UdfRuntimeConfig, verifier: Arc<dyn SignatureVerifier>) -> Result<Self> {
        let limits: ResourceLimits = config.resource_limits.clone().into();
        let runtime = Arc::new(WasmRuntime::new(config.entry_function.clone(), limits)?);
        Ok(Self {
            runtime,
            entries: RwLock::new(HashMap::new()),
            limiter: Arc::new(InstanceLimiter::new(limits.max_instances_per_udf)),
            audit: Arc::new(AuditLog::new(config.audit_log_capacity)),
            verifier,
            memory_pool: MemoryPool::new(),
            pool_size: config.pool_size,
            call_timeout: limits.max_wall_clock,
        })
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    pub fn memory_pool(&self) -> &MemoryPool {
        &self.memory_pool
    }

    /// Validate metadata, hash the binary, verify any signature, compile,
    /// and register under `(metadata.name, metadata.version)`.
    pub fn register(
        &self,
        mut metadata: UdfMetadata,
        bytes: &[u8],
        signature: Option<&UdfSignature>,
    ) -> Result<()> {
        let start = Instant::now();
        let key = registry_key(&metadata.name, &metadata.version);
        let result = self.register_inner(&mut metadata, bytes, signature, &key);

        self.audit.record(AuditEntry {
            timestamp: chrono::Utc::now(),
            operation: "register".to_string(),
            udf_name: metadata.name.clone(),
            version: metadata.version.clone(),
            user: metadata.signer.clone(),
            success: result.is_ok(),
            error: result.as_ref().err().map(|e| e.to_string()),
            duration: start.elapsed(),
            metadata: serde_json::json!({}),
        });
        result
    }

    fn register_inner(
        &self,
        metadata: &mut UdfMetadata,
        bytes: &[u8],
        signature: Option<&UdfSignature>,
        key: &str,
    ) -> Result<()> {
        crate::metadata::validate(metadata)?;

        if self.entries.read().contains_key(key) {
            return Err(UdfError::AlreadyExists(key.to_string()));
        }

        let hash = format!("{:x}", Sha256::digest(bytes));
        metadata.wasm_sha256 = hash.clone();

        if !self.verifier.verify(&hash, signature) {
            return Err(UdfError::SignatureMismatch(key.to_string()));
        }

        let compiled = self.runtime.compile_module(key, bytes)?;
        let pool = Arc::new(ModulePool::new(self.runtime.clone(), compiled, self.pool_size)?);

        self.entries.write().insert(
            key.to_string(),
            RegisteredUdf {
                metadata: metadata.clone(),
                pool,
                capabilities: CapabilitySet::default(),
            },
        );
        tracing::info!(name = %metadata.name, version = %metadata.version, "registered udf");
        Ok(())
    }

    /// Remove `(name, version)` and close its pool. Idempotent.
    pub fn unregister(&self, name: &str, version: &str) {
        let key = registry_key(name, version);
        if let Some(entry) = self.entries.write().remove(&key) {
            entry.pool.close();
        }
        self.audit.record(AuditEntry {
            timestamp: chrono::Utc::now(),
            operation: "unregister".to_string(),
            udf_name: name.to_string(),
            version: version.to_string(),
            user: None,
            success: true,
            error: None,
            duration: Duration::ZERO,
            metadata: serde_json::json!({}),
        });
    }

    pub fn get_metadata(&self, name: &str, version: &str) -> Option<UdfMetadata> {
        self.entries
            .read()
            .get(&registry_key(name, version))
            .map(|e| e.metadata.clone())
    }

    /// Resolve, validate params against declared metadata, borrow an
    /// instance, bind per-call state, invoke, and return the instance.
    pub fn call(
        &self,
        name: &str,
        version: &str,
        document: DocumentContext,
        ctx_id: u64,
        params: HashMap<String, Value>,
    ) -> Result<i32> {
        let start = Instant::now();
        let key = registry_key(name, version);
        let result = self.call_inner(&key, document, ctx_id, params);

        self.audit.record(AuditEntry {
            timestamp: chrono::Utc::now(),
            operation: "call".to_string(),
            udf_name: name.to_string(),
            version: version.to_string(),
            user: None,
            success: result.is_ok(),
            error: result.as_ref().err().map(|e| e.to_string()),
            duration: start.elapsed(),
            metadata: serde_json::json!({ "ctx_id": ctx_id }),
        });
        result
    }

    fn call_inner(
        &self,
        key: &str,
        document: DocumentContext,
        ctx_id: u64,
        params: HashMap<String, Value>,
    ) -> Result<i32> {
        let (pool, metadata, capabilities) = {
            let entries = self.entries.read();
            let entry = entries.get(key).ok_or_else(|| UdfError::NotFound(key.to_string()))?;
            (entry.pool.clone(), entry.metadata.clone(), entry.capabilities.clone())
        };

        let resolved_params = resolve_params(&metadata, params)?;
        let guard = self.limiter.acquire(key)?;

        let mut lease = Lease::acquire(&pool)?;
        lease.instance().bind_call_state(PerCallState {
            ctx_id,
            document: Arc::new(document),
            params: resolved_params,
            capabilities,
        });

        let call_timeout = self.call_timeout;
        let result = lease.instance().call_entry(ctx_id as i64, call_timeout);

        drop(guard);
        match result {
            Ok(value) => Ok(value),
            Err(_) if lease.instance().timed_out => Err(UdfError::Timeout(call_timeout)),
            Err(e) => Err(e),
        }
    }
}

/// Validate supplied params against declared metadata: required params
/// present, types match, unsupplied optional params get their declared
/// default injected (stringly-typed defaults are coerced to the declared
/// type).
fn resolve_params(
    metadata: &UdfMetadata,
    mut supplied: HashMap<String, Value>,
) -> Result<HashMap<String, Value>> {
    let declared_names: HashSet<&str> = metadata.parameters.iter().map(|p| p.name.as_str()).collect();
    for name in supplied.keys() {
        if !declared_names.contains(name.as_str()) {
            return Err(UdfError::InvalidInput(format!("unknown parameter: {name}")));
        }
    }

    let mut resolved = HashMap::new();
    for param in &metadata.parameters {
        match supplied.remove(&param.name) {
            Some(value) => {
                check_type(&param.name, param.ty, &value)?;
                resolved.insert(param.name.clone(), value);
            }
            None => {
                if param.required {
                    return Err(UdfError::InvalidInput(format!(
                        "missing required parameter: {}",
                        param.name
                    )));
                }
                if let Some(default) = &param.default {
                    resolved.insert(param.name.clone(), coerce_default(param.ty, default));
                }
            }
        }
    }
    Ok(resolved)
}

fn check_type(name: &str, ty: ParamType, value: &Value) -> Result<()> {
    let matches = match ty {
        ParamType::String => value.is_string(),
        ParamType::I64 => value.is_i64() || value.is_u64(),
        ParamType::F64 => value.is_f64() || value.is_i64() || value.is_u64(),
        ParamType::Bool => value.is_boolean(),
    };
    if matches {
        Ok(())
    } else {
        Err(UdfError::InvalidInput(format!(
            "parameter '{name}' has wrong type, expected {ty:?}"
        )))
    }
}

fn coerce_default(ty: ParamType, raw: &str) -> Value {
    match ty {
        ParamType::String => Value::String(raw.to_string()),
        ParamType::I64 => raw
            .parse::<i64>()
            .map(|n| Value::Number(n.into()))
            .unwrap_or_else(|_| Value::String(raw.to_string())),
        ParamType::F64 => serde_json::Number::from_f64(raw.parse::<f64>().unwrap_or(0.0))
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(raw.to_string())),
        ParamType::Bool => raw
            .parse::<bool>()
            .map(Value::Bool)
            .unwrap_or_else(|_| Value::String(raw.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::UdfParameter;
    use crate::security::signature::NoopVerifier;

    const PASS_WAT: &str = r#"
        (module
            (memory (export "memory") 1)
            (func (export "filter") (param i64) (result i32)
                i32.const 1)
        )
    "#;

    fn sample_metadata(name: &str, version: &str) -> UdfMetadata {
        UdfMetadata {
            name: name.to_string(),
            version: version.to_string(),
            function_name: "filter".to_string(),
            description: String::new(),
            author: None,
            category: "filter".to_string(),
            parameters: vec![UdfParameter {
                name: "threshold".to_string(),
                ty: ParamType::I64,
                required: false,
                default: Some("5".to_string()),
                description: None,
            }],
            returns: vec![],
            tags: vec![],
            language: "python".to_string(),
            signer: None,
            wasm_sha256: String::new(),
            created: chrono::Utc::now(),
        }
    }

    fn registry() -> UdfRegistry {
        let config = UdfRuntimeConfig {
            pool_size: 2,
            ..UdfRuntimeConfig::default()
        };
        UdfRegistry::new(&config, Arc::new(NoopVerifier)).unwrap()
    }

    fn doc() -> DocumentContext {
        DocumentContext {
            doc_id: "d1".to_string(),
            score: 1.0,
            fields: Arc::new(HashMap::new()),
        }
    }

    #[test]
    fn register_then_call_succeeds() {
        let registry = registry();
        let bytes = wat::parse_str(PASS_WAT).unwrap();
        registry.register(sample_metadata("f", "1.0.0"), &bytes, None).unwrap();
        let result = registry.call("f", "1.0.0", doc(), 1, HashMap::new()).unwrap();
        assert_eq!(result, 1);
    }

    #[test]
    fn duplicate_registration_rejected() {
        let registry = registry();
        let bytes = wat::parse_str(PASS_WAT).unwrap();
        registry.register(sample_metadata("f", "1.0.0"), &bytes, None).unwrap();
        let err = registry
            .register(sample_metadata("f", "1.0.0"), &bytes, None)
            .unwrap_err();
        assert!(matches!(err, UdfError::AlreadyExists(_)));
    }

    #[test]
    fn call_unknown_udf_not_found() {
        let registry = registry();
        let err = registry.call("nope", "1.0.0", doc(), 1, HashMap::new()).unwrap_err();
        assert!(matches!(err, UdfError::NotFound(_)));
    }

    #[test]
    fn unregister_then_call_not_found() {
        let registry = registry();
        let bytes = wat::parse_str(PASS_WAT).unwrap();
        registry.register(sample_metadata("f", "1.0.0"), &bytes, None).unwrap();
        registry.unregister("f", "1.0.0");
        assert!(registry.call("f", "1.0.0", doc(), 1, HashMap::new()).is_err());
    }

    #[test]
    fn missing_required_param_rejected() {
        let registry = registry();
        let mut metadata = sample_metadata("f", "1.0.0");
        metadata.parameters[0].required = true;
        metadata.parameters[0].default = None;
        let bytes = wat::parse_str(PASS_WAT).unwrap();
        registry.register(metadata, &bytes, None).unwrap();
        let err = registry.call("f", "1.0.0", doc(), 1, HashMap::new()).unwrap_err();
        assert!(matches!(err, UdfError::InvalidInput(_)));
    }

    #[test]
    fn unsupplied_optional_param_uses_default() {
        let registry = registry();
        let bytes = wat::parse_str(PASS_WAT).unwrap();
        registry.register(sample_metadata("f", "1.0.0"), &bytes, None).unwrap();
        // Doesn't inspect the default directly, but the call must succeed
        // without the caller supplying 'threshold'.
        assert!(registry.call("f", "1.0.0", doc(), 1, HashMap::new()).is_ok());
    }

    #[test]
    fn hash_recorded_matches_binary() {
        let registry = registry();
        let bytes = wat::parse_str(PASS_WAT).unwrap();
        registry.register(sample_metadata("f", "1.0.0"), &bytes, None).unwrap();
        let metadata = registry.get_metadata("f", "1.0.0").unwrap();
        let expected = format!("{:x}", Sha256::digest(&bytes));
        assert_eq!(metadata.wasm_sha256, expected);
    }

    /// A guest that reads the `threshold` call parameter and the `value`
    /// document field through the host ABI and compares them, exercising
    /// `get_param_i64`/`get_field_i64` end to end (not just the trivial
    /// `PASS_WAT` fixture every other test above uses).
    const THRESHOLD_WAT: &str = r#"
        (module
            (import "env" "get_param_i64" (func $get_param_i64 (param i64 i32 i32 i32) (result i32)))
            (import "env" "get_field_i64" (func $get_field_i64 (param i64 i32 i32 i32) (result i32)))
            (memory (export "memory") 1)
            (data (i32.const 0) "threshold")
            (data (i32.const 16) "value")
            (func (export "filter") (param $ctx i64) (result i32)
                (local $pstatus i32)
                (local $fstatus i32)
                (local.set $pstatus
                    (call $get_param_i64 (local.get $ctx) (i32.const 0) (i32.const 9) (i32.const 32)))
                (local.set $fstatus
                    (call $get_field_i64 (local.get $ctx) (i32.const 16) (i32.const 5) (i32.const 40)))
                (if (result i32)
                    (i32.and (i32.eqz (local.get $pstatus)) (i32.eqz (local.get $fstatus)))
                    (then (i64.ge_s (i64.load (i32.const 40)) (i64.load (i32.const 32))))
                    (else (i32.const 0))))
        )
    "#;

    fn doc_with_value(value: i64) -> DocumentContext {
        let mut fields = HashMap::new();
        fields.insert("value".to_string(), serde_json::json!(value));
        DocumentContext {
            doc_id: "d1".to_string(),
            score: 1.0,
            fields: Arc::new(fields),
        }
    }

    #[test]
    fn host_abi_field_and_param_access_roundtrips() {
        let registry = registry();
        let bytes = wat::parse_str(THRESHOLD_WAT).unwrap();
        registry.register(sample_metadata("threshold_udf", "1.0.0"), &bytes, None).unwrap();

        let mut params = HashMap::new();
        params.insert("threshold".to_string(), serde_json::json!(5i64));

        let above = registry
            .call("threshold_udf", "1.0.0", doc_with_value(10), 1, params.clone())
            .unwrap();
        assert_eq!(above, 1);

        let below = registry
            .call("threshold_udf", "1.0.0", doc_with_value(1), 2, params)
            .unwrap();
        assert_eq!(below, 0);
    }

    /// A guest that never returns; the call must time out rather than hang
    /// the caller, and the instance limiter must release its slot so the
    /// poisoned instance doesn't leak capacity.
    const SPIN_WAT: &str = r#"
        (module
            (memory (export "memory") 1)
            (func (export "filter") (param i64) (result i32)
                (loop $l (br $l))
                (i32.const 1))
        )
    "#;

    #[test]
    fn spin_loop_times_out_and_releases_instance_slot() {
        let config = UdfRuntimeConfig {
            pool_size: 1,
            resource_limits: crate::config::ResourceLimitsConfig {
                max_wall_clock_secs: 0,
                max_call_frames: 50_000_000,
                ..crate::config::ResourceLimitsConfig::default()
            },
            ..UdfRuntimeConfig::default()
        };
        let registry = UdfRegistry::new(&config, Arc::new(NoopVerifier)).unwrap();
        let bytes = wat::parse_str(SPIN_WAT).unwrap();
        registry.register(sample_metadata("spin", "1.0.0"), &bytes, None).unwrap();

        let key = registry_key("spin", "1.0.0");
        let err = registry.call("spin", "1.0.0", doc(), 1, HashMap::new()).unwrap_err();
        assert!(matches!(err, UdfError::Timeout(_)));
        assert_eq!(registry.limiter.outstanding(&key), 0);
    }
}
