//! UDF commands — register a WASM filter function and invoke it against a
//! document, all within a single process. There is no persistent daemon in
//! this repo's scope, so each invocation builds a fresh [`UdfRegistry`];
//! `register-and-call` exists specifically to exercise both steps in one
//! process the way a real query-execution path would.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use udf_runtime::host_abi::DocumentContext;
use udf_runtime::security::signature::NoopVerifier;
use udf_runtime::{UdfMetadata, UdfRegistry, UdfRuntimeConfig};

fn read_metadata(path: &Path) -> Result<UdfMetadata> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading metadata {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing metadata {}", path.display()))
}

fn read_json_map(path: &Path) -> Result<HashMap<String, serde_json::Value>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

/// Extract `UdfMetadata` from source text using the regex-based compiler and
/// print it as JSON, without compiling or registering any WASM binary.
pub fn run_compile_metadata(source_file: &Path) -> Result<()> {
    let source = std::fs::read_to_string(source_file)
        .with_context(|| format!("reading source {}", source_file.display()))?;
    let metadata = udf_runtime::compiler::extract_metadata(&source);
    udf_runtime::compiler::validate(&metadata)?;
    println!("{}", serde_json::to_string_pretty(&metadata)?);
    Ok(())
}

/// Register a WASM UDF and immediately call it against one document, in a
/// single process. Prints the metadata (with its computed hash) and the
/// integer result.
pub fn run_register_and_call(
    wasm_file: &Path,
    metadata_file: &Path,
    document_file: &Path,
    params_file: Option<&Path>,
) -> Result<()> {
    let mut metadata = read_metadata(metadata_file)?;
    let bytes = std::fs::read(wasm_file)
        .with_context(|| format!("reading wasm binary {}", wasm_file.display()))?;

    let registry = UdfRegistry::new(&UdfRuntimeConfig::default(), Arc::new(NoopVerifier))
        .context("constructing udf registry")?;
    registry
        .register(metadata.clone(), &bytes, None)
        .context("registering udf")?;
    metadata = registry
        .get_metadata(&metadata.name, &metadata.version)
        .expect("just registered");
    println!("registered {}@{}  sha256={}", metadata.name, metadata.version, metadata.wasm_sha256);

    let fields = read_json_map(document_file)?;
    let params = match params_file {
        Some(path) => read_json_map(path)?,
        None => HashMap::new(),
    };

    let document = DocumentContext {
        doc_id: "cli-doc".to_string(),
        score: 1.0,
        fields: Arc::new(fields),
    };

    let result = registry
        .call(&metadata.name, &metadata.version, document, 1, params)
        .context("calling udf")?;
    println!("result: {}", result);
    Ok(())
}
