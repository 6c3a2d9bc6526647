//! UDF metadata: the typed description of a registered function's
//! signature, shared by the registry and the metadata compiler.

use crate::error::{Result, UdfError};
use serde::{Deserialize, Serialize};

/// Scalar types a UDF parameter or return value may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    I64,
    F64,
    Bool,
}

impl ParamType {
    /// Map a source-language type annotation onto a `ParamType`, per the
    /// compiler's extraction rules. Unknown or absent annotations default
    /// to `String`.
    pub fn from_annotation(annotation: &str) -> Self {
        match annotation.trim().to_ascii_lowercase().as_str() {
            "str" | "string" => ParamType::String,
            "int" | "integer" => ParamType::I64,
            "float" | "double" => ParamType::F64,
            "bool" | "boolean" => ParamType::Bool,
            _ => ParamType::String,
        }
    }
}

/// A single declared parameter of a UDF.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UdfParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ParamType,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A single declared return value of a UDF.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnSpec {
    #[serde(rename = "type")]
    pub ty: ParamType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Full metadata record for a registered or compiled UDF.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UdfMetadata {
    pub name: String,
    pub version: String,
    pub function_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub parameters: Vec<UdfParameter>,
    #[serde(default)]
    pub returns: Vec<ReturnSpec>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub signer: Option<String>,
    /// Populated by the registry at registration time, not by the caller.
    #[serde(default)]
    pub wasm_sha256: String,
    pub created: chrono::DateTime<chrono::Utc>,
}

fn default_category() -> String {
    "filter".to_string()
}

fn default_language() -> String {
    "python".to_string()
}

/// Validate a metadata record: non-empty name/version, and every parameter
/// and return type already fell within `ParamType`'s allowed set by
/// construction — this mirrors the registry's own pre-registration check so
/// the rule lives in one place.
pub fn validate(metadata: &UdfMetadata) -> Result<()> {
    if metadata.name.trim().is_empty() {
        return Err(UdfError::InvalidInput("name must not be empty".to_string()));
    }
    if metadata.version.trim().is_empty() {
        return Err(UdfError::InvalidInput(
            "version must not be empty".to_string(),
        ));
    }
    for param in &metadata.parameters {
        if param.name.trim().is_empty() {
            return Err(UdfError::InvalidInput(
                "parameter name must not be empty".to_string(),
            ));
        }
    }
    Ok(())
}
