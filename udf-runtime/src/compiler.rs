//! Metadata extractor for UDF source text.
//!
//! Parses a higher-level source language's function declaration, docstring,
//! and `# @udf:` header comments into a [`UdfMetadata`] record. Does not
//! produce WASM: the binary is supplied separately by the registrant in the
//! common path (§1, Out of scope). The extractor is intentionally
//! regex-based and therefore permissive — it does not handle multi-line
//! signatures, nested annotations, or non-ASCII identifiers beyond what the
//! patterns below admit. See DESIGN.md for the decision to keep this
//! permissive behavior rather than building a real parser.

use crate::error::Result;
use crate::metadata::{ParamType, ReturnSpec, UdfMetadata, UdfParameter};
use regex::Regex;
use std::sync::OnceLock;

fn def_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^\s*def\s+([A-Za-z_][A-Za-z0-9_]*)\s*\(([^)]*)\)\s*(?:->\s*([A-Za-z_][A-Za-z0-9_]*))?\s*:")
            .expect("static regex is valid")
    })
}

fn docstring_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?s)"""(.*?)"""|'''(.*?)'''"#).expect("static regex is valid")
    })
}

fn header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^\s*#\s*@udf:\s*([A-Za-z_]+)\s*=\s*(.+?)\s*$").expect("static regex is valid")
    })
}

/// Extract a [`UdfMetadata`] record from UDF source text. Never fails on
/// malformed input: absent declarations fall back to the defaults named in
/// §4.8, matching the source extractor's permissive behavior.
pub fn extract_metadata(source: &str) -> UdfMetadata {
    let mut name = "python_udf".to_string();
    let mut function_name = "python_udf".to_string();
    let mut version = "1.0.0".to_string();
    let mut category = "filter".to_string();
    let mut language = "python".to_string();
    let mut author = None;
    let mut tags = Vec::new();
    let mut description = String::new();
    let mut parameters = Vec::new();
    let mut returns = Vec::new();

    if let Some(caps) = def_re().captures(source) {
        name = caps.get(1).map(|m| m.as_str().to_string()).unwrap_or(name);
        function_name = name.clone();
        if let Some(params_src) = caps.get(2) {
            parameters = parse_parameters(params_src.as_str());
        }
        if let Some(ret) = caps.get(3) {
            returns.push(ReturnSpec {
                ty: ParamType::from_annotation(ret.as_str()),
                description: None,
            });
        }
    }

    if let Some(caps) = docstring_re().captures(source) {
        let raw = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str())
            .unwrap_or("");
        description = raw.trim().to_string();
    }

    for caps in header_re().captures_iter(source) {
        let key = caps[1].to_ascii_lowercase();
        let value = caps[2].trim().to_string();
        match key.as_str() {
            "name" => name = value,
            "version" => version = value,
            "author" => author = Some(value),
            "category" => category = value,
            "language" => language = value,
            "tags" => tags = value.split(',').map(|t| t.trim().to_string()).filter(|t| !t.is_empty()).collect(),
            _ => {}
        }
    }

    UdfMetadata {
        name,
        version,
        function_name,
        description,
        author,
        category,
        parameters,
        returns,
        tags,
        language,
        signer: None,
        wasm_sha256: String::new(),
        created: chrono::Utc::now(),
    }
}

/// Parse a positional parameter list: `name[: type][= default]`, comma
/// separated. Each `=` marks the parameter optional and its right-hand side
/// (trimmed, with surrounding quotes stripped) becomes the default.
fn parse_parameters(src: &str) -> Vec<UdfParameter> {
    let mut out = Vec::new();
    for raw in src.split(',') {
        let raw = raw.trim();
        if raw.is_empty() || raw == "self" {
            continue;
        }

        let (before_default, default) = match raw.split_once('=') {
            Some((lhs, rhs)) => (lhs.trim(), Some(unquote(rhs.trim()))),
            None => (raw, None),
        };

        let (param_name, ty) = match before_default.split_once(':') {
            Some((n, t)) => (n.trim(), ParamType::from_annotation(t.trim())),
            None => (before_default, ParamType::String),
        };

        if param_name.is_empty() {
            continue;
        }

        out.push(UdfParameter {
            name: param_name.to_string(),
            ty,
            required: default.is_none(),
            default,
            description: None,
        });
    }
    out
}

fn unquote(s: &str) -> String {
    let bytes = s.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return s[1..s.len() - 1].to_string();
        }
    }
    s.to_string()
}

/// Validate extracted (or hand-authored) metadata: non-empty name/version,
/// every parameter has a name, every declared type already fell within
/// [`ParamType`]'s allowed set by construction.
pub fn validate(metadata: &UdfMetadata) -> Result<()> {
    crate::metadata::validate(metadata)
}
