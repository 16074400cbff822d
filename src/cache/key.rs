//! Request fingerprinting.
//!
//! A fingerprint is the SHA-256 of a canonical string built from the model id
//! and the request parameters. Canonicalization makes the key insensitive to
//! map insertion order, absent/null fields and whitespace:
//!
//! - `null`, empty strings, empty arrays and empty objects are dropped
//!   (booleans are always kept, `false` included)
//! - objects become a JSON list of `[key, value]` pairs sorted by key
//! - arrays become a JSON list of their canonical elements sorted
//!   lexicographically
//! - whitespace and backslashes are stripped from the final string

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::{MimirError, Result};

/// Model id used when the caller does not know which model serves the call.
pub const UNKNOWN_MODEL: &str = "unknown";

/// Hex-encoded SHA-256 fingerprint of a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Namespaced store key: `prefix:hash`.
    pub fn key(&self, prefix: &str) -> String {
        format!("{prefix}:{}", self.0)
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the fingerprint of `params` for `model_id` (default `"unknown"`).
///
/// Fails with [`MimirError::InvalidKey`] when `params` canonicalizes to
/// nothing (e.g. `null`, `{}`, or an object of only null fields).
pub fn fingerprint(params: &Value, model_id: Option<&str>) -> Result<Fingerprint> {
    let params = canonicalize(params)
        .ok_or_else(|| MimirError::InvalidKey("request parameters are empty".into()))?;
    let model = model_id.filter(|m| !m.is_empty()).unwrap_or(UNKNOWN_MODEL);

    let canonical = format!("[[\"model\",{}],[\"params\",{params}]]", Value::from(model));
    let canonical: String = canonical
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\\')
        .collect();

    Ok(Fingerprint(hex::encode(Sha256::digest(canonical.as_bytes()))))
}

/// Canonical JSON text of a value, or `None` if the value is empty.
fn canonicalize(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if s.is_empty() => None,
        Value::String(_) => Some(value.to_string()),
        Value::Array(items) => {
            let mut items: Vec<String> = items.iter().filter_map(canonicalize).collect();
            if items.is_empty() {
                return None;
            }
            items.sort();
            Some(format!("[{}]", items.join(",")))
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, String)> = map
                .iter()
                .filter_map(|(k, v)| canonicalize(v).map(|v| (k, v)))
                .collect();
            if entries.is_empty() {
                return None;
            }
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let pairs: Vec<String> = entries
                .into_iter()
                .map(|(k, v)| format!("[{},{v}]", Value::from(k.as_str())))
                .collect();
            Some(format!("[{}]", pairs.join(",")))
        }
    }
}
