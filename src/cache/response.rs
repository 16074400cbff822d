//! Cached response value.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{CallWarning, FinishReason, GenerateResponse, ResponseMetadata, Usage};

/// A complete response as stored under a cache key.
///
/// Encoded as JSON text in the store. Written wholesale, never patched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedResponse {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub finish_reason: FinishReason,
    #[serde(default)]
    pub usage: Usage,
    #[serde(default)]
    pub warnings: Vec<CallWarning>,
    #[serde(default)]
    pub raw_call: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseMetadata>,
}

impl CachedResponse {
    pub(crate) fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub(crate) fn from_json(s: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    /// Summary recorded in the jail ledger.
    pub fn summary(&self) -> ResponseSummary {
        ResponseSummary {
            finish_reason: self.finish_reason,
            has_warnings: !self.warnings.is_empty(),
            text_length: self.text.chars().count(),
        }
    }
}

/// Shape of the last problematic response seen for a fingerprint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseSummary {
    pub finish_reason: FinishReason,
    pub has_warnings: bool,
    pub text_length: usize,
}

impl From<&GenerateResponse> for CachedResponse {
    fn from(r: &GenerateResponse) -> Self {
        Self {
            text: r.text.clone(),
            finish_reason: r.finish_reason,
            usage: r.usage,
            warnings: r.warnings.clone(),
            raw_call: r.raw_call.clone(),
            raw_response: r.raw_response.clone(),
            response: r.response.clone(),
        }
    }
}

impl From<CachedResponse> for GenerateResponse {
    fn from(c: CachedResponse) -> Self {
        Self {
            text: c.text,
            finish_reason: c.finish_reason,
            usage: c.usage,
            warnings: c.warnings,
            raw_call: c.raw_call,
            raw_response: c.raw_response,
            response: c.response,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_field_names() {
        let cached = CachedResponse {
            text: "hi".into(),
            finish_reason: FinishReason::ContentFilter,
            usage: Usage::new(3, 1),
            ..CachedResponse::default()
        };
        let v: Value = serde_json::from_str(&cached.to_json().unwrap()).unwrap();
        assert_eq!(v["finishReason"], json!("content-filter"));
        assert_eq!(v["usage"], json!({"promptTokens": 3, "completionTokens": 1}));
        assert_eq!(v["rawCall"], Value::Null);
    }

    #[test]
    fn summary_counts_characters() {
        let cached = CachedResponse {
            text: "héllo".into(),
            warnings: vec![CallWarning::other("w")],
            ..CachedResponse::default()
        };
        let s = cached.summary();
        assert_eq!(s.text_length, 5);
        assert!(s.has_warnings);
        assert_eq!(s.finish_reason, FinishReason::Stop);
    }

    #[test]
    fn tolerates_sparse_json() {
        let cached = CachedResponse::from_json(r#"{"text":"hello"}"#).unwrap();
        assert_eq!(cached.text, "hello");
        assert_eq!(cached.finish_reason, FinishReason::Stop);
        assert!(cached.warnings.is_empty());
    }
}
