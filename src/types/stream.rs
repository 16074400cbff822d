//! Streaming event types

use std::pin::Pin;

use futures_util::Stream;
use serde_json::Value;

use super::response::{CallWarning, FinishReason, Usage};
use crate::Result;

/// Boxed stream of parts as produced by `do_stream`.
pub type PartStream = Pin<Box<dyn Stream<Item = Result<StreamPart>> + Send>>;

/// Events emitted during a streaming call
#[derive(Debug, Clone, PartialEq)]
pub enum StreamPart {
    /// Incremental text
    TextDelta(String),

    /// Terminal event carrying the finish reason and usage
    Finish {
        finish_reason: FinishReason,
        usage: Usage,
    },

    /// Any other provider event (tool calls, reasoning, metadata).
    /// Middleware forwards these unmodified.
    Other(Value),
}

impl StreamPart {
    pub fn text(delta: impl Into<String>) -> Self {
        StreamPart::TextDelta(delta.into())
    }

    pub fn finish(finish_reason: FinishReason, usage: Usage) -> Self {
        StreamPart::Finish {
            finish_reason,
            usage,
        }
    }
}

/// Result of `do_stream`: the part stream plus call-level metadata.
pub struct StreamResponse {
    pub stream: PartStream,
    pub warnings: Vec<CallWarning>,
    pub raw_call: Value,
    pub raw_response: Option<Value>,
}

impl StreamResponse {
    /// Wrap a part stream with empty call metadata.
    pub fn new(stream: PartStream) -> Self {
        Self {
            stream,
            warnings: Vec::new(),
            raw_call: Value::Null,
            raw_response: None,
        }
    }

    /// Replace the part stream, keeping call metadata.
    pub fn map_stream(self, f: impl FnOnce(PartStream) -> PartStream) -> Self {
        Self {
            stream: f(self.stream),
            ..self
        }
    }
}

impl std::fmt::Debug for StreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamResponse")
            .field("warnings", &self.warnings)
            .field("raw_call", &self.raw_call)
            .field("raw_response", &self.raw_response)
            .finish_non_exhaustive()
    }
}
