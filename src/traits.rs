//! Core LanguageModel trait

use async_trait::async_trait;

use crate::Result;
use crate::state::ProtocolContext;
use crate::types::{CallOptions, GenerateResponse, StreamResponse};

/// A model that can be called for a complete response or a stream.
///
/// Provider SDK adapters implement this trait; [`WrappedModel`](crate::WrappedModel)
/// implements it too, so middleware chains compose by nesting.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Provider name for logging/debugging.
    fn provider(&self) -> &str;

    /// Model identifier, part of every cache fingerprint.
    fn model_id(&self) -> &str;

    /// Non-streaming generation.
    async fn do_generate(&self, options: &CallOptions) -> Result<GenerateResponse>;

    /// Streaming generation.
    async fn do_stream(&self, options: &CallOptions) -> Result<StreamResponse>;

    /// Carry a state protocol walk into any middleware chain behind this model.
    ///
    /// Called at the end of a chain instead of `do_generate`/`do_stream`.
    /// Providers have no chain, so the default does nothing.
    async fn forward_protocol(&self, _ctx: &ProtocolContext) {}
}
