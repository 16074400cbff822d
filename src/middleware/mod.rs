//! Middleware chain primitives.
//!
//! A [`Middleware`] intercepts `generate` and `stream` calls on their way to a
//! [`LanguageModel`]. Each interceptor receives the call options and a
//! [`Next`] continuation; calling `next.generate(options)` hands the call to the
//! next link, and ultimately to the model. Not calling it short-circuits the
//! call (this is how a cache hit bypasses the provider).
//!
//! # Links
//!
//! Middleware is registered on a [`WrappedModel`](crate::WrappedModel) as a
//! [`Link`], a tagged variant resolved once at registration time:
//!
//! - [`Link::Plain`]: ordinary middleware, invisible to the state protocol.
//! - [`Link::Stateful`]: middleware registered under a
//!   [`MiddlewareId`](crate::state::MiddlewareId) that takes part in
//!   snapshot/restore (see [`crate::state`]).
//!
//! ```text
//! caller ──► link 0 ──► link 1 ──► ... ──► link n ──► model.do_generate()
//!              │           │
//!              └─ may answer without calling next (cache hit)
//! ```
//!
//! During a state protocol call, plain links are skipped, stateful links
//! collect or restore their state instead of running their logic, and the
//! chain terminal hands the protocol to the model's
//! [`forward_protocol`](LanguageModel::forward_protocol) (so nested chains
//! take part) and answers with an empty response instead of calling it.

pub mod fallback;
pub mod history;
pub mod quota;

pub use fallback::FallbackMiddleware;
pub use history::{HistoryConfig, HistoryMiddleware};
pub use quota::{MemoryUsageStore, QuotaConfig, QuotaMiddleware, UsageStore};

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream;

use crate::Result;
use crate::state::{ProtocolContext, Stateful};
use crate::traits::LanguageModel;
use crate::types::{CallOptions, GenerateResponse, StreamResponse};

pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Request/response interceptor for model calls.
///
/// Both hooks default to passing the call through unchanged.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Name for logging/debugging.
    fn name(&self) -> &str {
        "unnamed"
    }

    /// Intercept a non-streaming call.
    async fn wrap_generate(
        &self,
        options: CallOptions,
        next: Next<'_>,
    ) -> Result<GenerateResponse> {
        next.generate(options).await
    }

    /// Intercept a streaming call.
    async fn wrap_stream(&self, options: CallOptions, next: Next<'_>) -> Result<StreamResponse> {
        next.stream(options).await
    }
}

/// One registered slot in a middleware chain.
pub enum Link {
    Plain(Arc<dyn Middleware>),
    Stateful(Stateful),
}

impl Link {
    pub fn name(&self) -> &str {
        match self {
            Link::Plain(m) => m.name(),
            Link::Stateful(s) => s.middleware().name(),
        }
    }

    async fn generate(&self, options: CallOptions, next: Next<'_>) -> Result<GenerateResponse> {
        match (self, next.protocol) {
            (Link::Stateful(s), Some(ctx)) => {
                s.handle_protocol(ctx).await;
                next.generate(options).await
            }
            (Link::Plain(_), Some(_)) => next.generate(options).await,
            (Link::Plain(m), None) => m.wrap_generate(options, next).await,
            (Link::Stateful(s), None) => s.middleware().wrap_generate(options, next).await,
        }
    }

    async fn stream(&self, options: CallOptions, next: Next<'_>) -> Result<StreamResponse> {
        match (self, next.protocol) {
            (Link::Stateful(s), Some(ctx)) => {
                s.handle_protocol(ctx).await;
                next.stream(options).await
            }
            (Link::Plain(_), Some(_)) => next.stream(options).await,
            (Link::Plain(m), None) => m.wrap_stream(options, next).await,
            (Link::Stateful(s), None) => s.middleware().wrap_stream(options, next).await,
        }
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Link::Plain(m) => f.debug_tuple("Plain").field(&m.name()).finish(),
            Link::Stateful(s) => f
                .debug_tuple("Stateful")
                .field(&s.id().as_str())
                .field(&s.middleware().name())
                .finish(),
        }
    }
}

/// Continuation handed to a middleware: the rest of the chain plus the model.
pub struct Next<'a> {
    links: &'a [Link],
    model: &'a dyn LanguageModel,
    protocol: Option<&'a ProtocolContext>,
}

impl<'a> Next<'a> {
    pub(crate) fn new(
        links: &'a [Link],
        model: &'a dyn LanguageModel,
        protocol: Option<&'a ProtocolContext>,
    ) -> Self {
        Self {
            links,
            model,
            protocol,
        }
    }

    /// The model at the end of the chain.
    pub fn model(&self) -> &'a dyn LanguageModel {
        self.model
    }

    fn rest(&self, links: &'a [Link]) -> Next<'a> {
        Next {
            links,
            model: self.model,
            protocol: self.protocol,
        }
    }

    /// Run the rest of the chain for a non-streaming call.
    pub fn generate(self, options: CallOptions) -> BoxFuture<'a, Result<GenerateResponse>> {
        Box::pin(async move {
            match (self.links.split_first(), self.protocol) {
                (Some((link, rest)), _) => link.generate(options, self.rest(rest)).await,
                // Protocol calls must never reach the provider.
                (None, Some(ctx)) => {
                    self.model.forward_protocol(ctx).await;
                    Ok(GenerateResponse::default())
                }
                (None, None) => self.model.do_generate(&options).await,
            }
        })
    }

    /// Run the rest of the chain for a streaming call.
    pub fn stream(self, options: CallOptions) -> BoxFuture<'a, Result<StreamResponse>> {
        Box::pin(async move {
            match (self.links.split_first(), self.protocol) {
                (Some((link, rest)), _) => link.stream(options, self.rest(rest)).await,
                (None, Some(ctx)) => {
                    self.model.forward_protocol(ctx).await;
                    Ok(StreamResponse::new(Box::pin(stream::empty())))
                }
                (None, None) => self.model.do_stream(&options).await,
            }
        })
    }
}
