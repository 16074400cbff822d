//! WrappedModel - a model behind an ordered middleware chain

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::Result;
use crate::middleware::{Link, Next};
use crate::state::ProtocolContext;
use crate::traits::LanguageModel;
use crate::types::{CallOptions, GenerateResponse, StreamResponse};

/// A [`LanguageModel`] whose calls pass through a middleware chain.
///
/// Links run in registration order: the first registered link sees the call
/// first and the response last.
pub struct WrappedModel {
    model: Arc<dyn LanguageModel>,
    links: Vec<Link>,
}

impl WrappedModel {
    pub(crate) fn new(model: Arc<dyn LanguageModel>, links: Vec<Link>) -> Self {
        Self { model, links }
    }

    /// The underlying model.
    pub fn inner(&self) -> &Arc<dyn LanguageModel> {
        &self.model
    }

    /// Registered links, in chain order.
    pub fn links(&self) -> &[Link] {
        &self.links
    }

    /// Names of registered links, in chain order.
    pub fn link_names(&self) -> Vec<String> {
        self.links.iter().map(|l| l.name().to_string()).collect()
    }

    /// Non-streaming call through the chain.
    pub async fn generate(&self, options: CallOptions) -> Result<GenerateResponse> {
        Next::new(&self.links, self.model.as_ref(), None)
            .generate(options)
            .await
    }

    /// Streaming call through the chain.
    pub async fn stream(&self, options: CallOptions) -> Result<StreamResponse> {
        Next::new(&self.links, self.model.as_ref(), None)
            .stream(options)
            .await
    }

    /// Walk the chain with a state protocol context attached.
    pub(crate) async fn generate_with_protocol(
        &self,
        options: CallOptions,
        ctx: &ProtocolContext,
    ) -> Result<GenerateResponse> {
        Next::new(&self.links, self.model.as_ref(), Some(ctx))
            .generate(options)
            .await
    }
}

#[async_trait]
impl LanguageModel for WrappedModel {
    fn provider(&self) -> &str {
        self.model.provider()
    }

    fn model_id(&self) -> &str {
        self.model.model_id()
    }

    async fn do_generate(&self, options: &CallOptions) -> Result<GenerateResponse> {
        self.generate(options.clone()).await
    }

    async fn do_stream(&self, options: &CallOptions) -> Result<StreamResponse> {
        self.stream(options.clone()).await
    }

    async fn forward_protocol(&self, ctx: &ProtocolContext) {
        if let Err(e) = self.generate_with_protocol(CallOptions::default(), ctx).await {
            warn!(error = %e, "nested chain failed during state protocol");
        }
    }
}
