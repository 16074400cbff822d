//! Provider failover.
//!
//! [`FallbackMiddleware`] retries a failed call on alternate models, in
//! priority order, until one succeeds or returns a non-fallback error.
//! Transient errors and [`MimirError::ModelNotFound`] trigger fallback; every
//! other error is returned immediately.
//!
//! Alternates are called directly, so links registered after this one only
//! see the primary attempt. Register it last (closest to the model) unless
//! that is what you want.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use super::{Middleware, Next};
use crate::telemetry;
use crate::traits::LanguageModel;
use crate::types::{CallOptions, GenerateResponse, StreamResponse};
use crate::{MimirError, Result};

/// Fails over to alternate models on transient errors.
pub struct FallbackMiddleware {
    alternates: Vec<Arc<dyn LanguageModel>>,
}

impl FallbackMiddleware {
    pub fn new(alternates: Vec<Arc<dyn LanguageModel>>) -> Self {
        Self { alternates }
    }

    /// Append an alternate model, tried after those already registered.
    pub fn alternate(mut self, model: Arc<dyn LanguageModel>) -> Self {
        self.alternates.push(model);
        self
    }

    pub fn alternates(&self) -> &[Arc<dyn LanguageModel>] {
        &self.alternates
    }

    /// Whether an error should trigger fallback to the next model.
    fn is_fallback_trigger(e: &MimirError) -> bool {
        matches!(e, MimirError::ModelNotFound(_)) || e.is_transient()
    }

    fn record_fallback(from: &str, to: &dyn LanguageModel, error: &MimirError) {
        warn!(
            from = from,
            to = to.model_id(),
            provider = to.provider(),
            error = %error,
            "falling back to alternate model"
        );
        metrics::counter!(
            telemetry::FALLBACKS_TOTAL,
            "from" => from.to_string(),
            "to" => to.model_id().to_string()
        )
        .increment(1);
    }
}

#[async_trait]
impl Middleware for FallbackMiddleware {
    fn name(&self) -> &str {
        "fallback"
    }

    async fn wrap_generate(
        &self,
        options: CallOptions,
        next: Next<'_>,
    ) -> Result<GenerateResponse> {
        let mut from = next.model().model_id().to_string();
        let mut last_err = match next.generate(options.clone()).await {
            Ok(response) => return Ok(response),
            Err(e) if Self::is_fallback_trigger(&e) => e,
            Err(e) => return Err(e),
        };

        for model in &self.alternates {
            Self::record_fallback(&from, model.as_ref(), &last_err);
            match model.do_generate(&options).await {
                Ok(response) => return Ok(response),
                Err(e) if Self::is_fallback_trigger(&e) => {
                    from = model.model_id().to_string();
                    last_err = e;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err)
    }

    async fn wrap_stream(&self, options: CallOptions, next: Next<'_>) -> Result<StreamResponse> {
        let mut from = next.model().model_id().to_string();
        let mut last_err = match next.stream(options.clone()).await {
            Ok(response) => return Ok(response),
            Err(e) if Self::is_fallback_trigger(&e) => e,
            Err(e) => return Err(e),
        };

        for model in &self.alternates {
            Self::record_fallback(&from, model.as_ref(), &last_err);
            match model.do_stream(&options).await {
                Ok(response) => return Ok(response),
                Err(e) if Self::is_fallback_trigger(&e) => {
                    from = model.model_id().to_string();
                    last_err = e;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err)
    }
}
