//! Response-caching middleware with jail/promotion.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{StreamExt, stream};
use tracing::{debug, warn};

use super::classify::{ResponseClass, classify};
use super::config::CacheConfig;
use super::jail::{JailEntry, JailLedger};
use super::key::{Fingerprint, fingerprint};
use super::observer::{
    CacheObserver, ErrorStage, MetricsObserver, NoopObserver, StoreSource, notify,
};
use super::replay::replay_stream;
use super::response::CachedResponse;
use super::store::CacheStore;
use crate::middleware::{Middleware, Next};
use crate::types::{
    CallOptions, FinishReason, GenerateResponse, PartStream, StreamPart, StreamResponse, Usage,
};
use crate::{MimirError, Result};

/// Caches complete responses keyed on a fingerprint of the call options and
/// model id.
///
/// - a hit answers the call from the store without invoking the model
///   (streams are replayed as chunked text deltas)
/// - a successful response is cached immediately
/// - a problematic response is jailed and only cached once the same
///   fingerprint has produced one [`CacheConfig::jail_threshold`] times
/// - error responses and provider errors are never cached
///
/// Caching is best-effort: every store, key or decoding failure is logged,
/// reported to the observer and otherwise ignored, so a call through this
/// middleware fails only if the model call itself fails.
///
/// ```rust,no_run
/// # use std::sync::Arc;
/// # use mimir::cache::{CacheConfig, CacheMiddleware, MemoryStore};
/// # fn demo(model: Arc<dyn mimir::LanguageModel>) -> mimir::Result<()> {
/// let cache = CacheMiddleware::new(Arc::new(MemoryStore::new()), CacheConfig::default())?;
/// let model = mimir::Mimir::wrap(model).layer(Arc::new(cache)).build()?;
/// # Ok(()) }
/// ```
pub struct CacheMiddleware {
    core: Arc<CacheCore>,
}

struct CacheCore {
    store: Arc<dyn CacheStore>,
    jail: JailLedger,
    config: CacheConfig,
    observer: Arc<dyn CacheObserver>,
}

/// Store key of a call, with the fingerprint it came from.
struct CallKey {
    fingerprint: Fingerprint,
    key: String,
}

const GENERATE: &str = "generate";
const STREAM: &str = "stream";

impl CacheMiddleware {
    /// Create the middleware. Fails if `config` does not validate.
    pub fn new(store: Arc<dyn CacheStore>, config: CacheConfig) -> Result<Self> {
        config.validate()?;
        let jail = JailLedger::new(
            store.clone(),
            config.jail_prefix.clone(),
            config.jail_ttl_secs,
            config.jail_threshold,
            config.jail_policy,
        );
        let observer: Arc<dyn CacheObserver> = if config.enable_metrics {
            Arc::new(MetricsObserver)
        } else {
            Arc::new(NoopObserver)
        };
        Ok(Self {
            core: Arc::new(CacheCore {
                store,
                jail,
                config,
                observer,
            }),
        })
    }

    /// Replace the default metrics observer.
    ///
    /// Events are only delivered while `enable_metrics` is on.
    pub fn with_observer(mut self, observer: Arc<dyn CacheObserver>) -> Self {
        if let Some(core) = Arc::get_mut(&mut self.core) {
            core.observer = observer;
        }
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.core.config
    }

    /// Main cache key for `options` against `model_id`.
    pub fn cache_key(&self, options: &CallOptions, model_id: &str) -> Result<String> {
        Ok(self.core.call_key(options, model_id)?.key)
    }

    /// Cached response for `options`, without calling any model.
    pub async fn lookup(
        &self,
        options: &CallOptions,
        model_id: &str,
    ) -> Result<Option<CachedResponse>> {
        let key = self.core.call_key(options, model_id)?;
        match self.core.store.get(&key.key).await? {
            Some(raw) => Ok(Some(CachedResponse::from_json(&raw)?)),
            None => Ok(None),
        }
    }

    /// Drop the cached response and jail entry for `options`.
    pub async fn invalidate(&self, options: &CallOptions, model_id: &str) -> Result<()> {
        let key = self.core.call_key(options, model_id)?;
        self.core.store.delete(&key.key).await?;
        self.core.jail.clear(&key.fingerprint).await
    }

    /// Jail entry for `options`, if the call has produced problematic
    /// responses recently.
    pub async fn jail_entry(
        &self,
        options: &CallOptions,
        model_id: &str,
    ) -> Result<Option<JailEntry>> {
        let key = self.core.call_key(options, model_id)?;
        self.core.jail.get(&key.fingerprint).await
    }
}

impl CacheCore {
    fn call_key(&self, options: &CallOptions, model_id: &str) -> Result<CallKey> {
        let fingerprint = fingerprint(&options.to_value()?, Some(model_id))?;
        let key = fingerprint.key(&self.config.prefix);
        Ok(CallKey { fingerprint, key })
    }

    /// Key for a live call, or `None` if the call cannot take part in caching.
    fn try_call_key(&self, options: &CallOptions, model_id: &str) -> Option<CallKey> {
        match self.call_key(options, model_id) {
            Ok(key) => Some(key),
            Err(e) => {
                self.recovered("", ErrorStage::Key, &e);
                None
            }
        }
    }

    fn log_key<'k>(&self, key: &'k str) -> &'k str {
        match key.char_indices().nth(self.config.max_key_log_length) {
            Some((idx, _)) => &key[..idx],
            None => key,
        }
    }

    fn observe(&self, f: impl FnOnce(&dyn CacheObserver)) {
        if self.config.enable_metrics {
            notify(|| f(self.observer.as_ref()));
        }
    }

    fn recovered(&self, key: &str, stage: ErrorStage, error: &MimirError) {
        warn!(
            key = self.log_key(key),
            stage = stage.as_str(),
            error = %error,
            "cache failure, continuing uncached"
        );
        self.observe(|o| o.record_error(key, stage, error));
    }

    /// Stored response for `key`. Any failure reads as a miss.
    async fn read(&self, key: &str, operation: &'static str) -> Option<CachedResponse> {
        let raw = match self.store.get(key).await {
            Ok(raw) => raw,
            Err(e) => {
                self.recovered(key, ErrorStage::Lookup, &e);
                return None;
            }
        };
        let hit = match raw.map(|r| CachedResponse::from_json(&r)).transpose() {
            Ok(hit) => hit,
            Err(e) => {
                self.recovered(key, ErrorStage::Lookup, &e);
                None
            }
        };
        match &hit {
            Some(_) => {
                if self.config.enable_logging {
                    debug!(key = self.log_key(key), operation, "cache hit");
                }
                self.observe(|o| o.record_hit(key, operation));
            }
            None => {
                if self.config.enable_logging {
                    debug!(key = self.log_key(key), operation, "cache miss");
                }
                self.observe(|o| o.record_miss(key, operation));
            }
        }
        hit
    }

    /// Classify a completed response and cache or jail it.
    async fn settle(&self, key: &CallKey, response: &CachedResponse) {
        match classify(response) {
            ResponseClass::Successful => self.write(key, response, StoreSource::Fresh).await,
            ResponseClass::Problematic => {
                let outcome = match self
                    .jail
                    .record_problematic(&key.fingerprint, response.summary())
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        self.recovered(&key.key, ErrorStage::Jail, &e);
                        return;
                    }
                };
                let count = outcome.entry.count;
                if self.config.enable_logging {
                    debug!(
                        key = self.log_key(&key.key),
                        count,
                        threshold = self.config.jail_threshold,
                        finish_reason = %response.finish_reason,
                        "problematic response jailed"
                    );
                }
                self.observe(|o| o.record_jail_update(&key.key, count));
                if outcome.promoted {
                    self.observe(|o| o.record_jail_promotion(&key.key, count));
                    self.write(key, response, StoreSource::Promotion).await;
                }
            }
            ResponseClass::ErrorOnly => {
                if self.config.enable_logging {
                    debug!(
                        key = self.log_key(&key.key),
                        finish_reason = %response.finish_reason,
                        "error response, not cached"
                    );
                }
            }
        }
    }

    async fn write(&self, key: &CallKey, response: &CachedResponse, source: StoreSource) {
        let result = match response.to_json() {
            Ok(raw) => {
                self.store
                    .set_with_ttl(&key.key, self.config.ttl_secs, &raw)
                    .await
            }
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {
                if self.config.enable_logging {
                    debug!(
                        key = self.log_key(&key.key),
                        source = source.as_str(),
                        ttl_secs = self.config.ttl_secs,
                        "response cached"
                    );
                }
                self.observe(|o| o.record_store(&key.key, source));
            }
            Err(e) => self.recovered(&key.key, ErrorStage::Store, &e),
        }
    }
}

/// Everything the end-of-stream flush needs, owned so the tapped stream can
/// be `'static`.
struct StreamTap {
    upstream: PartStream,
    core: Arc<CacheCore>,
    key: CallKey,
    template: CachedResponse,
    text: String,
    finish: Option<(FinishReason, Usage)>,
    failed: bool,
}

impl StreamTap {
    fn observe(&mut self, part: &Result<StreamPart>) {
        match part {
            Ok(StreamPart::TextDelta(delta)) => self.text.push_str(delta),
            Ok(StreamPart::Finish {
                finish_reason,
                usage,
            }) => self.finish = Some((*finish_reason, *usage)),
            Ok(StreamPart::Other(_)) => {}
            Err(_) => self.failed = true,
        }
    }

    async fn flush(self) {
        let logging = self.core.config.enable_logging;
        if self.failed {
            if logging {
                debug!(key = self.core.log_key(&self.key.key), "stream failed, not cached");
            }
            return;
        }
        let Some((finish_reason, usage)) = self.finish else {
            if logging {
                debug!(
                    key = self.core.log_key(&self.key.key),
                    "stream ended without a finish event, not cached"
                );
            }
            return;
        };
        let response = CachedResponse {
            text: self.text,
            finish_reason,
            usage,
            ..self.template
        };
        self.core.settle(&self.key, &response).await;
    }
}

/// Forward every part unchanged; once upstream ends, settle the assembled
/// response before ending the stream.
fn tapped(tap: StreamTap) -> PartStream {
    Box::pin(stream::unfold(tap, |mut tap| async move {
        match tap.upstream.next().await {
            Some(part) => {
                tap.observe(&part);
                Some((part, tap))
            }
            None => {
                tap.flush().await;
                None
            }
        }
    }))
}

#[async_trait]
impl Middleware for CacheMiddleware {
    fn name(&self) -> &str {
        "cache"
    }

    async fn wrap_generate(
        &self,
        options: CallOptions,
        next: Next<'_>,
    ) -> Result<GenerateResponse> {
        let core = &self.core;
        let Some(key) = core.try_call_key(&options, next.model().model_id()) else {
            return next.generate(options).await;
        };

        if let Some(hit) = core.read(&key.key, GENERATE).await {
            return Ok(hit.into());
        }

        let response = next.generate(options).await?;
        core.settle(&key, &CachedResponse::from(&response)).await;
        Ok(response)
    }

    async fn wrap_stream(&self, options: CallOptions, next: Next<'_>) -> Result<StreamResponse> {
        let core = &self.core;
        let Some(key) = core.try_call_key(&options, next.model().model_id()) else {
            return next.stream(options).await;
        };

        if let Some(hit) = core.read(&key.key, STREAM).await {
            let replay = replay_stream(
                &hit.text,
                core.config.stream_chunk_size,
                hit.finish_reason,
                hit.usage,
            );
            return Ok(StreamResponse {
                stream: replay,
                warnings: hit.warnings,
                raw_call: hit.raw_call,
                raw_response: hit.raw_response,
            });
        }

        let response = next.stream(options).await?;
        let template = CachedResponse {
            warnings: response.warnings.clone(),
            raw_call: response.raw_call.clone(),
            raw_response: response.raw_response.clone(),
            ..CachedResponse::default()
        };
        let core = self.core.clone();
        Ok(response.map_stream(move |upstream| {
            tapped(StreamTap {
                upstream,
                core,
                key,
                template,
                text: String::new(),
                finish: None,
                failed: false,
            })
        }))
    }
}
