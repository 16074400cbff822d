//! Token budget enforcement.
//!
//! [`QuotaMiddleware`] rejects a call when its subject has already used up
//! its token limit, and records the tokens each completed call consumed.
//! Limits and usage live in a [`UsageStore`] owned by the application; limits
//! are cached locally for `limit_ttl_secs` and refreshed on expiry. Two calls
//! racing on an expired limit both fetch it; the writes are idempotent.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::{Middleware, Next};
use crate::state::StateHooks;
use crate::telemetry;
use crate::types::{CallOptions, GenerateResponse, PartStream, StreamPart, StreamResponse};
use crate::{MimirError, Result};

/// Source of token limits and usage counters.
#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Token limit for `subject`; `None` means unlimited.
    async fn limit(&self, subject: &str) -> Result<Option<u64>>;

    /// Tokens `subject` has used so far.
    async fn used(&self, subject: &str) -> Result<u64>;

    /// Add `tokens` to `subject`'s usage.
    async fn record(&self, subject: &str, tokens: u64) -> Result<()>;
}

/// In-process [`UsageStore`].
#[derive(Debug, Default)]
pub struct MemoryUsageStore {
    limits: Mutex<HashMap<String, u64>>,
    used: Mutex<HashMap<String, u64>>,
}

impl MemoryUsageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `subject`'s limit.
    pub fn set_limit(&self, subject: impl Into<String>, limit: u64) {
        lock(&self.limits).insert(subject.into(), limit);
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl UsageStore for MemoryUsageStore {
    async fn limit(&self, subject: &str) -> Result<Option<u64>> {
        Ok(lock(&self.limits).get(subject).copied())
    }

    async fn used(&self, subject: &str) -> Result<u64> {
        Ok(lock(&self.used).get(subject).copied().unwrap_or(0))
    }

    async fn record(&self, subject: &str, tokens: u64) -> Result<()> {
        let mut used = lock(&self.used);
        let total = used.entry(subject.to_string()).or_insert(0);
        *total = total.saturating_add(tokens);
        Ok(())
    }
}

/// Configuration for [`QuotaMiddleware`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    /// Subject charged when the call does not name one. Default: `"default"`.
    pub default_subject: String,
    /// Provider option holding a per-call subject. Default: `"quotaSubject"`.
    pub subject_option: String,
    /// How long a fetched limit is trusted, seconds. Default: 60.
    pub limit_ttl_secs: u64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            default_subject: "default".to_string(),
            subject_option: "quotaSubject".to_string(),
            limit_ttl_secs: 60,
        }
    }
}

impl QuotaConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn default_subject(mut self, subject: impl Into<String>) -> Self {
        self.default_subject = subject.into();
        self
    }

    pub fn subject_option(mut self, key: impl Into<String>) -> Self {
        self.subject_option = key.into();
        self
    }

    /// Must be positive; [`validate`](Self::validate) rejects 0.
    pub fn limit_ttl_secs(mut self, secs: u64) -> Self {
        self.limit_ttl_secs = secs;
        self
    }

    /// Reject settings the middleware cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.default_subject.is_empty() {
            return Err(MimirError::Configuration(
                "quota default subject must not be empty".into(),
            ));
        }
        if self.limit_ttl_secs == 0 {
            return Err(MimirError::Configuration(
                "quota limit TTL must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct QuotaState {
    consumed: HashMap<String, u64>,
}

/// Enforces per-subject token limits.
///
/// Stateful: its snapshot state is the tokens consumed through this instance,
/// per subject.
#[derive(Clone)]
pub struct QuotaMiddleware {
    store: Arc<dyn UsageStore>,
    config: QuotaConfig,
    limits: Cache<String, Option<u64>>,
    consumed: Arc<Mutex<HashMap<String, u64>>>,
}

impl QuotaMiddleware {
    pub fn new(store: Arc<dyn UsageStore>, config: QuotaConfig) -> Self {
        let limits = Cache::builder()
            .max_capacity(10_000)
            .time_to_live(Duration::from_secs(config.limit_ttl_secs.max(1)))
            .build();
        Self {
            store,
            config,
            limits,
            consumed: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Tokens consumed through this instance by `subject`.
    pub fn consumed(&self, subject: &str) -> u64 {
        lock(&self.consumed).get(subject).copied().unwrap_or(0)
    }

    fn subject(&self, options: &CallOptions) -> String {
        options
            .provider_options
            .get(&self.config.subject_option)
            .and_then(Value::as_str)
            .unwrap_or(&self.config.default_subject)
            .to_string()
    }

    async fn limit(&self, subject: &str) -> Result<Option<u64>> {
        if let Some(limit) = self.limits.get(subject).await {
            return Ok(limit);
        }
        let limit = self.store.limit(subject).await?;
        self.limits.insert(subject.to_string(), limit).await;
        Ok(limit)
    }

    /// Reject the call if `subject` has no budget left.
    async fn check(&self, subject: &str) -> Result<()> {
        let Some(limit) = self.limit(subject).await? else {
            return Ok(());
        };
        let used = self.store.used(subject).await?;
        if used >= limit {
            warn!(subject, used, limit, "token quota exceeded");
            metrics::counter!(telemetry::QUOTA_REJECTIONS_TOTAL).increment(1);
            return Err(MimirError::QuotaExceeded {
                subject: subject.to_string(),
                used,
                limit,
            });
        }
        Ok(())
    }

    /// Charge `tokens` to `subject`. A failed store write is logged; the
    /// call has already succeeded.
    async fn charge(&self, subject: &str, tokens: u64) {
        if tokens == 0 {
            return;
        }
        {
            let mut consumed = lock(&self.consumed);
            let total = consumed.entry(subject.to_string()).or_insert(0);
            *total = total.saturating_add(tokens);
        }
        match self.store.record(subject, tokens).await {
            Ok(()) => debug!(subject, tokens, "tokens recorded"),
            Err(e) => warn!(subject, tokens, error = %e, "failed to record token usage"),
        }
    }

    /// Charge usage once the stream's finish event passes through.
    fn metered(&self, subject: String, upstream: PartStream) -> PartStream {
        let quota = self.clone();
        Box::pin(upstream.then(move |part| {
            let quota = quota.clone();
            let subject = subject.clone();
            async move {
                if let Ok(StreamPart::Finish { usage, .. }) = &part {
                    quota.charge(&subject, usage.total_tokens()).await;
                }
                part
            }
        }))
    }
}

#[async_trait]
impl Middleware for QuotaMiddleware {
    fn name(&self) -> &str {
        "quota"
    }

    async fn wrap_generate(
        &self,
        options: CallOptions,
        next: Next<'_>,
    ) -> Result<GenerateResponse> {
        let subject = self.subject(&options);
        self.check(&subject).await?;
        let response = next.generate(options).await?;
        self.charge(&subject, response.usage.total_tokens()).await;
        Ok(response)
    }

    async fn wrap_stream(&self, options: CallOptions, next: Next<'_>) -> Result<StreamResponse> {
        let subject = self.subject(&options);
        self.check(&subject).await?;
        let response = next.stream(options).await?;
        Ok(response.map_stream(|upstream| self.metered(subject, upstream)))
    }
}

#[async_trait]
impl StateHooks for QuotaMiddleware {
    async fn serialize_state(&self) -> Result<Value> {
        let state = QuotaState {
            consumed: lock(&self.consumed).clone(),
        };
        Ok(serde_json::to_value(state)?)
    }

    async fn deserialize_state(&self, state: Value) -> Result<()> {
        let state: QuotaState = serde_json::from_value(state)?;
        *lock(&self.consumed) = state.consumed;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn memory_store_accumulates() {
        let store = MemoryUsageStore::new();
        store.set_limit("alice", 100);
        store.record("alice", 30).await.unwrap();
        store.record("alice", 12).await.unwrap();
        assert_eq!(store.used("alice").await.unwrap(), 42);
        assert_eq!(store.limit("alice").await.unwrap(), Some(100));
        assert_eq!(store.limit("bob").await.unwrap(), None);
    }

    #[test]
    fn subject_from_provider_options() {
        let quota = QuotaMiddleware::new(Arc::new(MemoryUsageStore::new()), QuotaConfig::new());
        let options = CallOptions::default().provider_option("quotaSubject", json!("alice"));
        assert_eq!(quota.subject(&options), "alice");
        assert_eq!(quota.subject(&CallOptions::default()), "default");
    }

    #[test]
    fn zero_limit_ttl_is_rejected() {
        assert!(QuotaConfig::new().validate().is_ok());
        assert!(matches!(
            QuotaConfig::new().limit_ttl_secs(0).validate(),
            Err(MimirError::Configuration(_))
        ));
        assert!(QuotaConfig::new().default_subject("").validate().is_err());
    }

    #[tokio::test]
    async fn state_round_trip() {
        let quota = QuotaMiddleware::new(Arc::new(MemoryUsageStore::new()), QuotaConfig::new());
        quota.charge("alice", 7).await;
        let state = quota.serialize_state().await.unwrap();
        assert_eq!(state, json!({"consumed": {"alice": 7}}));

        let other = QuotaMiddleware::new(Arc::new(MemoryUsageStore::new()), QuotaConfig::new());
        other.deserialize_state(state).await.unwrap();
        assert_eq!(other.consumed("alice"), 7);
    }

    #[tokio::test]
    async fn malformed_state_is_an_error() {
        let quota = QuotaMiddleware::new(Arc::new(MemoryUsageStore::new()), QuotaConfig::new());
        assert!(quota.deserialize_state(json!("nope")).await.is_err());
    }
}
