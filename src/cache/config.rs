//! Caching middleware configuration.

use serde::{Deserialize, Serialize};

use crate::{MimirError, Result};

/// What happens to a jail entry once its fingerprint is promoted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JailPolicy {
    /// Keep counting. Later occurrences rewrite the main cache entry.
    #[default]
    Accumulate,
    /// Delete the jail entry on promotion so the next problematic response
    /// starts a fresh count.
    ResetOnPromotion,
}

/// Configuration for [`CacheMiddleware`](super::CacheMiddleware).
///
/// ```rust
/// # use mimir::cache::CacheConfig;
/// let config = CacheConfig::new()
///     .prefix("chat-cache")
///     .ttl_secs(600)
///     .jail_threshold(5);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Namespace of main cache keys. Default: `"ai-cache"`.
    pub prefix: String,
    /// Namespace of jail keys. Default: `"ai-jail"`.
    pub jail_prefix: String,
    /// Lifetime of a cached response, seconds. Default: 3600.
    pub ttl_secs: u64,
    /// Sliding lifetime of a jail entry, seconds. Default: 1800.
    pub jail_ttl_secs: u64,
    /// Problematic occurrences needed before a response is cached. Default: 3.
    pub jail_threshold: u32,
    /// Characters per replayed text delta. Default: 10.
    pub stream_chunk_size: usize,
    /// Emit hit/miss/store debug events. Default: true.
    pub enable_logging: bool,
    /// Emit `metrics` counters. Default: true.
    pub enable_metrics: bool,
    /// Keys are truncated to this many characters in log output. Default: 32.
    pub max_key_log_length: usize,
    pub jail_policy: JailPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            prefix: "ai-cache".to_string(),
            jail_prefix: "ai-jail".to_string(),
            ttl_secs: 3600,
            jail_ttl_secs: 1800,
            jail_threshold: 3,
            stream_chunk_size: 10,
            enable_logging: true,
            enable_metrics: true,
            max_key_log_length: 32,
            jail_policy: JailPolicy::Accumulate,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn jail_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.jail_prefix = prefix.into();
        self
    }

    pub fn ttl_secs(mut self, secs: u64) -> Self {
        self.ttl_secs = secs;
        self
    }

    pub fn jail_ttl_secs(mut self, secs: u64) -> Self {
        self.jail_ttl_secs = secs;
        self
    }

    pub fn jail_threshold(mut self, n: u32) -> Self {
        self.jail_threshold = n;
        self
    }

    pub fn stream_chunk_size(mut self, n: usize) -> Self {
        self.stream_chunk_size = n;
        self
    }

    pub fn enable_logging(mut self, on: bool) -> Self {
        self.enable_logging = on;
        self
    }

    pub fn enable_metrics(mut self, on: bool) -> Self {
        self.enable_metrics = on;
        self
    }

    pub fn max_key_log_length(mut self, n: usize) -> Self {
        self.max_key_log_length = n;
        self
    }

    pub fn jail_policy(mut self, policy: JailPolicy) -> Self {
        self.jail_policy = policy;
        self
    }

    /// Reject settings the middleware cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.prefix.is_empty() || self.jail_prefix.is_empty() {
            return Err(MimirError::Configuration(
                "cache prefixes must not be empty".into(),
            ));
        }
        if self.prefix == self.jail_prefix {
            return Err(MimirError::Configuration(format!(
                "cache prefix and jail prefix must differ (both '{}')",
                self.prefix
            )));
        }
        if self.ttl_secs == 0 || self.jail_ttl_secs == 0 {
            return Err(MimirError::Configuration("cache TTLs must be positive".into()));
        }
        if self.jail_threshold == 0 {
            return Err(MimirError::Configuration(
                "jail threshold must be at least 1".into(),
            ));
        }
        if self.stream_chunk_size == 0 {
            return Err(MimirError::Configuration(
                "stream chunk size must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = CacheConfig::default();
        assert_eq!(c.prefix, "ai-cache");
        assert_eq!(c.jail_prefix, "ai-jail");
        assert_eq!(c.ttl_secs, 3600);
        assert_eq!(c.jail_ttl_secs, 1800);
        assert_eq!(c.jail_threshold, 3);
        assert_eq!(c.stream_chunk_size, 10);
        assert_eq!(c.max_key_log_length, 32);
        assert_eq!(c.jail_policy, JailPolicy::Accumulate);
        assert!(c.enable_logging && c.enable_metrics);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn rejects_bad_values() {
        assert!(CacheConfig::new().jail_threshold(0).validate().is_err());
        assert!(CacheConfig::new().stream_chunk_size(0).validate().is_err());
        assert!(CacheConfig::new().ttl_secs(0).validate().is_err());
        assert!(CacheConfig::new().prefix("").validate().is_err());
        assert!(CacheConfig::new().prefix("x").jail_prefix("x").validate().is_err());
    }

    #[test]
    fn partial_deserialize_fills_defaults() {
        let c: CacheConfig =
            serde_json::from_str(r#"{"ttl_secs": 60, "jail_policy": "reset_on_promotion"}"#)
                .unwrap();
        assert_eq!(c.ttl_secs, 60);
        assert_eq!(c.jail_policy, JailPolicy::ResetOnPromotion);
        assert_eq!(c.prefix, "ai-cache");
    }
}
