//! Key-value store abstraction behind the caching middleware.
//!
//! The middleware only needs three operations on string values, so any
//! external store (redis, memcached, a database table) can back it. Two
//! implementations ship with the crate:
//!
//! - [`MemoryStore`]: in-process moka cache with per-entry TTL. Suitable for
//!   a single process and for tests.
//! - `RedisStore` (feature `redis`): shared store for multiple processes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::Expiry;
use moka::future::Cache;

use crate::Result;

/// Minimal async key-value store with per-key expiry.
///
/// Implementations report failures as
/// [`MimirError::StoreUnavailable`](crate::MimirError::StoreUnavailable); the
/// caching middleware treats every store failure as a miss.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Backend name for logs and errors.
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write `value` under `key`, replacing any previous value, expiring after
    /// `ttl_secs` seconds.
    async fn set_with_ttl(&self, key: &str, ttl_secs: u64, value: &str) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;
}

#[derive(Clone)]
struct StoredValue {
    data: Arc<str>,
    ttl: Duration,
}

/// Expires every entry after its own TTL, restarted on overwrite.
struct PerEntryTtl;

impl Expiry<String, StoredValue> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &StoredValue,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &StoredValue,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Default maximum number of entries held by a [`MemoryStore`].
const DEFAULT_MEMORY_STORE_MAX: u64 = 10_000;

/// In-process [`CacheStore`] backed by moka.
///
/// Bounded (LRU-ish eviction beyond capacity). Entries are not shared across
/// processes.
pub struct MemoryStore {
    entries: Cache<String, StoredValue>,
}

impl MemoryStore {
    /// Create a store with the default capacity (10,000 entries).
    pub fn new() -> Self {
        Self::with_max_entries(DEFAULT_MEMORY_STORE_MAX)
    }

    pub fn with_max_entries(max: u64) -> Self {
        Self {
            entries: Cache::builder()
                .max_capacity(max)
                .expire_after(PerEntryTtl)
                .build(),
        }
    }

    /// Approximate number of live entries.
    pub async fn len(&self) -> u64 {
        self.entries.run_pending_tasks().await;
        self.entries.entry_count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Evict all entries.
    pub fn clear(&self) {
        self.entries.invalidate_all();
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).await.map(|v| v.data.to_string()))
    }

    async fn set_with_ttl(&self, key: &str, ttl_secs: u64, value: &str) -> Result<()> {
        let stored = StoredValue {
            data: Arc::from(value),
            ttl: Duration::from_secs(ttl_secs),
        };
        self.entries.insert(key.to_string(), stored).await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.invalidate(key).await;
        Ok(())
    }
}
