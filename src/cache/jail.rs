//! Jail ledger for problematic responses.
//!
//! A problematic response (filtered, `other` finish, or carrying warnings) is
//! not cached straight away. Each occurrence bumps a counter under
//! `jail_prefix:fingerprint`; once the counter reaches the threshold the
//! response is promoted into the main cache.
//!
//! The update is a plain read-modify-write. Concurrent problematic responses
//! for the same fingerprint can under-count; no lock is taken.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::config::JailPolicy;
use super::key::Fingerprint;
use super::response::ResponseSummary;
use super::store::CacheStore;
use crate::Result;

/// Per-fingerprint occurrence record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JailEntry {
    pub count: u32,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub first_seen: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_seen: DateTime<Utc>,
    pub last_response: ResponseSummary,
}

impl JailEntry {
    fn first(now: DateTime<Utc>) -> Self {
        Self {
            count: 0,
            first_seen: now,
            last_seen: now,
            last_response: ResponseSummary::default(),
        }
    }
}

/// Outcome of recording one problematic occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JailOutcome {
    pub entry: JailEntry,
    /// The count reached the threshold; the caller should write the response
    /// to the main cache.
    pub promoted: bool,
}

/// Reads and updates jail entries in a [`CacheStore`].
pub struct JailLedger {
    store: Arc<dyn CacheStore>,
    prefix: String,
    ttl_secs: u64,
    threshold: u32,
    policy: JailPolicy,
}

impl JailLedger {
    pub fn new(
        store: Arc<dyn CacheStore>,
        prefix: impl Into<String>,
        ttl_secs: u64,
        threshold: u32,
        policy: JailPolicy,
    ) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            ttl_secs,
            threshold,
            policy,
        }
    }

    pub fn key(&self, fingerprint: &Fingerprint) -> String {
        fingerprint.key(&self.prefix)
    }

    /// Current entry for `fingerprint`, if any.
    ///
    /// An unreadable entry is reported as absent.
    pub async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<JailEntry>> {
        let key = self.key(fingerprint);
        let Some(raw) = self.store.get(&key).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                warn!(key = %key, error = %e, "discarding unreadable jail entry");
                Ok(None)
            }
        }
    }

    /// Count one problematic occurrence of `fingerprint`.
    ///
    /// The entry's TTL restarts on every occurrence (sliding window). Under
    /// [`JailPolicy::ResetOnPromotion`] a promoting occurrence deletes the
    /// entry instead of writing it back.
    pub async fn record_problematic(
        &self,
        fingerprint: &Fingerprint,
        summary: ResponseSummary,
    ) -> Result<JailOutcome> {
        let key = self.key(fingerprint);
        let now = Utc::now();

        let mut entry = self
            .get(fingerprint)
            .await?
            .unwrap_or_else(|| JailEntry::first(now));
        entry.count = entry.count.saturating_add(1);
        entry.last_seen = now;
        entry.last_response = summary;

        let promoted = entry.count >= self.threshold;
        if promoted && self.policy == JailPolicy::ResetOnPromotion {
            self.store.delete(&key).await?;
        } else {
            let raw = serde_json::to_string(&entry)?;
            self.store.set_with_ttl(&key, self.ttl_secs, &raw).await?;
        }

        Ok(JailOutcome { entry, promoted })
    }

    /// Drop the entry for `fingerprint`.
    pub async fn clear(&self, fingerprint: &Fingerprint) -> Result<()> {
        self.store.delete(&self.key(fingerprint)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::key::fingerprint;
    use crate::cache::store::MemoryStore;
    use crate::types::FinishReason;
    use serde_json::json;

    fn ledger(store: Arc<MemoryStore>, threshold: u32, policy: JailPolicy) -> JailLedger {
        JailLedger::new(store, "jail", 60, threshold, policy)
    }

    fn summary() -> ResponseSummary {
        ResponseSummary {
            finish_reason: FinishReason::ContentFilter,
            has_warnings: false,
            text_length: 4,
        }
    }

    #[tokio::test]
    async fn promotes_on_threshold_occurrence() {
        let store = Arc::new(MemoryStore::new());
        let jail = ledger(store, 3, JailPolicy::Accumulate);
        let fp = fingerprint(&json!({"prompt": "x"}), None).unwrap();

        let first = jail.record_problematic(&fp, summary()).await.unwrap();
        assert_eq!((first.entry.count, first.promoted), (1, false));
        let second = jail.record_problematic(&fp, summary()).await.unwrap();
        assert_eq!((second.entry.count, second.promoted), (2, false));
        let third = jail.record_problematic(&fp, summary()).await.unwrap();
        assert_eq!((third.entry.count, third.promoted), (3, true));

        assert_eq!(third.entry.first_seen, first.entry.first_seen);
        assert!(third.entry.last_seen >= first.entry.last_seen);
        assert_eq!(third.entry.last_response, summary());
    }

    #[tokio::test]
    async fn accumulate_keeps_counting_after_promotion() {
        let store = Arc::new(MemoryStore::new());
        let jail = ledger(store, 2, JailPolicy::Accumulate);
        let fp = fingerprint(&json!({"prompt": "x"}), None).unwrap();

        for _ in 0..2 {
            jail.record_problematic(&fp, summary()).await.unwrap();
        }
        let again = jail.record_problematic(&fp, summary()).await.unwrap();
        assert_eq!(again.entry.count, 3);
        assert!(again.promoted);
    }

    #[tokio::test]
    async fn reset_on_promotion_starts_over() {
        let store = Arc::new(MemoryStore::new());
        let jail = ledger(store, 2, JailPolicy::ResetOnPromotion);
        let fp = fingerprint(&json!({"prompt": "x"}), None).unwrap();

        jail.record_problematic(&fp, summary()).await.unwrap();
        let promoted = jail.record_problematic(&fp, summary()).await.unwrap();
        assert!(promoted.promoted);
        assert_eq!(jail.get(&fp).await.unwrap(), None);

        let fresh = jail.record_problematic(&fp, summary()).await.unwrap();
        assert_eq!((fresh.entry.count, fresh.promoted), (1, false));
    }

    #[tokio::test]
    async fn threshold_one_promotes_immediately() {
        let store = Arc::new(MemoryStore::new());
        let jail = ledger(store, 1, JailPolicy::Accumulate);
        let fp = fingerprint(&json!({"prompt": "x"}), None).unwrap();
        assert!(jail.record_problematic(&fp, summary()).await.unwrap().promoted);
    }

    #[tokio::test]
    async fn unreadable_entry_restarts_count() {
        let store = Arc::new(MemoryStore::new());
        let jail = ledger(store.clone(), 3, JailPolicy::Accumulate);
        let fp = fingerprint(&json!({"prompt": "x"}), None).unwrap();
        store
            .set_with_ttl(&jail.key(&fp), 60, "not json")
            .await
            .unwrap();

        let outcome = jail.record_problematic(&fp, summary()).await.unwrap();
        assert_eq!(outcome.entry.count, 1);
    }

    #[test]
    fn entry_json_shape() {
        let now = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();
        let entry = JailEntry {
            count: 2,
            first_seen: now,
            last_seen: now,
            last_response: summary(),
        };
        let v = serde_json::to_value(&entry).unwrap();
        assert_eq!(
            v,
            json!({
                "count": 2,
                "firstSeen": 1_700_000_000_000_i64,
                "lastSeen": 1_700_000_000_000_i64,
                "lastResponse": {
                    "finishReason": "content-filter",
                    "hasWarnings": false,
                    "textLength": 4
                }
            })
        );
    }
}
