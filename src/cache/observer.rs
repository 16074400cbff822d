//! Cache event sink.
//!
//! The caching middleware reports every hit, miss, store, jail update,
//! promotion and recovered error to a [`CacheObserver`]. Observer calls are
//! fire-and-forget: they are synchronous, never awaited, and a panicking
//! observer is caught so it cannot affect the call.

use std::panic::{AssertUnwindSafe, catch_unwind};

use tracing::warn;

use crate::telemetry;

/// Which main-cache write an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreSource {
    /// A successful response cached straight away.
    Fresh,
    /// A jailed response that crossed the threshold.
    Promotion,
}

impl StoreSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreSource::Fresh => "fresh",
            StoreSource::Promotion => "promotion",
        }
    }
}

/// Phase of the caching middleware a recovered error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorStage {
    Key,
    Lookup,
    Store,
    Jail,
}

impl ErrorStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorStage::Key => "key",
            ErrorStage::Lookup => "lookup",
            ErrorStage::Store => "store",
            ErrorStage::Jail => "jail",
        }
    }
}

/// Receives cache events. All methods default to doing nothing.
///
/// `operation` is `"generate"` or `"stream"`.
pub trait CacheObserver: Send + Sync {
    fn record_hit(&self, _key: &str, _operation: &'static str) {}
    fn record_miss(&self, _key: &str, _operation: &'static str) {}
    fn record_store(&self, _key: &str, _source: StoreSource) {}
    fn record_jail_update(&self, _key: &str, _count: u32) {}
    fn record_jail_promotion(&self, _key: &str, _count: u32) {}
    fn record_error(&self, _key: &str, _stage: ErrorStage, _error: &crate::MimirError) {}
}

/// Observer that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl CacheObserver for NoopObserver {}

/// Observer that increments `metrics` counters.
///
/// Without an installed recorder these are no-ops.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsObserver;

impl CacheObserver for MetricsObserver {
    fn record_hit(&self, _key: &str, operation: &'static str) {
        metrics::counter!(telemetry::CACHE_HITS_TOTAL, "operation" => operation).increment(1);
    }

    fn record_miss(&self, _key: &str, operation: &'static str) {
        metrics::counter!(telemetry::CACHE_MISSES_TOTAL, "operation" => operation).increment(1);
    }

    fn record_store(&self, _key: &str, source: StoreSource) {
        metrics::counter!(telemetry::CACHE_STORES_TOTAL, "source" => source.as_str())
            .increment(1);
    }

    fn record_jail_update(&self, _key: &str, _count: u32) {
        metrics::counter!(telemetry::JAIL_UPDATES_TOTAL).increment(1);
    }

    fn record_jail_promotion(&self, _key: &str, _count: u32) {
        metrics::counter!(telemetry::JAIL_PROMOTIONS_TOTAL).increment(1);
    }

    fn record_error(&self, _key: &str, stage: ErrorStage, _error: &crate::MimirError) {
        metrics::counter!(telemetry::CACHE_ERRORS_TOTAL, "stage" => stage.as_str()).increment(1);
    }
}

/// Run an observer callback, swallowing panics.
pub(crate) fn notify(f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        warn!("cache observer panicked; event dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Panicky;

    impl CacheObserver for Panicky {
        fn record_hit(&self, _key: &str, _operation: &'static str) {
            panic!("observer bug");
        }
    }

    #[test]
    fn panicking_observer_is_contained() {
        let obs = Panicky;
        notify(|| obs.record_hit("k", "generate"));
        notify(|| obs.record_miss("k", "generate"));
    }
}
