//! Telemetry metric name constants.
//!
//! Centralised metric names for mimir middleware. Consumers install their
//! own `metrics` recorder (e.g. prometheus, statsd); without a recorder
//! installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `mimir_`. Counters end in `_total`.
//!
//! # Common labels
//!
//! - `operation`: call kind: "generate" or "stream"
//! - `source`: for stores: "fresh" (successful response) or "promotion"
//! - `stage`: for errors: "key", "lookup", "store", "jail"

/// Cache lookups answered from the store.
///
/// Labels: `operation`.
pub const CACHE_HITS_TOTAL: &str = "mimir_cache_hits_total";

/// Cache lookups that fell through to the provider.
///
/// Labels: `operation`.
pub const CACHE_MISSES_TOTAL: &str = "mimir_cache_misses_total";

/// Responses written to the main cache.
///
/// Labels: `source` ("fresh" | "promotion").
pub const CACHE_STORES_TOTAL: &str = "mimir_cache_stores_total";

/// Problematic responses recorded in the jail ledger.
pub const JAIL_UPDATES_TOTAL: &str = "mimir_jail_updates_total";

/// Jailed fingerprints that crossed the promotion threshold.
pub const JAIL_PROMOTIONS_TOTAL: &str = "mimir_jail_promotions_total";

/// Recovered cache-subsystem failures.
///
/// Labels: `stage`.
pub const CACHE_ERRORS_TOTAL: &str = "mimir_cache_errors_total";

/// State entries produced or consumed by the state protocol.
///
/// Labels: `mode` ("collect" | "restore").
pub const STATE_ENTRIES_TOTAL: &str = "mimir_state_entries_total";

/// Calls rejected by the quota middleware.
pub const QUOTA_REJECTIONS_TOTAL: &str = "mimir_quota_rejections_total";

/// Calls re-routed to an alternate model.
///
/// Labels: `from`, `to`.
pub const FALLBACKS_TOTAL: &str = "mimir_fallbacks_total";
