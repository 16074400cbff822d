//! Tests for metrics integration.
//!
//! Uses `metrics_util::debugging::DebuggingRecorder` to capture and assert
//! on emitted metrics without needing a real exporter.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use metrics_util::MetricKind;
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use serde_json::{Value, json};

use mimir::cache::{CacheConfig, CacheMiddleware, MemoryStore};
use mimir::middleware::{FallbackMiddleware, MemoryUsageStore, QuotaConfig, QuotaMiddleware};
use mimir::state::{StateHooks, StateManager};
use mimir::telemetry;
use mimir::{
    CallOptions, FinishReason, GenerateResponse, LanguageModel, Message, Middleware, Mimir,
    MimirError, Result, StreamResponse, Usage,
};

// ============================================================================
// Mocks
// ============================================================================

struct FixedModel {
    id: &'static str,
    response: GenerateResponse,
}

#[async_trait]
impl LanguageModel for FixedModel {
    fn provider(&self) -> &str {
        "mock"
    }

    fn model_id(&self) -> &str {
        self.id
    }

    async fn do_generate(&self, _options: &CallOptions) -> Result<GenerateResponse> {
        Ok(self.response.clone())
    }

    async fn do_stream(&self, _options: &CallOptions) -> Result<StreamResponse> {
        Err(MimirError::NotImplemented("stream"))
    }
}

struct UnavailableModel;

#[async_trait]
impl LanguageModel for UnavailableModel {
    fn provider(&self) -> &str {
        "mock"
    }

    fn model_id(&self) -> &str {
        "primary"
    }

    async fn do_generate(&self, _options: &CallOptions) -> Result<GenerateResponse> {
        Err(MimirError::Api {
            status: 503,
            message: "overloaded".into(),
        })
    }

    async fn do_stream(&self, _options: &CallOptions) -> Result<StreamResponse> {
        Err(MimirError::NotImplemented("stream"))
    }
}

struct Marker;

impl Middleware for Marker {}

#[async_trait]
impl StateHooks for Marker {
    async fn serialize_state(&self) -> Result<Value> {
        Ok(json!({"marker": true}))
    }

    async fn deserialize_state(&self, _state: Value) -> Result<()> {
        Ok(())
    }
}

struct Unserializable;

impl Middleware for Unserializable {}

#[async_trait]
impl StateHooks for Unserializable {
    async fn serialize_state(&self) -> Result<Value> {
        Err(MimirError::InvalidInput("cannot serialize".into()))
    }

    async fn deserialize_state(&self, _state: Value) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// Snapshot type alias for readability
// ============================================================================

type SnapshotVec = Vec<(
    metrics_util::CompositeKey,
    Option<metrics::Unit>,
    Option<metrics::SharedString>,
    DebugValue,
)>;

// ============================================================================
// Helpers
// ============================================================================

/// Sum all counter values matching a given metric name.
fn counter_total(snapshot: &SnapshotVec, name: &str) -> u64 {
    snapshot
        .iter()
        .filter(|(key, _, _, _)| key.kind() == MetricKind::Counter && key.key().name() == name)
        .map(|(_, _, _, value)| match value {
            DebugValue::Counter(v) => *v,
            _ => 0,
        })
        .sum()
}

/// Sum counter values for `name` carrying the label `label = value`.
fn labelled_total(snapshot: &SnapshotVec, name: &str, label: &str, value: &str) -> u64 {
    snapshot
        .iter()
        .filter(|(key, _, _, _)| {
            key.kind() == MetricKind::Counter
                && key.key().name() == name
                && key
                    .key()
                    .labels()
                    .any(|l| l.key() == label && l.value() == value)
        })
        .map(|(_, _, _, value)| match value {
            DebugValue::Counter(v) => *v,
            _ => 0,
        })
        .sum()
}

/// Runs async code within a local recorder scope on the multi-thread runtime.
///
/// `block_in_place` ensures the sync `with_local_recorder` closure stays
/// on the current thread while `block_on` drives the inner async work.
fn recorded<F: Future>(fut: F) -> (F::Output, Snapshotter) {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    let output = metrics::with_local_recorder(&recorder, || {
        tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(fut))
    });
    (output, snapshotter)
}

fn options() -> CallOptions {
    CallOptions::new(vec![Message::user("metrics please")])
}

fn fixed(response: GenerateResponse) -> Arc<FixedModel> {
    Arc::new(FixedModel {
        id: "mock-model",
        response,
    })
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn cache_miss_then_hit_records_counters() {
    let (result, snapshotter) = recorded(async {
        let cache = CacheMiddleware::new(Arc::new(MemoryStore::new()), CacheConfig::default())?;
        let wrapped = Mimir::wrap(fixed(GenerateResponse::text("cached", FinishReason::Stop)))
            .layer(Arc::new(cache))
            .build()?;
        wrapped.generate(options()).await?;
        wrapped.generate(options()).await
    });
    assert_eq!(result.unwrap().text, "cached");

    let snapshot = snapshotter.snapshot().into_vec();
    assert_eq!(counter_total(&snapshot, telemetry::CACHE_MISSES_TOTAL), 1);
    assert_eq!(counter_total(&snapshot, telemetry::CACHE_HITS_TOTAL), 1);
    assert_eq!(
        labelled_total(&snapshot, telemetry::CACHE_HITS_TOTAL, "operation", "generate"),
        1
    );
    assert_eq!(
        labelled_total(&snapshot, telemetry::CACHE_STORES_TOTAL, "source", "fresh"),
        1
    );
    assert_eq!(counter_total(&snapshot, telemetry::JAIL_UPDATES_TOTAL), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn jail_promotion_records_counters() {
    let (result, snapshotter) = recorded(async {
        let cache = CacheMiddleware::new(
            Arc::new(MemoryStore::new()),
            CacheConfig::new().jail_threshold(2),
        )?;
        let filtered = GenerateResponse::text("partial", FinishReason::ContentFilter);
        let wrapped = Mimir::wrap(fixed(filtered))
            .layer(Arc::new(cache))
            .build()?;
        for _ in 0..3 {
            wrapped.generate(options()).await?;
        }
        Ok::<_, MimirError>(())
    });
    result.unwrap();

    let snapshot = snapshotter.snapshot().into_vec();
    // Calls one and two miss and get jailed; the second promotes; the third hits.
    assert_eq!(counter_total(&snapshot, telemetry::CACHE_MISSES_TOTAL), 2);
    assert_eq!(counter_total(&snapshot, telemetry::JAIL_UPDATES_TOTAL), 2);
    assert_eq!(counter_total(&snapshot, telemetry::JAIL_PROMOTIONS_TOTAL), 1);
    assert_eq!(
        labelled_total(&snapshot, telemetry::CACHE_STORES_TOTAL, "source", "promotion"),
        1
    );
    assert_eq!(counter_total(&snapshot, telemetry::CACHE_HITS_TOTAL), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn disabled_metrics_emit_nothing() {
    let (result, snapshotter) = recorded(async {
        let cache = CacheMiddleware::new(
            Arc::new(MemoryStore::new()),
            CacheConfig::new().enable_metrics(false),
        )?;
        let wrapped = Mimir::wrap(fixed(GenerateResponse::text("quiet", FinishReason::Stop)))
            .layer(Arc::new(cache))
            .build()?;
        wrapped.generate(options()).await?;
        wrapped.generate(options()).await
    });
    assert!(result.is_ok());

    let snapshot = snapshotter.snapshot().into_vec();
    assert_eq!(counter_total(&snapshot, telemetry::CACHE_MISSES_TOTAL), 0);
    assert_eq!(counter_total(&snapshot, telemetry::CACHE_HITS_TOTAL), 0);
    assert_eq!(counter_total(&snapshot, telemetry::CACHE_STORES_TOTAL), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn quota_rejection_records_counter() {
    let (result, snapshotter) = recorded(async {
        let usage = Arc::new(MemoryUsageStore::new());
        usage.set_limit("default", 10);
        let quota = QuotaMiddleware::new(usage, QuotaConfig::default());
        let response = GenerateResponse::text("spent", FinishReason::Stop)
            .with_usage(Usage::new(8, 4));
        let wrapped = Mimir::wrap(fixed(response))
            .layer(Arc::new(quota))
            .build()?;
        wrapped.generate(options()).await?;
        wrapped.generate(options()).await
    });
    assert!(matches!(result, Err(MimirError::QuotaExceeded { .. })));

    let snapshot = snapshotter.snapshot().into_vec();
    assert_eq!(counter_total(&snapshot, telemetry::QUOTA_REJECTIONS_TOTAL), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn fallback_records_counter_with_labels() {
    let (result, snapshotter) = recorded(async {
        let backup = Arc::new(FixedModel {
            id: "backup",
            response: GenerateResponse::text("from backup", FinishReason::Stop),
        });
        let fallback = FallbackMiddleware::new(Vec::new()).alternate(backup);
        let wrapped = Mimir::wrap(Arc::new(UnavailableModel))
            .layer(Arc::new(fallback))
            .build()?;
        wrapped.generate(options()).await
    });
    assert_eq!(result.unwrap().text, "from backup");

    let snapshot = snapshotter.snapshot().into_vec();
    assert_eq!(counter_total(&snapshot, telemetry::FALLBACKS_TOTAL), 1);
    assert_eq!(
        labelled_total(&snapshot, telemetry::FALLBACKS_TOTAL, "to", "backup"),
        1
    );
    assert_eq!(
        labelled_total(&snapshot, telemetry::FALLBACKS_TOTAL, "from", "primary"),
        1
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn state_protocol_records_entries_per_mode() {
    let (result, snapshotter) = recorded(async {
        let wrapped = Arc::new(
            Mimir::wrap(fixed(GenerateResponse::text("unused", FinishReason::Stop)))
                .stateful("one", Arc::new(Marker))
                .stateful("two", Arc::new(Marker))
                .build()?,
        );
        let manager = StateManager::new(wrapped);
        let snapshot = manager.snapshot().await?;
        manager.restore(&snapshot).await
    });
    result.unwrap();

    let snapshot = snapshotter.snapshot().into_vec();
    assert_eq!(
        labelled_total(&snapshot, telemetry::STATE_ENTRIES_TOTAL, "mode", "collect"),
        2
    );
    assert_eq!(
        labelled_total(&snapshot, telemetry::STATE_ENTRIES_TOTAL, "mode", "restore"),
        2
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn state_entries_count_only_appended_and_applied_states() {
    let (result, snapshotter) = recorded(async {
        let inner = Arc::new(
            Mimir::wrap(fixed(GenerateResponse::text("unused", FinishReason::Stop)))
                .stateful("one", Arc::new(Marker))
                .build()?,
        );
        // The inner "one" repeats the outer entry exactly and is not appended.
        let wrapped = Arc::new(
            Mimir::wrap(inner)
                .stateful("broken", Arc::new(Unserializable))
                .stateful("one", Arc::new(Marker))
                .build()?,
        );
        let manager = StateManager::new(wrapped);
        let snapshot = manager.snapshot().await?;
        manager.restore(&snapshot).await?;
        Ok::<_, MimirError>(snapshot.len())
    });
    // The failed serialize keeps its slot with a null state.
    assert_eq!(result.unwrap(), 2);

    let snapshot = snapshotter.snapshot().into_vec();
    assert_eq!(
        labelled_total(&snapshot, telemetry::STATE_ENTRIES_TOTAL, "mode", "collect"),
        1
    );
    assert_eq!(
        labelled_total(&snapshot, telemetry::STATE_ENTRIES_TOTAL, "mode", "restore"),
        1
    );
}
