//! Response caching with a jail for suspicious answers.
//!
//! [`CacheMiddleware`] sits in a chain like any other middleware. For every
//! call it derives a [`Fingerprint`] from the call options and model id and
//! consults a [`CacheStore`]:
//!
//! ```text
//!            ┌── hit ──► stored response (stream: chunked replay)
//! lookup ────┤
//!            └── miss ─► model ─► classify ─┬─ successful ─► cache
//!                                           ├─ problematic ─► jail ─(count ≥ threshold)─► cache
//!                                           └─ error ───────► nothing
//! ```
//!
//! Streams are forwarded to the caller as they arrive; classification and
//! the cache/jail write happen once the stream has ended.
//!
//! All cache state lives in the store as JSON text, so a shared store (see
//! `RedisStore`, feature `redis`) gives every process the same cache.

mod classify;
mod config;
mod jail;
mod key;
mod middleware;
mod observer;
#[cfg(feature = "redis")]
mod redis_store;
mod replay;
mod response;
mod store;

pub use classify::{ResponseClass, classify};
pub use config::{CacheConfig, JailPolicy};
pub use jail::{JailEntry, JailLedger, JailOutcome};
pub use key::{Fingerprint, UNKNOWN_MODEL, fingerprint};
pub use middleware::CacheMiddleware;
pub use observer::{CacheObserver, ErrorStage, MetricsObserver, NoopObserver, StoreSource};
#[cfg(feature = "redis")]
pub use redis_store::RedisStore;
pub use replay::replay_stream;
pub use response::{CachedResponse, ResponseSummary};
pub use store::{CacheStore, MemoryStore};
