//! Mimir error types

use std::time::Duration;

/// Mimir error types
#[derive(Debug, thiserror::Error)]
pub enum MimirError {
    // Provider/network errors
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("model not found: {0}")]
    ModelNotFound(String),

    // Streaming errors
    #[error("stream error: {0}")]
    Stream(String),

    #[error("empty response from model")]
    EmptyResponse,

    // Data errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    // Configuration errors
    #[error("no provider configured")]
    NoProvider,

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("operation not implemented: {0}")]
    NotImplemented(&'static str),

    // Cache subsystem errors. Always recovered inside the caching middleware.
    /// Request parameters canonicalized to nothing usable.
    #[error("cannot derive cache key: {0}")]
    InvalidKey(String),

    #[error("cache store '{backend}' unavailable: {message}")]
    StoreUnavailable {
        backend: &'static str,
        message: String,
    },

    // State protocol errors. Recovered per middleware during collection/restoration.
    #[error("state entry mismatch: expected '{expected}', found '{found}'")]
    ProtocolMismatch { expected: String, found: String },

    #[error("no state entries left to restore")]
    MissingProtocolResults,

    #[error("state hook failed for '{middleware_id}': {message}")]
    StateSerialization {
        middleware_id: String,
        message: String,
    },

    // Quota errors
    #[error("token quota exceeded for '{subject}': {used}/{limit}")]
    QuotaExceeded {
        subject: String,
        used: u64,
        limit: u64,
    },
}

impl MimirError {
    /// Whether retrying the same request (or a sibling provider) may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            MimirError::RateLimited { .. }
            | MimirError::Http(_)
            | MimirError::Stream(_)
            | MimirError::EmptyResponse => true,
            MimirError::Api { status, .. } => matches!(status, 500 | 502 | 503 | 504),
            _ => false,
        }
    }

    /// Provider-supplied backoff hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            MimirError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Errors raised by the caching subsystem itself.
    ///
    /// These never reach a caller through [`CacheMiddleware`](crate::cache::CacheMiddleware);
    /// they are logged and the call proceeds uncached.
    pub fn is_cache_failure(&self) -> bool {
        matches!(
            self,
            MimirError::InvalidKey(_) | MimirError::StoreUnavailable { .. } | MimirError::Json(_)
        )
    }
}

/// Result type alias for Mimir operations
pub type Result<T> = std::result::Result<T, MimirError>;
