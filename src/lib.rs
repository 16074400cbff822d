//! Mimir - middleware for LLM generate/stream calls
//!
//! Wrap any [`LanguageModel`] in an ordered chain of [`Middleware`]:
//! response caching with a jail for suspicious answers, conversation memory,
//! token quotas and provider failover. Stateful middleware can have its state
//! snapshotted and restored across processes through the [`state`] protocol.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use mimir::cache::{CacheConfig, CacheMiddleware, MemoryStore};
//! use mimir::middleware::{HistoryConfig, HistoryMiddleware};
//! use mimir::state::StateManager;
//! use mimir::{CallOptions, LanguageModel, Message, Mimir};
//!
//! # async fn demo(provider: Arc<dyn LanguageModel>) -> mimir::Result<()> {
//! let cache = CacheMiddleware::new(Arc::new(MemoryStore::new()), CacheConfig::default())?;
//! let history = Arc::new(HistoryMiddleware::new(HistoryConfig::default()));
//!
//! let model = Arc::new(
//!     Mimir::wrap(provider)
//!         .stateful("history", history)
//!         .layer(Arc::new(cache))
//!         .build()?,
//! );
//!
//! let response = model
//!     .generate(CallOptions::new(vec![Message::user("What is the capital of France?")]))
//!     .await?;
//! println!("{}", response.text);
//!
//! // Capture the conversation, e.g. to resume it in another process.
//! let snapshot = StateManager::new(model.clone()).snapshot().await?;
//! println!("{}", serde_json::to_string(&snapshot)?);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod gateway;
pub mod middleware;
pub mod state;
pub mod telemetry;
pub mod traits;
pub mod types;

// Re-export main types at crate root
pub use config::Config;
pub use error::{MimirError, Result};
pub use gateway::{Mimir, MimirBuilder, WrappedModel};
pub use middleware::{Link, Middleware, Next};
pub use traits::LanguageModel;

pub use types::{
    CallOptions, CallWarning, FinishReason, GenerateResponse, Message, MessageContent,
    PartStream, ResponseMetadata, Role, StreamPart, StreamResponse, Usage,
};
