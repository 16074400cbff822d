//! Middleware state snapshot/restore protocol.
//!
//! Stateful middleware (conversation memory, quota counters, ...) can have its
//! internal state captured and later restored, possibly in another process.
//!
//! # Flow
//!
//! ```text
//! StateManager::snapshot()
//!     │  ProtocolContext { mode: Collect, results: [] }
//!     ▼
//! link 0 (Plain)      ── skipped
//! link 1 (Stateful a) ── results.push((a, state_a))
//! link 2 (Stateful b) ── results.push((b, state_b))
//! terminal            ── empty response, provider never called
//!     │
//!     ▼
//! StateSnapshot { timestamp, states: [(a, ..), (b, ..)] }
//! ```
//!
//! Restoration walks the same chain with `mode: Restore`, each stateful link
//! taking the head entry, checking its id and handing the state to its
//! [`StateHooks::deserialize_state`].

mod manager;
mod protocol;
mod stateful;

pub use manager::{StateManager, StateSnapshot};
pub use protocol::{MiddlewareId, ProtocolContext, ProtocolMode, StateEntry};
pub use stateful::{StateHooks, Stateful};
