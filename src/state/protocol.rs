//! Protocol context carried alongside a state collection/restoration call.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Stable identifier of one stateful middleware slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MiddlewareId(String);

impl MiddlewareId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MiddlewareId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MiddlewareId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for MiddlewareId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// One middleware's serialized state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateEntry {
    pub middleware_id: MiddlewareId,
    pub state: Value,
}

impl StateEntry {
    pub fn new(middleware_id: impl Into<MiddlewareId>, state: Value) -> Self {
        Self {
            middleware_id: middleware_id.into(),
            state,
        }
    }
}

/// What a protocol call asks each stateful link to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolMode {
    /// Append `(id, state)` to the results, in chain order.
    Collect,
    /// Consume results from the head, in chain order.
    Restore,
}

impl ProtocolMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolMode::Collect => "collect",
            ProtocolMode::Restore => "restore",
        }
    }
}

#[derive(Debug)]
struct Bag {
    mode: ProtocolMode,
    results: VecDeque<StateEntry>,
}

/// Side channel threaded through a chain invocation during snapshot/restore.
///
/// Cheap to clone; clones share the same results queue. Results are appended
/// at the tail while collecting and taken from the head while restoring, so
/// entries are consumed in the order the chain produced them.
#[derive(Debug, Clone)]
pub struct ProtocolContext {
    bag: Arc<Mutex<Bag>>,
}

impl ProtocolContext {
    fn with(mode: ProtocolMode, results: VecDeque<StateEntry>) -> Self {
        Self {
            bag: Arc::new(Mutex::new(Bag { mode, results })),
        }
    }

    /// Context for a collection pass, with empty results.
    pub fn collect() -> Self {
        Self::with(ProtocolMode::Collect, VecDeque::new())
    }

    /// Context for a restoration pass, seeded with previously collected entries.
    pub fn restore(entries: impl IntoIterator<Item = StateEntry>) -> Self {
        Self::with(ProtocolMode::Restore, entries.into_iter().collect())
    }

    fn bag(&self) -> MutexGuard<'_, Bag> {
        // The bag holds plain data; a panic elsewhere cannot leave it half-updated.
        self.bag.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn mode(&self) -> ProtocolMode {
        self.bag().mode
    }

    /// Append an entry unless it repeats the trailing entry for the same id.
    ///
    /// Returns whether the entry was appended.
    pub fn push(&self, entry: StateEntry) -> bool {
        let mut bag = self.bag();
        if bag.results.back() == Some(&entry) {
            return false;
        }
        bag.results.push_back(entry);
        true
    }

    /// Take the next entry in chain order.
    pub fn pop(&self) -> Option<StateEntry> {
        self.bag().results.pop_front()
    }

    pub fn len(&self) -> usize {
        self.bag().results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drain all remaining entries in order.
    pub fn take_entries(&self) -> Vec<StateEntry> {
        self.bag().results.drain(..).collect()
    }
}
