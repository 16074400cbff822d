//! Whole-chain snapshot and restore.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::protocol::{ProtocolContext, StateEntry};
use crate::Result;
use crate::gateway::WrappedModel;
use crate::types::CallOptions;

/// States of every stateful link in a chain, in chain order.
///
/// Serializable, so a snapshot taken in one process can be restored in another
/// process whose chain registers the same ids in the same order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub states: Vec<StateEntry>,
}

impl StateSnapshot {
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

/// Drives state collection and restoration across a [`WrappedModel`]'s chain.
///
/// Both operations send one synthetic call through the chain with a
/// [`ProtocolContext`] attached. The context is initialised here, before the
/// first link sees the call; stateful links then append to or consume from it
/// in chain order, and the call never reaches the provider.
pub struct StateManager {
    model: Arc<WrappedModel>,
}

impl StateManager {
    pub fn new(model: Arc<WrappedModel>) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &Arc<WrappedModel> {
        &self.model
    }

    /// Collect the state of every stateful link.
    pub async fn snapshot(&self) -> Result<StateSnapshot> {
        let ctx = ProtocolContext::collect();
        self.model
            .generate_with_protocol(CallOptions::default(), &ctx)
            .await?;
        let states = ctx.take_entries();
        debug!(entries = states.len(), "collected middleware state");
        Ok(StateSnapshot {
            timestamp: Utc::now(),
            states,
        })
    }

    /// Hand each stateful link its entry from `snapshot`.
    ///
    /// Entries left over after the traversal (more entries than stateful
    /// links) are logged and discarded.
    pub async fn restore(&self, snapshot: &StateSnapshot) -> Result<()> {
        let ctx = ProtocolContext::restore(snapshot.states.iter().cloned());
        self.model
            .generate_with_protocol(CallOptions::default(), &ctx)
            .await?;
        let leftover = ctx.take_entries();
        if !leftover.is_empty() {
            warn!(
                leftover = leftover.len(),
                snapshot_time = %snapshot.timestamp,
                "snapshot has more entries than stateful middleware"
            );
        }
        Ok(())
    }
}
