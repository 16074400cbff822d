//! Stateful middleware wrapper.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::protocol::{MiddlewareId, ProtocolContext, ProtocolMode, StateEntry};
use crate::middleware::Middleware;
use crate::telemetry;
use crate::{MimirError, Result};

/// Serialize/deserialize hooks for middleware with internal state.
#[async_trait]
pub trait StateHooks: Send + Sync {
    /// Capture the current state as JSON.
    async fn serialize_state(&self) -> Result<Value>;

    /// Replace the current state with a previously captured one.
    async fn deserialize_state(&self, state: Value) -> Result<()>;
}

/// A middleware registered under a [`MiddlewareId`] so it takes part in the
/// state protocol.
///
/// On ordinary calls it behaves exactly like the wrapped middleware. On a
/// protocol call it skips the wrapped middleware's logic and instead appends
/// its state (collection) or consumes the next entry (restoration). Hook
/// failures and id mismatches are logged and skipped; they never abort the
/// traversal of the rest of the chain. A link whose state could not be
/// serialized still occupies its slot, as a `null` state that restoration
/// skips.
pub struct Stateful {
    id: MiddlewareId,
    middleware: Arc<dyn Middleware>,
    hooks: Option<Arc<dyn StateHooks>>,
}

impl Stateful {
    /// Wrap a middleware that has no state of its own.
    ///
    /// It still occupies a slot in snapshots, with an empty object as state.
    pub fn new(id: impl Into<MiddlewareId>, middleware: Arc<dyn Middleware>) -> Self {
        Self {
            id: id.into(),
            middleware,
            hooks: None,
        }
    }

    /// Wrap a middleware that also implements [`StateHooks`].
    pub fn with_hooks<M>(id: impl Into<MiddlewareId>, middleware: Arc<M>) -> Self
    where
        M: Middleware + StateHooks + 'static,
    {
        let hooks: Arc<dyn StateHooks> = middleware.clone();
        Self {
            id: id.into(),
            middleware,
            hooks: Some(hooks),
        }
    }

    pub fn id(&self) -> &MiddlewareId {
        &self.id
    }

    pub fn middleware(&self) -> &Arc<dyn Middleware> {
        &self.middleware
    }

    pub(crate) async fn handle_protocol(&self, ctx: &ProtocolContext) {
        let mode = ctx.mode();
        let outcome = match mode {
            ProtocolMode::Collect => self.collect(ctx).await,
            ProtocolMode::Restore => self.restore(ctx).await,
        };
        match outcome {
            Ok(true) => {
                metrics::counter!(telemetry::STATE_ENTRIES_TOTAL, "mode" => mode.as_str())
                    .increment(1);
            }
            Ok(false) => {}
            Err(e) => {
                warn!(
                    middleware_id = %self.id,
                    mode = mode.as_str(),
                    error = %e,
                    "skipping middleware state"
                );
            }
        }
    }

    /// Append this link's state. Returns whether an entry was appended.
    ///
    /// A failed serialize still leaves a `null` entry behind so that the
    /// links after this one consume their own entries on restore.
    async fn collect(&self, ctx: &ProtocolContext) -> Result<bool> {
        let state = match &self.hooks {
            Some(hooks) => match hooks.serialize_state().await {
                Ok(state) => state,
                Err(e) => {
                    ctx.push(StateEntry::new(self.id.clone(), Value::Null));
                    return Err(self.hook_error(e));
                }
            },
            None => Value::Object(Map::new()),
        };
        let appended = ctx.push(StateEntry::new(self.id.clone(), state));
        if !appended {
            debug!(middleware_id = %self.id, "state unchanged since last entry, not repeated");
        }
        Ok(appended)
    }

    /// Consume the head entry. Returns whether a state was handed to the hooks.
    async fn restore(&self, ctx: &ProtocolContext) -> Result<bool> {
        let entry = ctx.pop().ok_or(MimirError::MissingProtocolResults)?;
        if entry.middleware_id != self.id {
            return Err(MimirError::ProtocolMismatch {
                expected: self.id.to_string(),
                found: entry.middleware_id.to_string(),
            });
        }
        match (&self.hooks, entry.state) {
            (_, Value::Null) => {
                debug!(middleware_id = %self.id, "no state was captured for this slot");
                Ok(false)
            }
            (Some(hooks), state) => {
                hooks
                    .deserialize_state(state)
                    .await
                    .map_err(|e| self.hook_error(e))?;
                Ok(true)
            }
            (None, _) => Ok(true),
        }
    }

    fn hook_error(&self, e: MimirError) -> MimirError {
        match e {
            e @ MimirError::StateSerialization { .. } => e,
            other => MimirError::StateSerialization {
                middleware_id: self.id.to_string(),
                message: other.to_string(),
            },
        }
    }
}
