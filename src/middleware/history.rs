//! Conversation memory.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures_util::{StreamExt, stream};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{Middleware, Next};
use crate::state::StateHooks;
use crate::types::{
    CallOptions, GenerateResponse, Message, PartStream, Role, StreamPart, StreamResponse,
};
use crate::{MimirError, Result};

/// Configuration for [`HistoryMiddleware`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Messages kept in memory; the oldest are dropped first. Default: 50.
    pub max_messages: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { max_messages: 50 }
    }
}

impl HistoryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_messages(mut self, n: usize) -> Self {
        self.max_messages = n;
        self
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct HistoryState {
    messages: Vec<Message>,
}

/// Remembers the conversation and replays it into every call.
///
/// Each call's prompt becomes: its system messages, then the remembered
/// transcript, then its remaining messages. After a successful call the
/// non-system messages of the call and the assistant's reply are appended to
/// the transcript. Failed calls leave the transcript untouched.
///
/// Stateful: its snapshot state is the transcript.
#[derive(Clone)]
pub struct HistoryMiddleware {
    config: HistoryConfig,
    transcript: Arc<Mutex<Vec<Message>>>,
}

impl HistoryMiddleware {
    pub fn new(config: HistoryConfig) -> Self {
        Self {
            config,
            transcript: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Current transcript, oldest first.
    pub fn transcript(&self) -> Vec<Message> {
        self.lock().clone()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Message>> {
        self.transcript
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Splice the transcript into `options`, returning the messages to
    /// remember if the call succeeds.
    fn prepare(&self, mut options: CallOptions) -> (CallOptions, Vec<Message>) {
        let (system, turn): (Vec<Message>, Vec<Message>) = options
            .prompt
            .into_iter()
            .partition(|m| m.role == Role::System);
        let remembered = self.transcript();

        let mut prompt = Vec::with_capacity(system.len() + remembered.len() + turn.len());
        prompt.extend(system);
        prompt.extend(remembered);
        prompt.extend(turn.iter().cloned());
        options.prompt = prompt;
        (options, turn)
    }

    fn commit(&self, mut turn: Vec<Message>, reply: &str) {
        if !reply.is_empty() {
            turn.push(Message::assistant(reply));
        }
        let mut transcript = self.lock();
        transcript.extend(turn);
        let excess = transcript.len().saturating_sub(self.config.max_messages);
        if excess > 0 {
            transcript.drain(..excess);
        }
        debug!(messages = transcript.len(), "conversation history updated");
    }

    /// Remember the streamed reply once the stream completes cleanly.
    fn recorded(&self, turn: Vec<Message>, upstream: PartStream) -> PartStream {
        let state = StreamRecord {
            history: self.clone(),
            upstream,
            turn,
            reply: String::new(),
            finished: false,
            failed: false,
        };
        Box::pin(stream::unfold(state, |mut rec| async move {
            match rec.upstream.next().await {
                Some(part) => {
                    match &part {
                        Ok(StreamPart::TextDelta(delta)) => rec.reply.push_str(delta),
                        Ok(StreamPart::Finish { .. }) => rec.finished = true,
                        Ok(StreamPart::Other(_)) => {}
                        Err(_) => rec.failed = true,
                    }
                    Some((part, rec))
                }
                None => {
                    if rec.finished && !rec.failed {
                        rec.history.commit(rec.turn, &rec.reply);
                    }
                    None
                }
            }
        }))
    }
}

struct StreamRecord {
    history: HistoryMiddleware,
    upstream: PartStream,
    turn: Vec<Message>,
    reply: String,
    finished: bool,
    failed: bool,
}

impl Default for HistoryMiddleware {
    fn default() -> Self {
        Self::new(HistoryConfig::default())
    }
}

#[async_trait]
impl Middleware for HistoryMiddleware {
    fn name(&self) -> &str {
        "history"
    }

    async fn wrap_generate(
        &self,
        options: CallOptions,
        next: Next<'_>,
    ) -> Result<GenerateResponse> {
        let (options, turn) = self.prepare(options);
        let response = next.generate(options).await?;
        self.commit(turn, &response.text);
        Ok(response)
    }

    async fn wrap_stream(&self, options: CallOptions, next: Next<'_>) -> Result<StreamResponse> {
        let (options, turn) = self.prepare(options);
        let response = next.stream(options).await?;
        Ok(response.map_stream(|upstream| self.recorded(turn, upstream)))
    }
}

#[async_trait]
impl StateHooks for HistoryMiddleware {
    async fn serialize_state(&self) -> Result<Value> {
        let state = HistoryState {
            messages: self.transcript(),
        };
        Ok(serde_json::to_value(state)?)
    }

    async fn deserialize_state(&self, state: Value) -> Result<()> {
        let state: HistoryState = serde_json::from_value(state)?;
        if state.messages.len() > self.config.max_messages {
            return Err(MimirError::InvalidInput(format!(
                "history snapshot has {} messages, limit is {}",
                state.messages.len(),
                self.config.max_messages
            )));
        }
        *self.lock() = state.messages;
        Ok(())
    }
}
