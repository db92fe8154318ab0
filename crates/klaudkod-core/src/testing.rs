//! Scripted stand-ins for the LLM provider, for tests in this and
//! downstream crates (`features = ["test-util"]`).

use crate::error::AgentError;
use crate::provider::{ChatDelta, ChatProvider, ChatStream, ToolCallDelta};
use crate::types::{Message, ToolSchema};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// Replays one scripted turn per `stream_chat` call and records every
/// request it receives.
#[derive(Default)]
pub struct ScriptedProvider {
    turns: Mutex<VecDeque<Vec<Result<ChatDelta, AgentError>>>>,
    requests: Mutex<Vec<Vec<Message>>>,
    delay: Option<Duration>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long before each delta, so tests can act mid-stream.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue a turn made of the given deltas.
    pub fn turn(self, deltas: Vec<ChatDelta>) -> Self {
        self.turn_with_results(deltas.into_iter().map(Ok).collect())
    }

    /// Queue a turn that may include stream errors.
    pub fn turn_with_results(self, deltas: Vec<Result<ChatDelta, AgentError>>) -> Self {
        self.lock_turns().push_back(deltas);
        self
    }

    /// Queue a plain text turn split into the given chunks.
    pub fn text_turn(self, chunks: &[&str]) -> Self {
        let deltas = chunks.iter().map(|c| ChatDelta::text(*c)).collect();
        self.turn(deltas)
    }

    /// Queue a turn that requests a single tool call in one fragment.
    pub fn tool_turn(self, id: &str, name: &str, arguments: &str) -> Self {
        self.turn(vec![ChatDelta::tool_call(ToolCallDelta {
            index: 0,
            id: Some(id.to_string()),
            name: Some(name.to_string()),
            arguments: Some(arguments.to_string()),
        })])
    }

    /// Message lists received so far, one per model turn.
    pub fn requests(&self) -> Vec<Vec<Message>> {
        match self.requests.lock() {
            Ok(requests) => requests.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn lock_turns(&self) -> std::sync::MutexGuard<'_, VecDeque<Vec<Result<ChatDelta, AgentError>>>> {
        match self.turns.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream_chat(
        &self,
        messages: &[Message],
        _tools: &[ToolSchema],
    ) -> Result<ChatStream, AgentError> {
        match self.requests.lock() {
            Ok(mut requests) => requests.push(messages.to_vec()),
            Err(poisoned) => poisoned.into_inner().push(messages.to_vec()),
        }

        let turn = self
            .lock_turns()
            .pop_front()
            .ok_or_else(|| AgentError::Provider("script exhausted".into()))?;

        let delay = self.delay;
        Ok(futures::stream::iter(turn)
            .then(move |delta| async move {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                delta
            })
            .boxed())
    }
}
