use crate::error::AgentError;
use crate::provider::{ChatProvider, ToolCallDelta};
use crate::tool_registry::{ToolContext, ToolExecutor};
use crate::types::{Message, StreamEvent, ToolCall, ToolSchema};

use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// Buffer between the loop task and whoever drains its events.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// A running agentic loop.
pub struct AgentRun {
    /// Ordered events, terminated by exactly one `Done` or `Error`.
    pub events: mpsc::Receiver<StreamEvent>,
    /// Resolves to the conversation as the loop left it: the input messages
    /// followed by every assistant turn and tool result it produced.
    pub transcript: JoinHandle<Vec<Message>>,
}

/// Streams model output and drives tool calls to completion.
pub struct LlmClient {
    provider: Arc<dyn ChatProvider>,
    max_tool_iterations: usize,
}

impl LlmClient {
    pub fn new(provider: Arc<dyn ChatProvider>, max_tool_iterations: usize) -> Self {
        Self {
            provider,
            max_tool_iterations: max_tool_iterations.max(1),
        }
    }

    /// One-shot streaming without tools.
    pub fn stream(&self, cancel: CancellationToken, messages: Vec<Message>) -> mpsc::Receiver<StreamEvent> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let provider = self.provider.clone();

        tokio::spawn(async move {
            let terminal = match stream_turn(provider.as_ref(), &messages, &[], &cancel, &tx).await {
                Ok(_) => StreamEvent::Done,
                Err(failure) => StreamEvent::Error(failure.error.to_string()),
            };
            let _ = tx.send(terminal).await;
        });

        rx
    }

    /// Run the agentic loop: stream a model turn, execute the tools it asks
    /// for, feed the results back, and repeat until a turn has no tool calls.
    pub fn stream_with_tools(
        &self,
        ctx: ToolContext,
        messages: Vec<Message>,
        schemas: Vec<ToolSchema>,
        executor: Arc<dyn ToolExecutor>,
    ) -> AgentRun {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let provider = self.provider.clone();
        let max_tool_iterations = self.max_tool_iterations;

        let transcript = tokio::spawn(async move {
            let mut history = messages;
            let outcome = run_tool_loop(
                provider.as_ref(),
                &ctx,
                &mut history,
                &schemas,
                executor.as_ref(),
                max_tool_iterations,
                &tx,
            )
            .await;

            let terminal = match outcome {
                Ok(()) => StreamEvent::Done,
                Err(e) => {
                    warn!(session_id = %ctx.session_id, "Agent loop ended with error: {}", e);
                    StreamEvent::Error(e.to_string())
                }
            };
            let _ = tx.send(terminal).await;
            history
        });

        AgentRun {
            events: rx,
            transcript,
        }
    }
}

async fn run_tool_loop(
    provider: &dyn ChatProvider,
    ctx: &ToolContext,
    history: &mut Vec<Message>,
    schemas: &[ToolSchema],
    executor: &dyn ToolExecutor,
    max_tool_iterations: usize,
    tx: &mpsc::Sender<StreamEvent>,
) -> Result<(), AgentError> {
    let mut tool_turns = 0;

    loop {
        debug!(session_id = %ctx.session_id, turn = tool_turns + 1, "Agent loop iteration");

        let turn = match stream_turn(provider, history, schemas, &ctx.cancel, tx).await {
            Ok(turn) => turn,
            Err(TurnFailure { partial, error }) => {
                // Keep what the user already saw; drop half-streamed tool calls.
                if !partial.is_empty() {
                    history.push(Message::assistant(partial));
                }
                return Err(error);
            }
        };

        if turn.tool_calls.is_empty() {
            if !turn.content.is_empty() {
                history.push(Message::assistant(turn.content));
            }
            return Ok(());
        }

        let calls = turn.tool_calls;
        history.push(Message::assistant_with_tool_calls(turn.content, calls.clone()));

        for (i, call) in calls.iter().enumerate() {
            if ctx.cancel.is_cancelled() || tx.send(StreamEvent::ToolCall(call.clone())).await.is_err() {
                answer_unrun(history, &calls[i..]);
                return Err(AgentError::Cancelled);
            }

            debug!(session_id = %ctx.session_id, tool = %call.name, id = %call.id, "Executing tool call");
            let result = executor.execute(ctx, &call.name, &call.arguments).await;
            history.push(Message::tool_result(&call.id, &result.content));

            let event = StreamEvent::ToolResult {
                tool_call_id: call.id.clone(),
                content: result.content,
                is_error: result.is_error,
            };
            if tx.send(event).await.is_err() {
                answer_unrun(history, &calls[i + 1..]);
                return Err(AgentError::Cancelled);
            }
        }

        tool_turns += 1;
        if tool_turns >= max_tool_iterations {
            warn!(session_id = %ctx.session_id, "Hit max tool iterations ({})", max_tool_iterations);
            return Err(AgentError::IterationLimit(max_tool_iterations));
        }
    }
}

/// Every assistant tool call must be answered before the next turn.
fn answer_unrun(history: &mut Vec<Message>, calls: &[ToolCall]) {
    for call in calls {
        history.push(Message::tool_result(&call.id, "Error: request cancelled"));
    }
}

struct Turn {
    content: String,
    tool_calls: Vec<ToolCall>,
}

struct TurnFailure {
    /// Text already streamed to the caller before the failure.
    partial: String,
    error: AgentError,
}

impl TurnFailure {
    fn new(partial: String, error: AgentError) -> Self {
        Self { partial, error }
    }
}

/// Stream a single model turn, emitting `Chunk` events as content arrives.
async fn stream_turn(
    provider: &dyn ChatProvider,
    messages: &[Message],
    tools: &[ToolSchema],
    cancel: &CancellationToken,
    tx: &mpsc::Sender<StreamEvent>,
) -> Result<Turn, TurnFailure> {
    let opened = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AgentError::Cancelled),
        opened = provider.stream_chat(messages, tools) => opened,
    };
    let mut stream = opened.map_err(|e| TurnFailure::new(String::new(), e))?;

    let mut content = String::new();
    let mut assembler = ToolCallAssembler::default();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            next = stream.next() => Some(next),
        };

        match next {
            None => return Err(TurnFailure::new(content, AgentError::Cancelled)),
            Some(None) => break,
            Some(Some(Err(e))) => return Err(TurnFailure::new(content, e)),
            Some(Some(Ok(delta))) => {
                if let Some(text) = delta.content.filter(|t| !t.is_empty()) {
                    content.push_str(&text);
                    if tx.send(StreamEvent::Chunk(text)).await.is_err() {
                        return Err(TurnFailure::new(content, AgentError::Cancelled));
                    }
                }
                for fragment in delta.tool_calls {
                    assembler.push(fragment);
                }
            }
        }
    }

    Ok(Turn {
        content,
        tool_calls: assembler.finish(),
    })
}

/// Reassembles streamed tool-call fragments into complete calls.
///
/// A fragment carrying a new id starts a new call; fragments without an id
/// (or repeating the current one) extend the call in progress. Calls that
/// never received any argument text are dropped.
#[derive(Debug, Default)]
pub struct ToolCallAssembler {
    sealed: Vec<ToolCall>,
    current: Option<ToolCall>,
}

impl ToolCallAssembler {
    pub fn push(&mut self, delta: ToolCallDelta) {
        let id = delta.id.filter(|id| !id.is_empty());
        let starts_new = match (&self.current, &id) {
            (None, _) => true,
            (Some(current), Some(id)) => *id != current.id,
            (Some(_), None) => false,
        };

        if starts_new {
            self.seal();
            self.current = Some(ToolCall {
                id: id.unwrap_or_default(),
                name: String::new(),
                arguments: String::new(),
            });
        }

        if let Some(current) = self.current.as_mut() {
            if let Some(name) = delta.name.filter(|n| !n.is_empty()) {
                current.name = name;
            }
            if let Some(arguments) = delta.arguments {
                current.arguments.push_str(&arguments);
            }
        }
    }

    pub fn finish(mut self) -> Vec<ToolCall> {
        self.seal();
        self.sealed
    }

    fn seal(&mut self) {
        if let Some(mut call) = self.current.take() {
            if call.arguments.is_empty() {
                return;
            }
            if call.id.is_empty() {
                call.id = format!("call_{}", Uuid::new_v4().simple());
            }
            self.sealed.push(call);
        }
    }
}
