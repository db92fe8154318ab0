//! One WebSocket connection: read pump, write pump, and the conversation
//! it carries.
//!
//! The read pump owns the conversation between prompts. While a prompt runs,
//! the history is moved into its driver task and handed back when the
//! agent loop finishes, so nothing is shared and nothing is locked. All
//! frames go through a bounded [`Outbound`] queue drained by the write pump.

use crate::protocol::{IncomingFrame, OutgoingFrame};
use crate::state::AppState;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures::{Sink, SinkExt, Stream, StreamExt};
use klaudkod_core::agent_loop::LlmClient;
use klaudkod_core::tool_registry::{ToolContext, ToolExecutor, ToolRegistry};
use klaudkod_core::types::{Message as ChatMessage, StreamEvent};
use std::collections::VecDeque;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, error, info, info_span, warn, Instrument};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OutboundError {
    #[error("outbound queue overflow")]
    Overflow,
    #[error("outbound queue closed")]
    Closed,
}

/// Producer side of a session's bounded outbound queue.
///
/// Sends never wait: a full queue means the client is not keeping up, and
/// the queue is closed instead, which tears the connection down.
#[derive(Debug, Clone)]
pub struct Outbound {
    tx: mpsc::Sender<OutgoingFrame>,
    closed: CancellationToken,
}

impl Outbound {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<OutgoingFrame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let outbound = Self {
            tx,
            closed: CancellationToken::new(),
        };
        (outbound, rx)
    }

    pub fn send(&self, frame: OutgoingFrame) -> Result<(), OutboundError> {
        if self.closed.is_cancelled() {
            return Err(OutboundError::Closed);
        }
        match self.tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Outbound queue full, closing slow client");
                self.closed.cancel();
                Err(OutboundError::Overflow)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.closed.cancel();
                Err(OutboundError::Closed)
            }
        }
    }

    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closed.cancelled()
    }

    /// Token the write pump watches to stop.
    pub fn close_token(&self) -> CancellationToken {
        self.closed.clone()
    }
}

/// Keepalive and write deadlines.
#[derive(Debug, Clone, Copy)]
pub struct SessionTimings {
    pub ping_period: Duration,
    pub pong_wait: Duration,
    pub write_wait: Duration,
}

impl Default for SessionTimings {
    fn default() -> Self {
        Self {
            ping_period: Duration::from_secs(54),
            pong_wait: Duration::from_secs(60),
            write_wait: Duration::from_secs(10),
        }
    }
}

/// Serve one upgraded WebSocket until either side goes away.
pub async fn handle_socket(socket: WebSocket, state: AppState, session_id: String) {
    let span = info_span!("session", session_id = %session_id);
    async move {
        let (sink, stream) = socket.split();
        let (outbound, frames) = Outbound::channel(state.config.session.outbound_capacity);
        let timings = SessionTimings::default();

        state.sessions.register(&session_id, outbound.clone()).await;
        info!("Client connected");

        let writer = tokio::spawn(
            write_pump(sink, frames, outbound.close_token(), timings).in_current_span(),
        );
        let history = Session::new(session_id.clone(), &state, outbound, timings)
            .run(stream)
            .await;

        state.sessions.unregister(&session_id).await;
        let _ = writer.await;
        info!(messages = history.len(), "Client disconnected");
    }
    .instrument(span)
    .await
}

/// Drain the outbound queue into the socket, pinging on a fixed period.
/// Sends a close frame on the way out.
pub async fn write_pump<W>(
    mut sink: W,
    mut frames: mpsc::Receiver<OutgoingFrame>,
    closed: CancellationToken,
    timings: SessionTimings,
) where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    let mut ping = tokio::time::interval_at(Instant::now() + timings.ping_period, timings.ping_period);

    loop {
        tokio::select! {
            biased;
            _ = closed.cancelled() => break,
            frame = frames.recv() => {
                let Some(frame) = frame else { break };
                let text = match serde_json::to_string(&frame) {
                    Ok(text) => text,
                    Err(e) => {
                        error!("Failed to serialize frame: {}", e);
                        continue;
                    }
                };
                if !send_with_deadline(&mut sink, Message::Text(text.into()), timings.write_wait).await {
                    break;
                }
            }
            _ = ping.tick() => {
                if !send_with_deadline(&mut sink, Message::Ping(Bytes::new()), timings.write_wait).await {
                    break;
                }
            }
        }
    }

    closed.cancel();
    let _ = send_with_deadline(&mut sink, Message::Close(None), timings.write_wait).await;
    debug!("Write pump stopped");
}

async fn send_with_deadline<W>(sink: &mut W, message: Message, wait: Duration) -> bool
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    match tokio::time::timeout(wait, sink.send(message)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            debug!("WebSocket write failed: {}", e);
            false
        }
        Err(_) => {
            warn!("WebSocket write timed out");
            false
        }
    }
}

struct RunningPrompt {
    cancel: CancellationToken,
    handle: JoinHandle<Option<Vec<ChatMessage>>>,
    /// History as it was when the prompt started, kept in case the driver dies.
    snapshot: Vec<ChatMessage>,
}

impl RunningPrompt {
    fn reclaim(self, joined: Result<Option<Vec<ChatMessage>>, JoinError>) -> Vec<ChatMessage> {
        match joined {
            Ok(Some(history)) => history,
            Ok(None) => self.snapshot,
            Err(e) => {
                error!("Prompt driver failed: {}", e);
                self.snapshot
            }
        }
    }
}

enum Step {
    Closed,
    PromptFinished(Result<Option<Vec<ChatMessage>>, JoinError>),
    Inbound(Message),
}

/// Conversation state and read pump for one connection.
pub struct Session {
    id: String,
    state: AppState,
    outbound: Outbound,
    /// Connection-wide token; every prompt token derives from it.
    cancel: CancellationToken,
    timings: SessionTimings,
    history: Vec<ChatMessage>,
    queued: VecDeque<String>,
    /// Invalid-format replies owed to the client, sent once the running
    /// prompt's terminal frame is out.
    held_rejections: usize,
}

impl Session {
    pub fn new(id: impl Into<String>, state: &AppState, outbound: Outbound, timings: SessionTimings) -> Self {
        Self {
            id: id.into(),
            cancel: state.shutdown.child_token(),
            state: state.clone(),
            outbound,
            timings,
            history: Vec::new(),
            queued: VecDeque::new(),
            held_rejections: 0,
        }
    }

    /// Read inbound frames until the client leaves, the keepalive deadline
    /// passes, or the outbound queue closes. Returns the final conversation.
    pub async fn run<S, E>(mut self, mut inbound: S) -> Vec<ChatMessage>
    where
        S: Stream<Item = Result<Message, E>> + Unpin,
        E: Display,
    {
        let mut deadline = Instant::now() + self.timings.pong_wait;
        let mut running: Option<RunningPrompt> = None;

        loop {
            let step = tokio::select! {
                _ = self.outbound.closed() => Step::Closed,
                _ = self.cancel.cancelled() => Step::Closed,
                joined = finished(&mut running) => Step::PromptFinished(joined),
                read = tokio::time::timeout_at(deadline, inbound.next()) => match read {
                    Err(_) => {
                        warn!(session_id = %self.id, "Keepalive deadline passed");
                        Step::Closed
                    }
                    Ok(None) => Step::Closed,
                    Ok(Some(Err(e))) => {
                        debug!(session_id = %self.id, "WebSocket read failed: {}", e);
                        Step::Closed
                    }
                    Ok(Some(Ok(message))) => Step::Inbound(message),
                },
            };

            match step {
                Step::Closed => break,
                Step::PromptFinished(joined) => {
                    if let Some(prompt) = running.take() {
                        self.history = prompt.reclaim(joined);
                    }
                    self.flush_rejections();
                    if let Some(next) = self.queued.pop_front() {
                        running = Some(self.start_prompt(next));
                    }
                }
                Step::Inbound(message) => {
                    deadline = Instant::now() + self.timings.pong_wait;
                    match message {
                        Message::Text(text) => self.handle_text(text.as_str(), &mut running),
                        Message::Binary(_) => self.reply_invalid(&running),
                        Message::Close(_) => break,
                        Message::Ping(_) | Message::Pong(_) => {}
                    }
                }
            }
        }

        if let Some(mut prompt) = running.take() {
            prompt.cancel.cancel();
            let joined = (&mut prompt.handle).await;
            self.history = prompt.reclaim(joined);
        }
        self.cancel.cancel();
        self.outbound.close();
        self.history
    }

    fn handle_text(&mut self, text: &str, running: &mut Option<RunningPrompt>) {
        let frame = match serde_json::from_str::<IncomingFrame>(text) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(session_id = %self.id, "Rejected inbound frame: {}", e);
                self.reply_invalid(running);
                return;
            }
        };

        match frame {
            IncomingFrame::Prompt { content, .. } => {
                if running.is_some() {
                    debug!(session_id = %self.id, queued = self.queued.len() + 1, "Prompt queued");
                    self.queued.push_back(content);
                } else {
                    *running = Some(self.start_prompt(content));
                }
            }
            IncomingFrame::Cancel => {
                if let Some(prompt) = running.as_ref() {
                    info!(session_id = %self.id, "Cancelling in-flight prompt");
                    prompt.cancel.cancel();
                }
            }
        }
    }

    /// A prompt's frames must end with its own single terminal frame, so a
    /// rejection that arrives mid-prompt waits until that prompt is done.
    fn reply_invalid(&mut self, running: &Option<RunningPrompt>) {
        if running.is_some() {
            self.held_rejections += 1;
            return;
        }
        let _ = self.outbound.send(OutgoingFrame::error("Invalid message format"));
    }

    fn flush_rejections(&mut self) {
        for _ in 0..std::mem::take(&mut self.held_rejections) {
            if self.outbound.send(OutgoingFrame::error("Invalid message format")).is_err() {
                break;
            }
        }
    }

    fn start_prompt(&mut self, content: String) -> RunningPrompt {
        if self.history.is_empty() {
            self.history
                .push(ChatMessage::system(self.state.config.system_prompt.clone()));
        }
        self.history.push(ChatMessage::user(content));

        let history = std::mem::take(&mut self.history);
        let snapshot = history.clone();
        let cancel = self.cancel.child_token();
        let driver = PromptDriver {
            session_id: self.id.clone(),
            llm: self.state.llm.clone(),
            registry: self.state.tool_registry.clone(),
            tools_enabled: self.state.config.tools.enabled,
            outbound: self.outbound.clone(),
            cancel: cancel.clone(),
        };
        debug!(session_id = %self.id, messages = history.len(), "Starting prompt");

        RunningPrompt {
            cancel,
            handle: tokio::spawn(driver.run(history).in_current_span()),
            snapshot,
        }
    }
}

async fn finished(running: &mut Option<RunningPrompt>) -> Result<Option<Vec<ChatMessage>>, JoinError> {
    match running {
        Some(prompt) => (&mut prompt.handle).await,
        None => std::future::pending().await,
    }
}

/// Runs one prompt against the LLM and forwards its events as frames.
struct PromptDriver {
    session_id: String,
    llm: Arc<LlmClient>,
    registry: Arc<ToolRegistry>,
    tools_enabled: bool,
    outbound: Outbound,
    cancel: CancellationToken,
}

impl PromptDriver {
    /// Returns the updated history, or `None` if it was lost.
    async fn run(self, history: Vec<ChatMessage>) -> Option<Vec<ChatMessage>> {
        if self.tools_enabled {
            self.run_with_tools(history).await
        } else {
            Some(self.run_plain(history).await)
        }
    }

    async fn run_with_tools(self, history: Vec<ChatMessage>) -> Option<Vec<ChatMessage>> {
        let ctx = ToolContext::new(self.session_id.clone(), self.cancel.clone());
        let executor: Arc<dyn ToolExecutor> = self.registry.clone();
        let mut run = self
            .llm
            .stream_with_tools(ctx, history, self.registry.schemas(), executor);

        while let Some(event) = run.events.recv().await {
            if !self.forward(event) {
                break;
            }
        }
        drop(run.events);

        match run.transcript.await {
            Ok(history) => Some(history),
            Err(e) => {
                error!(session_id = %self.session_id, "Agent loop task failed: {}", e);
                None
            }
        }
    }

    async fn run_plain(self, mut history: Vec<ChatMessage>) -> Vec<ChatMessage> {
        let mut events = self.llm.stream(self.cancel.clone(), history.clone());
        let mut text = String::new();

        while let Some(event) = events.recv().await {
            if let StreamEvent::Chunk(chunk) = &event {
                text.push_str(chunk);
            }
            if !self.forward(event) {
                break;
            }
        }

        if !text.is_empty() {
            history.push(ChatMessage::assistant(text));
        }
        history
    }

    fn forward(&self, event: StreamEvent) -> bool {
        match self.outbound.send(event.into()) {
            Ok(()) => true,
            Err(e) => {
                debug!(session_id = %self.session_id, "Dropping prompt output: {}", e);
                self.cancel.cancel();
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use klaudkod_core::config::{AppConfig, PermissionMode};
    use klaudkod_core::testing::ScriptedProvider;
    use klaudkod_core::types::Role;
    use tempfile::TempDir;

    type Inbound = futures::channel::mpsc::UnboundedSender<Result<Message, std::io::Error>>;

    struct Harness {
        inbound: Inbound,
        frames: mpsc::Receiver<OutgoingFrame>,
        session: JoinHandle<Vec<ChatMessage>>,
        provider: Arc<ScriptedProvider>,
        _tmp: TempDir,
    }

    fn start(provider: ScriptedProvider, config: AppConfig, capacity: usize, timings: SessionTimings) -> Harness {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("main.go"), "package main\n").unwrap();
        let mut registry = ToolRegistry::new(tmp.path(), PermissionMode::Auto).unwrap();
        if config.tools.enabled {
            klaudkod_tools::register_all(&mut registry, &config);
        }

        let provider = Arc::new(provider);
        let state = AppState::new(config, Arc::new(registry), provider.clone());
        let (outbound, frames) = Outbound::channel(capacity);
        let (inbound, stream) = futures::channel::mpsc::unbounded();
        let session = tokio::spawn(Session::new("test", &state, outbound, timings).run(stream));

        Harness {
            inbound,
            frames,
            session,
            provider,
            _tmp: tmp,
        }
    }

    fn start_default(provider: ScriptedProvider) -> Harness {
        start(provider, AppConfig::default(), 256, SessionTimings::default())
    }

    fn send(inbound: &Inbound, text: &str) {
        inbound
            .unbounded_send(Ok(Message::Text(text.to_string().into())))
            .unwrap();
    }

    async fn next_frame(frames: &mut mpsc::Receiver<OutgoingFrame>) -> OutgoingFrame {
        tokio::time::timeout(Duration::from_secs(5), frames.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("outbound closed")
    }

    async fn frames_until_terminal(frames: &mut mpsc::Receiver<OutgoingFrame>) -> Vec<OutgoingFrame> {
        let mut out = Vec::new();
        loop {
            let frame = next_frame(frames).await;
            let terminal = frame.is_terminal();
            out.push(frame);
            if terminal {
                return out;
            }
        }
    }

    async fn finish(h: Harness) -> (Vec<ChatMessage>, Arc<ScriptedProvider>) {
        drop(h.inbound);
        let history = tokio::time::timeout(Duration::from_secs(5), h.session)
            .await
            .expect("session did not stop")
            .unwrap();
        (history, h.provider)
    }

    #[tokio::test]
    async fn test_plain_turn_streams_and_commits() {
        let mut h = start_default(ScriptedProvider::new().text_turn(&["he", "llo"]));
        send(&h.inbound, r#"{"type":"prompt","content":"hi"}"#);

        let frames = frames_until_terminal(&mut h.frames).await;
        assert_eq!(
            frames,
            vec![
                OutgoingFrame::Chunk { content: "he".into() },
                OutgoingFrame::Chunk { content: "llo".into() },
                OutgoingFrame::Done,
            ]
        );

        let (history, _) = finish(h).await;
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].role, Role::System);
        assert_eq!(history[1], ChatMessage::user("hi"));
        assert_eq!(history[2], ChatMessage::assistant("hello"));
    }

    #[tokio::test]
    async fn test_tool_turn_commits_full_transcript() {
        let mut h = start_default(
            ScriptedProvider::new()
                .tool_turn("call_1", "glob", r#"{"pattern":"**/*.go"}"#)
                .text_turn(&["Found files"]),
        );
        send(&h.inbound, r#"{"type":"prompt","content":"find go files"}"#);

        let frames = frames_until_terminal(&mut h.frames).await;
        assert_eq!(frames.len(), 4);
        assert!(matches!(&frames[0], OutgoingFrame::ToolCall { tool_call } if tool_call.name == "glob"));
        match &frames[1] {
            OutgoingFrame::ToolResult { tool_result } => {
                assert!(!tool_result.is_error);
                assert_eq!(tool_result.tool_call_id.as_deref(), Some("call_1"));
                assert!(tool_result.content.contains("main.go"));
            }
            other => panic!("expected tool_result, got {:?}", other),
        }
        assert_eq!(frames[2], OutgoingFrame::Chunk { content: "Found files".into() });
        assert_eq!(frames[3], OutgoingFrame::Done);

        let (history, _) = finish(h).await;
        let roles: Vec<Role> = history.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::Tool, Role::Assistant]
        );
        assert_eq!(history[2].tool_calls[0].id, "call_1");
        assert_eq!(history[3].tool_call_id.as_deref(), Some("call_1"));
    }

    #[tokio::test]
    async fn test_invalid_frames_get_error_and_session_continues() {
        let mut h = start_default(ScriptedProvider::new().text_turn(&["ok"]));

        send(&h.inbound, "not json");
        assert_eq!(next_frame(&mut h.frames).await, OutgoingFrame::error("Invalid message format"));

        send(&h.inbound, r#"{"type":"dance"}"#);
        assert_eq!(next_frame(&mut h.frames).await, OutgoingFrame::error("Invalid message format"));

        send(&h.inbound, r#"{"type":"prompt","content":"still there?"}"#);
        let frames = frames_until_terminal(&mut h.frames).await;
        assert_eq!(frames.last(), Some(&OutgoingFrame::Done));
    }

    #[tokio::test]
    async fn test_invalid_frame_mid_prompt_is_answered_after_done() {
        let provider = ScriptedProvider::new()
            .with_delay(Duration::from_millis(150))
            .text_turn(&["a", "b", "c"]);
        let mut h = start_default(provider);
        send(&h.inbound, r#"{"type":"prompt","content":"spell it"}"#);
        tokio::time::sleep(Duration::from_millis(200)).await;
        send(&h.inbound, "not json");

        let frames = frames_until_terminal(&mut h.frames).await;
        assert_eq!(frames.iter().filter(|f| f.is_terminal()).count(), 1);
        assert_eq!(
            frames,
            vec![
                OutgoingFrame::Chunk { content: "a".into() },
                OutgoingFrame::Chunk { content: "b".into() },
                OutgoingFrame::Chunk { content: "c".into() },
                OutgoingFrame::Done,
            ]
        );
        assert_eq!(next_frame(&mut h.frames).await, OutgoingFrame::error("Invalid message format"));
    }

    #[tokio::test]
    async fn test_prompts_are_processed_in_order() {
        let mut h = start_default(ScriptedProvider::new().text_turn(&["one"]).text_turn(&["two"]));
        send(&h.inbound, r#"{"type":"prompt","content":"first"}"#);
        send(&h.inbound, r#"{"type":"prompt","content":"second"}"#);

        let first = frames_until_terminal(&mut h.frames).await;
        let second = frames_until_terminal(&mut h.frames).await;
        assert_eq!(first[0], OutgoingFrame::Chunk { content: "one".into() });
        assert_eq!(second[0], OutgoingFrame::Chunk { content: "two".into() });

        let (history, provider) = finish(h).await;
        assert_eq!(history.len(), 5);
        assert_eq!(history[4], ChatMessage::assistant("two"));

        let requests = provider.requests();
        assert_eq!(requests[1].len(), 4);
        assert_eq!(requests[1][2], ChatMessage::assistant("one"));
    }

    #[tokio::test]
    async fn test_cancel_ends_prompt_with_single_error() {
        let provider = ScriptedProvider::new()
            .with_delay(Duration::from_millis(200))
            .text_turn(&["a", "b", "c", "d"]);
        let mut h = start_default(provider);
        send(&h.inbound, r#"{"type":"prompt","content":"long answer"}"#);
        send(&h.inbound, r#"{"type":"cancel"}"#);

        let frames = frames_until_terminal(&mut h.frames).await;
        assert_eq!(frames.last(), Some(&OutgoingFrame::error("request cancelled")));
        assert_eq!(frames.iter().filter(|f| f.is_terminal()).count(), 1);

        // The connection survives a cancel.
        send(&h.inbound, r#"{"type":"cancel"}"#);
        let (history, _) = finish(h).await;
        assert_eq!(history[1], ChatMessage::user("long answer"));
    }

    #[tokio::test]
    async fn test_tools_disabled_uses_plain_stream() {
        let mut config = AppConfig::default();
        config.tools.enabled = false;
        let mut h = start(
            ScriptedProvider::new().text_turn(&["plain"]),
            config,
            256,
            SessionTimings::default(),
        );
        send(&h.inbound, r#"{"type":"prompt","content":"hi"}"#);

        let frames = frames_until_terminal(&mut h.frames).await;
        assert_eq!(frames.len(), 2);

        let (history, _) = finish(h).await;
        assert_eq!(history.last(), Some(&ChatMessage::assistant("plain")));
    }

    #[tokio::test]
    async fn test_outbound_overflow_closes_queue() {
        let (outbound, _frames) = Outbound::channel(256);
        for i in 0..256 {
            outbound
                .send(OutgoingFrame::Chunk { content: i.to_string() })
                .unwrap();
        }
        assert_eq!(outbound.send(OutgoingFrame::Done), Err(OutboundError::Overflow));
        assert!(outbound.is_closed());
        assert_eq!(outbound.send(OutgoingFrame::Done), Err(OutboundError::Closed));
    }

    #[tokio::test]
    async fn test_slow_client_tears_session_down() {
        let h = start(
            ScriptedProvider::new().text_turn(&["a", "b", "c", "d", "e"]),
            AppConfig::default(),
            2,
            SessionTimings::default(),
        );
        send(&h.inbound, r#"{"type":"prompt","content":"flood"}"#);

        // Nobody drains `frames`; the session must stop on its own.
        let history = tokio::time::timeout(Duration::from_secs(5), h.session)
            .await
            .expect("session did not stop")
            .unwrap();
        assert_eq!(history[1], ChatMessage::user("flood"));
        drop(h.inbound);
    }

    #[tokio::test]
    async fn test_keepalive_deadline_closes_idle_session() {
        let timings = SessionTimings {
            ping_period: Duration::from_millis(50),
            pong_wait: Duration::from_millis(100),
            write_wait: Duration::from_secs(1),
        };
        let h = start(ScriptedProvider::new(), AppConfig::default(), 256, timings);

        let history = tokio::time::timeout(Duration::from_secs(5), h.session)
            .await
            .expect("session did not stop")
            .unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn test_pongs_keep_session_alive() {
        let timings = SessionTimings {
            ping_period: Duration::from_millis(50),
            pong_wait: Duration::from_millis(150),
            write_wait: Duration::from_secs(1),
        };
        let h = start(ScriptedProvider::new(), AppConfig::default(), 256, timings);

        for _ in 0..8 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            h.inbound.unbounded_send(Ok(Message::Pong(Bytes::new()))).unwrap();
        }
        // Well past a single pong_wait, but every pong pushed the deadline out.
        assert!(!h.session.is_finished());

        let history = tokio::time::timeout(Duration::from_secs(5), h.session)
            .await
            .expect("session did not stop once pongs stopped")
            .unwrap();
        assert!(history.is_empty());
        drop(h.inbound);
    }

    #[tokio::test]
    async fn test_write_pump_serializes_pings_and_closes() {
        let timings = SessionTimings {
            ping_period: Duration::from_millis(50),
            pong_wait: Duration::from_secs(60),
            write_wait: Duration::from_secs(1),
        };
        let (outbound, frames) = Outbound::channel(8);
        let (sink, mut socket) = futures::channel::mpsc::unbounded::<Message>();
        let pump = tokio::spawn(write_pump(sink, frames, outbound.close_token(), timings));

        outbound.send(OutgoingFrame::Done).unwrap();
        match socket.next().await.unwrap() {
            Message::Text(text) => assert_eq!(text.as_str(), r#"{"type":"done"}"#),
            other => panic!("expected text frame, got {:?}", other),
        }
        assert!(matches!(socket.next().await.unwrap(), Message::Ping(_)));

        outbound.close();
        pump.await.unwrap();
        let mut rest = Vec::new();
        while let Some(message) = socket.next().await {
            rest.push(message);
        }
        assert!(matches!(rest.last(), Some(Message::Close(None))));
    }
}
