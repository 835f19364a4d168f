// ABOUTME: Streaming session owning one chat request from conversation lookup to final frame
// ABOUTME: Persists turns, selects a persona, drives the tool loop, and enforces liveness
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Streaming Session
//!
//! State machine: `Init → Resolved → Streaming → (Complete | Errored | Aborted)`.
//!
//! - **Init → Resolved**: resolve or create the conversation, persist the user
//!   turn, load the history window, classify the persona, send `meta`.
//! - **Resolved → Streaming**: run the tool loop; text is re-chunked into
//!   `chunk` frames, tool calls become advisory `tool_use` frames, and a
//!   first-turn title is generated in the background.
//! - **Complete**: the assistant turn is stored with status `complete`, then a
//!   final `meta` and `done` are sent.
//! - **Errored**: the partial turn is stored with status `error`, then `error`
//!   is sent.
//! - **Aborted**: client disconnect, idle timeout, or caller cancellation. The
//!   partial turn is stored with status `interrupted` and no terminal frame is
//!   sent.
//!
//! Every stored write happens before the terminal frame, so a client that
//! sees `done` can rely on persistence having completed.

use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::persona::PersonaClassifier;
use super::sink::FrameSink;
use super::title::TitleGenerator;
use super::tool_loop::{LoopOutcome, LoopRequest, ToolLoop};
use crate::constants::{limits, session};
use crate::database::{ChatRepository, NewMessage};
use crate::errors::{AppError, AppResult};
use crate::llm::prompts::persona_system_prompt;
use crate::llm::round::RoundObserver;
use crate::llm::{ChatMessage, InferenceProvider, TokenUsage, ToolCall};
use crate::models::{
    ConversationRecord, MessageRecord, MessageRole, MessageStatus, Persona,
};
use crate::protocol::{MetaPayload, StreamFrame};
use crate::tools::{ToolExecutionContext, ToolRegistry};

/// Tunables for every session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Write a heartbeat when nothing was written for this long
    pub heartbeat_interval: Duration,
    /// Abort when no real frame was sent for this long
    pub idle_timeout: Duration,
    /// Messages loaded as model context
    pub history_limit: u32,
    /// Tool loop round cap
    pub max_tool_rounds: usize,
    /// Characters per `chunk` frame; 0 sends fragments whole
    pub chunk_chars: usize,
    /// Model override for chat rounds
    pub model: Option<String>,
    /// Output token budget override per round
    pub max_tokens: Option<u32>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(session::DEFAULT_HEARTBEAT_SECS),
            idle_timeout: Duration::from_secs(session::DEFAULT_IDLE_TIMEOUT_SECS),
            history_limit: limits::DEFAULT_HISTORY_LIMIT,
            max_tool_rounds: limits::DEFAULT_MAX_TOOL_ROUNDS,
            chunk_chars: limits::DEFAULT_CHUNK_CHARS,
            model: None,
            max_tokens: None,
        }
    }
}

/// One inbound chat request
#[derive(Debug, Clone)]
pub struct SessionRequest {
    /// Authenticated caller
    pub user_id: String,
    /// New user message, already validated
    pub message: String,
    /// Existing conversation to continue
    pub conversation_id: Option<String>,
    /// Title for a newly created conversation
    pub title: Option<String>,
}

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Nothing resolved yet
    #[default]
    Init,
    /// Conversation, user turn, and persona are settled
    Resolved,
    /// Tool loop running
    Streaming,
    /// Finished with `done`
    Complete,
    /// Finished with `error`
    Errored,
    /// Stopped without a terminal frame
    Aborted,
}

impl SessionState {
    /// Whether no further transitions can happen
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Errored | Self::Aborted)
    }

    /// Label for logs
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Resolved => "resolved",
            Self::Streaming => "streaming",
            Self::Complete => "complete",
            Self::Errored => "errored",
            Self::Aborted => "aborted",
        }
    }
}

/// Why a session was aborted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// The frame receiver was dropped
    ClientDisconnected,
    /// No real frame was sent within the idle timeout
    IdleTimeout,
    /// The caller cancelled the token
    Cancelled,
}

impl AbortReason {
    /// Label for logs
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ClientDisconnected => "client_disconnected",
            Self::IdleTimeout => "idle_timeout",
            Self::Cancelled => "cancelled",
        }
    }
}

/// How a session ended
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    /// Terminal state
    pub state: SessionState,
    /// Conversation, if it was resolved
    pub conversation_id: Option<String>,
    /// Stored assistant turn, if one was written
    pub assistant_message: Option<MessageRecord>,
    /// Usage summed over rounds (complete sessions only)
    pub usage: TokenUsage,
    /// Failure for errored sessions
    pub error: Option<AppError>,
    /// Cause for aborted sessions
    pub abort_reason: Option<AbortReason>,
}

#[derive(Debug, Default)]
struct SessionProgress {
    state: SessionState,
    conversation: Option<ConversationRecord>,
    user_message: Option<MessageRecord>,
    persona: Persona,
}

impl SessionProgress {
    fn transition(&mut self, next: SessionState) {
        debug!(from = self.state.as_str(), to = next.as_str(), "Session transition");
        self.state = next;
    }
}

/// Runs chat requests end to end
///
/// Cheap to clone; one instance serves every request.
#[derive(Clone)]
pub struct StreamingSession {
    repository: Arc<dyn ChatRepository>,
    provider: Arc<dyn InferenceProvider>,
    registry: Arc<ToolRegistry>,
    classifier: Arc<dyn PersonaClassifier>,
    titles: Option<TitleGenerator>,
    config: SessionConfig,
}

impl StreamingSession {
    /// Create a session runner; titles use the chat provider's default model
    #[must_use]
    pub fn new(
        repository: Arc<dyn ChatRepository>,
        provider: Arc<dyn InferenceProvider>,
        registry: Arc<ToolRegistry>,
        classifier: Arc<dyn PersonaClassifier>,
        config: SessionConfig,
    ) -> Self {
        let titles = Some(TitleGenerator::new(provider.clone(), None));
        Self {
            repository,
            provider,
            registry,
            classifier,
            titles,
            config,
        }
    }

    /// Replace the title generator; `None` disables title generation
    #[must_use]
    pub fn with_title_generator(mut self, titles: Option<TitleGenerator>) -> Self {
        self.titles = titles;
        self
    }

    /// Session tunables
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Run one request, writing frames into `sink`
    ///
    /// Cancelling `cancel` aborts the session. The liveness task cancels it
    /// too when the receiver goes away or the idle timeout passes.
    pub async fn run(
        &self,
        request: SessionRequest,
        sink: FrameSink,
        cancel: CancellationToken,
    ) -> SessionOutcome {
        let abort_reason = Arc::new(OnceLock::new());
        let liveness = spawn_liveness(
            sink.clone(),
            cancel.clone(),
            self.config.heartbeat_interval,
            self.config.idle_timeout,
            abort_reason.clone(),
        );

        let transcript = Mutex::new(String::new());
        let mut progress = SessionProgress::default();
        let result = self
            .drive(&request, &sink, &cancel, &mut progress, &transcript)
            .await;

        liveness.abort();
        let _ = liveness.await;

        let text = transcript
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        // The stream observer may cancel on a closed channel before the
        // liveness task records why
        let abort_reason = abort_reason
            .get()
            .copied()
            .or_else(|| sink.is_closed().then_some(AbortReason::ClientDisconnected));
        let outcome = self
            .finalize(result, progress, text, &sink, &cancel, abort_reason)
            .await;

        info!(
            user_id = %request.user_id,
            conversation_id = outcome.conversation_id.as_deref().unwrap_or("-"),
            state = outcome.state.as_str(),
            abort_reason = outcome.abort_reason.map_or("-", |reason| reason.as_str()),
            input_tokens = outcome.usage.input_tokens,
            output_tokens = outcome.usage.output_tokens,
            "Chat session finished"
        );
        outcome
    }

    async fn drive(
        &self,
        request: &SessionRequest,
        sink: &FrameSink,
        cancel: &CancellationToken,
        progress: &mut SessionProgress,
        transcript: &Mutex<String>,
    ) -> AppResult<LoopOutcome> {
        if cancel.is_cancelled() {
            return Err(AppError::cancelled("Session cancelled before start"));
        }

        let conversation = self
            .repository
            .resolve_or_create_conversation(
                &request.user_id,
                request.conversation_id.as_deref(),
                request.title.as_deref(),
            )
            .await?;
        progress.conversation = Some(conversation.clone());

        let user_message = self
            .repository
            .append_message(&conversation.id, NewMessage::user(&request.message))
            .await?;
        progress.user_message = Some(user_message.clone());

        let records = self
            .repository
            .list_recent_turns(&conversation.id, self.config.history_limit)
            .await?;
        let first_turn = is_first_turn(&records);
        let history = build_history_window(&records);

        let persona = match self.classifier.classify(&history, cancel).await {
            Ok(persona) => persona,
            Err(e) if e.is_cancellation() => return Err(e),
            Err(e) => {
                warn!(error = %e, "Persona classification failed, using default");
                Persona::default()
            }
        };
        progress.persona = persona;
        progress.transition(SessionState::Resolved);

        let model = self
            .config
            .model
            .clone()
            .unwrap_or_else(|| self.provider.default_model().to_owned());
        let meta = StreamFrame::Meta(MetaPayload {
            conversation_id: conversation.id.clone(),
            persona,
            user_message_id: user_message.id.clone(),
            assistant_message_id: None,
            model: Some(model),
        });
        if !sink.send_or_cancel(meta, cancel).await {
            return Err(AppError::cancelled("Client went away before streaming"));
        }
        progress.transition(SessionState::Streaming);

        let mut title_rx = match (&self.titles, first_turn, &conversation.title) {
            (Some(titles), true, None) => Some(titles.spawn(
                self.repository.clone(),
                conversation.id.clone(),
                request.message.clone(),
            )),
            _ => None,
        };
        let mut title_pending = title_rx.is_some();

        let observer = SessionObserver {
            sink,
            transcript,
            chunk_chars: self.config.chunk_chars,
            cancel,
        };
        let context = ToolExecutionContext::new(&request.user_id)
            .with_conversation(&conversation.id)
            .with_cancellation(cancel.clone());
        let tool_loop = ToolLoop::new(
            self.provider.as_ref(),
            self.registry.as_ref(),
            self.config.max_tool_rounds,
        );
        let loop_request = LoopRequest {
            model: self.config.model.clone(),
            system: Some(persona_system_prompt(persona).to_owned()),
            history,
            max_tokens: self.config.max_tokens,
        };

        let run = tool_loop.run(loop_request, &context, &observer, cancel);
        tokio::pin!(run);

        let outcome = loop {
            tokio::select! {
                result = &mut run => break result,
                title = async {
                    match title_rx.as_mut() {
                        Some(rx) => rx.await.ok(),
                        None => None,
                    }
                }, if title_pending => {
                    title_pending = false;
                    if let Some(title) = title {
                        sink.send_or_cancel(StreamFrame::title(title), cancel).await;
                    }
                }
            }
        }?;

        // A title that landed while the last round finished still goes out before done
        if title_pending {
            if let Some(title) = title_rx.as_mut().and_then(|rx| rx.try_recv().ok()) {
                sink.send_or_cancel(StreamFrame::title(title), cancel).await;
            }
        }

        Ok(outcome)
    }

    async fn finalize(
        &self,
        result: AppResult<LoopOutcome>,
        mut progress: SessionProgress,
        text: String,
        sink: &FrameSink,
        cancel: &CancellationToken,
        abort_reason: Option<AbortReason>,
    ) -> SessionOutcome {
        let conversation_id = progress.conversation.as_ref().map(|c| c.id.clone());

        match result {
            Ok(outcome) => match self.persist_assistant(&progress, &text, MessageStatus::Complete, outcome.usage).await {
                Ok(Some(message)) => {
                    if let Some(user_message) = &progress.user_message {
                        let meta = StreamFrame::Meta(MetaPayload {
                            conversation_id: message.conversation_id.clone(),
                            persona: progress.persona,
                            user_message_id: user_message.id.clone(),
                            assistant_message_id: Some(message.id.clone()),
                            model: None,
                        });
                        self.send_terminal(sink, meta).await;
                    }
                    self.send_terminal(sink, StreamFrame::done(outcome.usage)).await;
                    progress.transition(SessionState::Complete);
                    SessionOutcome {
                        state: progress.state,
                        conversation_id,
                        assistant_message: Some(message),
                        usage: outcome.usage,
                        error: None,
                        abort_reason: None,
                    }
                }
                Ok(None) => {
                    let error = AppError::internal("Session completed without a conversation");
                    self.fail(progress, conversation_id, None, error, sink).await
                }
                Err(error) => self.fail(progress, conversation_id, None, error, sink).await,
            },
            Err(error) if error.is_cancellation() || cancel.is_cancelled() => {
                let stored = self
                    .persist_assistant(&progress, &text, MessageStatus::Interrupted, TokenUsage::default())
                    .await
                    .unwrap_or_else(|e| {
                        warn!(error = %e, "Failed to store interrupted reply");
                        None
                    });
                progress.transition(SessionState::Aborted);
                SessionOutcome {
                    state: progress.state,
                    conversation_id,
                    assistant_message: stored,
                    usage: TokenUsage::default(),
                    error: None,
                    abort_reason: Some(abort_reason.unwrap_or(AbortReason::Cancelled)),
                }
            }
            Err(error) => {
                let stored = self
                    .persist_assistant(&progress, &text, MessageStatus::Error, TokenUsage::default())
                    .await
                    .unwrap_or_else(|e| {
                        warn!(error = %e, "Failed to store failed reply");
                        None
                    });
                self.fail(progress, conversation_id, stored, error, sink).await
            }
        }
    }

    async fn fail(
        &self,
        mut progress: SessionProgress,
        conversation_id: Option<String>,
        stored: Option<MessageRecord>,
        error: AppError,
        sink: &FrameSink,
    ) -> SessionOutcome {
        warn!(error = %error, "Chat session failed");
        self.send_terminal(sink, StreamFrame::error(error.message.clone()))
            .await;
        progress.transition(SessionState::Errored);
        SessionOutcome {
            state: progress.state,
            conversation_id,
            assistant_message: stored,
            usage: TokenUsage::default(),
            error: Some(error),
            abort_reason: None,
        }
    }

    /// Final frames go out after the liveness timers stop, so a reader that
    /// stopped draining gets one idle timeout to make room
    async fn send_terminal(&self, sink: &FrameSink, frame: StreamFrame) {
        let name = frame.event_name().unwrap_or("heartbeat");
        if !sink.send_within(frame, self.config.idle_timeout).await {
            debug!(frame = name, "Closing frame not delivered");
        }
    }

    /// Store the assistant turn once, if the user turn was stored
    async fn persist_assistant(
        &self,
        progress: &SessionProgress,
        text: &str,
        status: MessageStatus,
        usage: TokenUsage,
    ) -> AppResult<Option<MessageRecord>> {
        let (Some(conversation), Some(_)) = (&progress.conversation, &progress.user_message) else {
            return Ok(None);
        };
        let message = NewMessage::assistant(
            progress.persona,
            text,
            status,
            usage.output_tokens.map(i64::from),
        );
        self.repository
            .append_message(&conversation.id, message)
            .await
            .map(Some)
    }
}

/// Whether the stored window holds exactly one user turn and no replies
fn is_first_turn(records: &[MessageRecord]) -> bool {
    records.iter().all(|m| m.role != MessageRole::Assistant)
        && records.iter().filter(|m| m.role == MessageRole::User).count() == 1
}

/// Model context from stored messages
///
/// Keeps only `complete` user and assistant turns and drops leading turns
/// until the window starts on a user turn.
#[must_use]
pub fn build_history_window(records: &[MessageRecord]) -> Vec<ChatMessage> {
    records
        .iter()
        .filter(|m| m.status == MessageStatus::Complete)
        .filter(|m| matches!(m.role, MessageRole::User | MessageRole::Assistant))
        .skip_while(|m| m.role != MessageRole::User)
        .map(|m| match m.role {
            MessageRole::Assistant => ChatMessage::assistant_text(&m.content),
            _ => ChatMessage::user_text(&m.content),
        })
        .collect()
}

/// Split text into pieces of at most `size` characters
///
/// A size of 0 returns the text whole.
#[must_use]
pub fn rechunk(text: &str, size: usize) -> Vec<&str> {
    if size == 0 || text.is_empty() {
        return vec![text];
    }
    let mut pieces = Vec::new();
    let mut start = 0;
    for (count, (offset, _)) in text.char_indices().enumerate() {
        if count > 0 && count % size == 0 {
            pieces.push(&text[start..offset]);
            start = offset;
        }
    }
    pieces.push(&text[start..]);
    pieces
}

struct SessionObserver<'a> {
    sink: &'a FrameSink,
    transcript: &'a Mutex<String>,
    chunk_chars: usize,
    cancel: &'a CancellationToken,
}

#[async_trait]
impl RoundObserver for SessionObserver<'_> {
    async fn on_text(&self, delta: &str) {
        self.transcript
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_str(delta);

        for piece in rechunk(delta, self.chunk_chars) {
            if !self
                .sink
                .send_or_cancel(StreamFrame::chunk(piece), self.cancel)
                .await
            {
                self.cancel.cancel();
                return;
            }
        }
    }

    fn on_tool_use(&self, call: &ToolCall) {
        if !self.sink.try_send(StreamFrame::tool_use(call)) {
            debug!(tool = %call.name, "Dropped tool notice");
        }
    }
}

/// A gone receiver outranks whatever else triggered the abort
fn disconnect_or(sink: &FrameSink, reason: AbortReason) -> AbortReason {
    if sink.is_closed() {
        AbortReason::ClientDisconnected
    } else {
        reason
    }
}

/// Heartbeat and idle-timeout timers for one session
///
/// Cancels the session when the receiver goes away or no real frame was
/// sent within `idle_timeout`.
fn spawn_liveness(
    sink: FrameSink,
    cancel: CancellationToken,
    heartbeat_interval: Duration,
    idle_timeout: Duration,
    abort_reason: Arc<OnceLock<AbortReason>>,
) -> JoinHandle<()> {
    let tick = (heartbeat_interval.min(idle_timeout) / 4).max(Duration::from_millis(10));

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    let _ = abort_reason.set(disconnect_or(&sink, AbortReason::Cancelled));
                    return;
                }
                () = sink.closed() => {
                    let _ = abort_reason.set(AbortReason::ClientDisconnected);
                    cancel.cancel();
                    return;
                }
                _ = ticker.tick() => {
                    if sink.since_last_frame() >= idle_timeout {
                        let _ = abort_reason.set(AbortReason::IdleTimeout);
                        cancel.cancel();
                        return;
                    }
                    if sink.since_last_write() >= heartbeat_interval {
                        sink.try_send(StreamFrame::Heartbeat);
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(role: MessageRole, status: MessageStatus, content: &str) -> MessageRecord {
        MessageRecord {
            id: content.to_owned(),
            conversation_id: "c".to_owned(),
            role,
            persona: None,
            content: content.to_owned(),
            status,
            token_count: None,
            created_at: String::new(),
        }
    }

    #[test]
    fn test_rechunk_respects_char_boundaries() {
        assert_eq!(rechunk("h\u{e9}llo", 2), vec!["h\u{e9}", "ll", "o"]);
        assert_eq!(rechunk("abc", 0), vec!["abc"]);
        assert_eq!(rechunk("abc", 10), vec!["abc"]);
    }

    #[test]
    fn test_history_window_skips_incomplete_and_leading_assistant() {
        let records = vec![
            record(MessageRole::Assistant, MessageStatus::Complete, "orphan"),
            record(MessageRole::User, MessageStatus::Complete, "q1"),
            record(MessageRole::Assistant, MessageStatus::Interrupted, "partial"),
            record(MessageRole::User, MessageStatus::Complete, "q2"),
        ];
        let window = build_history_window(&records);
        let texts: Vec<String> = window.iter().map(ChatMessage::text).collect();
        assert_eq!(texts, vec!["q1".to_owned(), "q2".to_owned()]);
    }

    #[test]
    fn test_first_turn_detection() {
        let first = vec![record(MessageRole::User, MessageStatus::Complete, "hi")];
        assert!(is_first_turn(&first));
        let later = vec![
            record(MessageRole::User, MessageStatus::Complete, "hi"),
            record(MessageRole::Assistant, MessageStatus::Complete, "hello"),
            record(MessageRole::User, MessageStatus::Complete, "again"),
        ];
        assert!(!is_first_turn(&later));
    }
}
