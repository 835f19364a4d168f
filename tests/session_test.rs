// ABOUTME: End-to-end tests for streaming chat sessions over a scripted upstream
// ABOUTME: Covers frame ordering, persistence, titles, cancellation, idle timeout, and disconnects
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

#![allow(missing_docs, clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{
    build_session, build_session_with_titles, create_test_repository, test_registry,
    test_session_config, text_round, tool_round, Script, ScriptedProvider,
};
use streamchat_server::chat::{
    AbortReason, ModelClassifier, SessionOutcome, SessionRequest, SessionState, StreamingSession,
    FrameSink,
};
use streamchat_server::database::{ChatRepository, NewMessage};
use streamchat_server::errors::{AppError, ErrorCode};
use streamchat_server::llm::prompts::persona_system_prompt;
use streamchat_server::llm::{BlockDelta, BlockKind, ChatRole, UpstreamEvent};
use streamchat_server::models::{MessageRole, MessageStatus, Persona};
use streamchat_server::protocol::StreamFrame;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const TEST_TIMEOUT: Duration = Duration::from_secs(10);

fn request(message: &str) -> SessionRequest {
    SessionRequest {
        user_id: "user-1".to_owned(),
        message: message.to_owned(),
        conversation_id: None,
        title: None,
    }
}

fn spawn_session(
    session: &StreamingSession,
    request: SessionRequest,
    cancel: CancellationToken,
) -> (
    mpsc::Receiver<StreamFrame>,
    tokio::task::JoinHandle<SessionOutcome>,
) {
    let (sink, rx) = FrameSink::channel(64);
    let session = session.clone();
    let handle = tokio::spawn(async move { session.run(request, sink, cancel).await });
    (rx, handle)
}

/// Run a session to the end, collecting every frame
async fn run_session(
    session: &StreamingSession,
    request: SessionRequest,
) -> (Vec<StreamFrame>, SessionOutcome) {
    let (mut rx, handle) = spawn_session(session, request, CancellationToken::new());
    tokio::time::timeout(TEST_TIMEOUT, async move {
        let mut frames = Vec::new();
        while let Some(frame) = rx.recv().await {
            frames.push(frame);
        }
        (frames, handle.await.unwrap())
    })
    .await
    .expect("session should finish")
}

fn chunk_text(frames: &[StreamFrame]) -> String {
    frames
        .iter()
        .filter_map(|frame| match frame {
            StreamFrame::Chunk(payload) => Some(payload.delta.as_str()),
            _ => None,
        })
        .collect()
}

fn position(frames: &[StreamFrame], predicate: impl Fn(&StreamFrame) -> bool) -> usize {
    frames
        .iter()
        .position(predicate)
        .expect("frame should be present")
}

fn stalled_text(text: &str) -> Script {
    Script::Stall(vec![
        UpstreamEvent::BlockStart {
            index: 0,
            kind: BlockKind::Text,
        },
        UpstreamEvent::BlockDelta {
            index: 0,
            delta: BlockDelta::Text(text.to_owned()),
        },
    ])
}

#[tokio::test]
async fn test_complete_session_frame_order_and_persistence() {
    let repo = create_test_repository().await;
    let provider = Arc::new(ScriptedProvider::with_rounds(vec![text_round(
        "Hi! How can I help?",
    )]));
    let session = build_session(repo.clone(), provider.clone(), test_session_config());

    let (frames, outcome) = run_session(&session, request("Hello there")).await;

    assert_eq!(outcome.state, SessionState::Complete);
    let conversation_id = outcome.conversation_id.clone().unwrap();

    let StreamFrame::Meta(meta) = &frames[0] else {
        panic!("first frame should be meta, got {:?}", frames[0]);
    };
    assert_eq!(meta.conversation_id, conversation_id);
    assert_eq!(meta.persona, Persona::General);
    assert_eq!(meta.model.as_deref(), Some("scripted-model"));
    assert!(meta.assistant_message_id.is_none());

    assert_eq!(chunk_text(&frames), "Hi! How can I help?");

    let StreamFrame::Done(done) = frames.last().unwrap() else {
        panic!("last frame should be done");
    };
    assert_eq!(done.usage.input_tokens, Some(10));
    assert_eq!(done.usage.output_tokens, Some(5));
    assert_eq!(frames.iter().filter(|f| f.is_terminal()).count(), 1);

    // Final meta carries the stored assistant ID and precedes done
    let StreamFrame::Meta(final_meta) = &frames[frames.len() - 2] else {
        panic!("final meta should precede done");
    };
    let assistant = outcome.assistant_message.clone().unwrap();
    assert_eq!(final_meta.assistant_message_id.as_deref(), Some(assistant.id.as_str()));
    assert_eq!(final_meta.user_message_id, meta.user_message_id);

    let stored = repo.list_recent_turns(&conversation_id, 10).await.unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].role, MessageRole::User);
    assert_eq!(stored[0].content, "Hello there");
    assert_eq!(stored[1].role, MessageRole::Assistant);
    assert_eq!(stored[1].content, "Hi! How can I help?");
    assert_eq!(stored[1].status, MessageStatus::Complete);
    assert_eq!(stored[1].token_count, Some(5));
    assert_eq!(stored[1].persona, Some(Persona::General));
}

#[tokio::test]
async fn test_tool_session_streams_notices_and_full_transcript() {
    let repo = create_test_repository().await;
    let provider = Arc::new(ScriptedProvider::with_rounds(vec![
        tool_round(
            "Let me check. ",
            &[
                ("call_1", "calculator", r#"{"expression":"2+2"}"#),
                ("call_2", "web_search", r#"{"query":"today's date"}"#),
            ],
        ),
        text_round("2+2 is 4, and today is 2025-06-01."),
    ]));
    let session = build_session(repo.clone(), provider.clone(), test_session_config());

    let (frames, outcome) =
        run_session(&session, request("What's 2+2 and search for today's date?")).await;

    assert_eq!(outcome.state, SessionState::Complete);
    assert_eq!(provider.call_count(), 2);

    let StreamFrame::Meta(meta) = &frames[0] else {
        panic!("first frame should be meta");
    };
    assert_eq!(meta.persona, Persona::Analyst);

    let tools: Vec<&str> = frames
        .iter()
        .filter_map(|frame| match frame {
            StreamFrame::ToolUse(payload) => Some(payload.tool.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(tools, vec!["calculator", "web_search"]);

    let expected = "Let me check. 2+2 is 4, and today is 2025-06-01.";
    assert_eq!(chunk_text(&frames), expected);
    assert_eq!(outcome.assistant_message.unwrap().content, expected);

    let StreamFrame::Done(done) = frames.last().unwrap() else {
        panic!("last frame should be done");
    };
    assert_eq!(done.usage.input_tokens, Some(20));
    assert_eq!(done.usage.output_tokens, Some(12));
}

#[tokio::test]
async fn test_continuing_conversation_sends_trimmed_history() {
    let repo = create_test_repository().await;
    let conversation = repo
        .resolve_or_create_conversation("user-1", None, None)
        .await
        .unwrap();
    for (user, assistant) in [("q1", "a1"), ("q2", "a2")] {
        repo.append_message(&conversation.id, NewMessage::user(user))
            .await
            .unwrap();
        repo.append_message(
            &conversation.id,
            NewMessage::assistant(Persona::General, assistant, MessageStatus::Complete, None),
        )
        .await
        .unwrap();
    }

    let provider = Arc::new(ScriptedProvider::with_rounds(vec![text_round("a3")]));
    let config = streamchat_server::chat::SessionConfig {
        history_limit: 4,
        ..test_session_config()
    };
    let session = build_session(repo.clone(), provider.clone(), config);

    let (_, outcome) = run_session(
        &session,
        SessionRequest {
            conversation_id: Some(conversation.id.clone()),
            ..request("q3")
        },
    )
    .await;

    assert_eq!(outcome.state, SessionState::Complete);
    // Window of 4 is a1 q2 a2 q3; the leading assistant turn is dropped
    let messages = &provider.requests()[0].messages;
    let texts: Vec<String> = messages.iter().map(|m| m.text()).collect();
    assert_eq!(texts, vec!["q2", "a2", "q3"]);
    assert_eq!(messages[0].role, ChatRole::User);
}

#[tokio::test]
async fn test_rechunking_splits_text_into_fixed_pieces() {
    let repo = create_test_repository().await;
    let provider = Arc::new(ScriptedProvider::with_rounds(vec![text_round("abcdefghij")]));
    let config = streamchat_server::chat::SessionConfig {
        chunk_chars: 4,
        ..test_session_config()
    };
    let session = build_session(repo, provider, config);

    let (frames, _) = run_session(&session, request("hello")).await;

    let chunks: Vec<&str> = frames
        .iter()
        .filter_map(|frame| match frame {
            StreamFrame::Chunk(payload) => Some(payload.delta.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(chunks, vec!["abcd", "efgh", "ij"]);
}

#[tokio::test]
async fn test_title_frame_arrives_before_done_on_first_turn() {
    let repo = create_test_repository().await;
    let provider = Arc::new(ScriptedProvider::new(vec![
        Script::Delayed(Duration::from_millis(300), text_round("Sure, let's plan.")),
        Script::Events(text_round("Anything else?")),
    ]));
    let title_provider = Arc::new(ScriptedProvider::with_rounds(vec![text_round(
        "\"Weekend Plans.\"",
    )]));
    let session = build_session_with_titles(
        repo.clone(),
        provider.clone(),
        title_provider.clone(),
        test_session_config(),
    );

    let (frames, outcome) = run_session(&session, request("Help me plan my weekend")).await;

    let title_at = position(&frames, |f| matches!(f, StreamFrame::Title(_)));
    let done_at = position(&frames, |f| matches!(f, StreamFrame::Done(_)));
    assert!(title_at < done_at);
    assert_eq!(frames[title_at], StreamFrame::title("Weekend Plans"));

    let conversation_id = outcome.conversation_id.unwrap();
    let stored = repo
        .get_conversation(&conversation_id, "user-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.title.as_deref(), Some("Weekend Plans"));

    // Later turns never ask for a title
    let (frames, _) = run_session(
        &session,
        SessionRequest {
            conversation_id: Some(conversation_id),
            ..request("And next weekend?")
        },
    )
    .await;
    assert!(!frames.iter().any(|f| matches!(f, StreamFrame::Title(_))));
    assert_eq!(title_provider.call_count(), 1);
}

#[tokio::test]
async fn test_caller_supplied_title_skips_generation() {
    let repo = create_test_repository().await;
    let provider = Arc::new(ScriptedProvider::with_rounds(vec![text_round("ok")]));
    let title_provider = Arc::new(ScriptedProvider::with_rounds(vec![text_round("Unused")]));
    let session = build_session_with_titles(
        repo,
        provider,
        title_provider.clone(),
        test_session_config(),
    );

    let (frames, _) = run_session(
        &session,
        SessionRequest {
            title: Some("My Title".to_owned()),
            ..request("hi")
        },
    )
    .await;

    assert!(!frames.iter().any(|f| matches!(f, StreamFrame::Title(_))));
    assert_eq!(title_provider.call_count(), 0);
}

#[tokio::test]
async fn test_caller_cancellation_interrupts_without_terminal_frame() {
    let repo = create_test_repository().await;
    let provider = Arc::new(ScriptedProvider::new(vec![stalled_text("Partial ans")]));
    let session = build_session(repo.clone(), provider, test_session_config());
    let cancel = CancellationToken::new();

    let (mut rx, handle) = spawn_session(&session, request("Tell me a long story"), cancel.clone());

    let (frames, outcome) = tokio::time::timeout(TEST_TIMEOUT, async move {
        let mut frames = Vec::new();
        while let Some(frame) = rx.recv().await {
            if matches!(frame, StreamFrame::Chunk(_)) {
                cancel.cancel();
            }
            frames.push(frame);
        }
        (frames, handle.await.unwrap())
    })
    .await
    .unwrap();

    assert_eq!(outcome.state, SessionState::Aborted);
    assert_eq!(outcome.abort_reason, Some(AbortReason::Cancelled));
    assert!(!frames.iter().any(StreamFrame::is_terminal));

    let stored = outcome.assistant_message.unwrap();
    assert_eq!(stored.status, MessageStatus::Interrupted);
    assert_eq!(stored.content, "Partial ans");
}

#[tokio::test]
async fn test_idle_timeout_aborts_stalled_upstream_with_heartbeats() {
    let repo = create_test_repository().await;
    let provider = Arc::new(ScriptedProvider::new(vec![stalled_text("Thinking")]));
    let config = streamchat_server::chat::SessionConfig {
        heartbeat_interval: Duration::from_millis(40),
        idle_timeout: Duration::from_millis(250),
        ..test_session_config()
    };
    let session = build_session(repo.clone(), provider, config);

    let (frames, outcome) = run_session(&session, request("hello")).await;

    assert_eq!(outcome.state, SessionState::Aborted);
    assert_eq!(outcome.abort_reason, Some(AbortReason::IdleTimeout));
    assert!(frames.iter().any(|f| matches!(f, StreamFrame::Heartbeat)));
    assert!(!frames.iter().any(StreamFrame::is_terminal));

    let conversation_id = outcome.conversation_id.unwrap();
    let stored = repo.list_recent_turns(&conversation_id, 10).await.unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[1].status, MessageStatus::Interrupted);
    assert_eq!(stored[1].content, "Thinking");
}

#[tokio::test]
async fn test_client_disconnect_aborts_session() {
    let repo = create_test_repository().await;
    let provider = Arc::new(ScriptedProvider::new(vec![stalled_text("Half")]));
    let session = build_session(repo, provider, test_session_config());

    let (mut rx, handle) = spawn_session(&session, request("hello"), CancellationToken::new());

    let outcome = tokio::time::timeout(TEST_TIMEOUT, async move {
        while let Some(frame) = rx.recv().await {
            if matches!(frame, StreamFrame::Chunk(_)) {
                break;
            }
        }
        drop(rx);
        handle.await.unwrap()
    })
    .await
    .unwrap();

    assert_eq!(outcome.state, SessionState::Aborted);
    assert_eq!(outcome.abort_reason, Some(AbortReason::ClientDisconnected));
    assert_eq!(
        outcome.assistant_message.unwrap().status,
        MessageStatus::Interrupted
    );
}

#[tokio::test]
async fn test_disconnect_before_text_arrives_is_reported_as_disconnect() {
    let repo = create_test_repository().await;
    let provider = Arc::new(ScriptedProvider::new(vec![Script::Delayed(
        Duration::from_millis(100),
        text_round("Too late"),
    )]));
    let session = build_session(repo, provider, test_session_config());

    let (mut rx, handle) = spawn_session(&session, request("hello"), CancellationToken::new());

    let outcome = tokio::time::timeout(TEST_TIMEOUT, async move {
        let first = rx.recv().await.unwrap();
        assert!(matches!(first, StreamFrame::Meta(_)));
        drop(rx);
        handle.await.unwrap()
    })
    .await
    .unwrap();

    assert_eq!(outcome.state, SessionState::Aborted);
    assert_eq!(outcome.abort_reason, Some(AbortReason::ClientDisconnected));
}

#[tokio::test]
async fn test_closing_frames_give_up_on_reader_that_stopped_draining() {
    let repo = create_test_repository().await;
    let provider = Arc::new(ScriptedProvider::with_rounds(vec![text_round("Hi")]));
    let config = streamchat_server::chat::SessionConfig {
        idle_timeout: Duration::from_millis(200),
        ..test_session_config()
    };
    let session = build_session(repo, provider, config);

    // Room for the opening meta and one chunk; nobody reads after that
    let (sink, rx) = FrameSink::channel(2);
    let outcome = tokio::time::timeout(
        TEST_TIMEOUT,
        session.run(request("hello"), sink, CancellationToken::new()),
    )
    .await
    .expect("session should not wait forever on a full channel");

    assert_eq!(outcome.state, SessionState::Complete);
    let stored = outcome.assistant_message.unwrap();
    assert_eq!(stored.status, MessageStatus::Complete);
    assert_eq!(stored.content, "Hi");
    drop(rx);
}

#[tokio::test]
async fn test_upstream_failure_ends_with_error_frame() {
    let repo = create_test_repository().await;
    let provider = Arc::new(ScriptedProvider::new(vec![Script::Fail(
        AppError::external_unavailable("Anthropic", "connection refused"),
    )]));
    let session = build_session(repo.clone(), provider, test_session_config());

    let (frames, outcome) = run_session(&session, request("hello")).await;

    assert_eq!(outcome.state, SessionState::Errored);
    assert_eq!(
        outcome.error.as_ref().unwrap().code,
        ErrorCode::ExternalServiceUnavailable
    );
    assert!(matches!(frames[0], StreamFrame::Meta(_)));
    assert_eq!(
        frames.last().unwrap(),
        &StreamFrame::error("Anthropic: connection refused")
    );
    assert!(!frames.iter().any(|f| matches!(f, StreamFrame::Done(_))));

    let stored = outcome.assistant_message.unwrap();
    assert_eq!(stored.status, MessageStatus::Error);
}

#[tokio::test]
async fn test_tool_loop_exhaustion_reports_error() {
    let repo = create_test_repository().await;
    let provider = Arc::new(ScriptedProvider::with_rounds(vec![
        tool_round("", &[("c1", "calculator", r#"{"expression":"1+1"}"#)]),
        tool_round("", &[("c2", "calculator", r#"{"expression":"2+2"}"#)]),
    ]));
    let config = streamchat_server::chat::SessionConfig {
        max_tool_rounds: 2,
        ..test_session_config()
    };
    let session = build_session(repo, provider.clone(), config);

    let (frames, outcome) = run_session(&session, request("keep calculating")).await;

    assert_eq!(provider.call_count(), 2);
    assert_eq!(
        outcome.error.unwrap().code,
        ErrorCode::ToolLoopExhausted
    );
    assert!(matches!(frames.last().unwrap(), StreamFrame::Error(_)));
}

#[tokio::test]
async fn test_unknown_conversation_fails_before_meta() {
    let repo = create_test_repository().await;
    let provider = Arc::new(ScriptedProvider::with_rounds(vec![text_round("unused")]));
    let session = build_session(repo, provider.clone(), test_session_config());

    let (frames, outcome) = run_session(
        &session,
        SessionRequest {
            conversation_id: Some("does-not-exist".to_owned()),
            ..request("hello")
        },
    )
    .await;

    assert_eq!(outcome.state, SessionState::Errored);
    assert_eq!(outcome.error.unwrap().code, ErrorCode::ResourceNotFound);
    assert_eq!(frames, vec![StreamFrame::error("Conversation not found")]);
    assert!(outcome.assistant_message.is_none());
    assert_eq!(provider.call_count(), 0);
}

#[tokio::test]
async fn test_classifier_failure_falls_back_to_default_persona() {
    let repo = create_test_repository().await;
    let provider = Arc::new(ScriptedProvider::with_rounds(vec![text_round("Hello!")]));
    let classifier_provider = Arc::new(ScriptedProvider::new(vec![Script::Fail(
        AppError::external_rate_limited("Anthropic", "slow down"),
    )]));
    let session = StreamingSession::new(
        repo,
        provider,
        Arc::new(test_registry()),
        Arc::new(ModelClassifier::new(classifier_provider, None)),
        test_session_config(),
    )
    .with_title_generator(None);

    let (frames, outcome) = run_session(&session, request("Write some code")).await;

    assert_eq!(outcome.state, SessionState::Complete);
    let StreamFrame::Meta(meta) = &frames[0] else {
        panic!("first frame should be meta");
    };
    assert_eq!(meta.persona, Persona::General);
}

#[tokio::test]
async fn test_persona_selects_system_prompt() {
    let repo = create_test_repository().await;
    let provider = Arc::new(ScriptedProvider::with_rounds(vec![
        text_round("fn main() {}"),
        text_round("Once upon a time"),
    ]));
    let session = build_session(repo, provider.clone(), test_session_config());

    run_session(&session, request("Fix this Rust compile error")).await;
    run_session(&session, request("Write a poem about the sea")).await;

    let requests = provider.requests();
    assert_eq!(
        requests[0].system.as_deref(),
        Some(persona_system_prompt(Persona::Coder))
    );
    assert_eq!(
        requests[1].system.as_deref(),
        Some(persona_system_prompt(Persona::Writer))
    );
}
