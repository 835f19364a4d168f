// ABOUTME: Shared test utilities and setup functions for integration tests
// ABOUTME: Provides a scripted upstream provider, test tools, repositories, and session wiring
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence
#![allow(
    dead_code,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    clippy::module_name_repetitions,
    clippy::too_many_lines,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic
)]
//! Shared test utilities for `streamchat_server`

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use serde_json::{json, Value};
use streamchat_server::{
    auth::AuthManager,
    chat::{KeywordClassifier, SessionConfig, StreamingSession, TitleGenerator},
    database::{ChatRepository, SqliteChatRepository},
    errors::{AppError, AppResult},
    llm::{
        BlockDelta, BlockKind, InferenceProvider, RoundRequest, UpstreamEvent, UpstreamStream,
    },
    resources::ServerResources,
    tools::{ChatTool, ToolExecutionContext, ToolRegistry},
};

static INIT_LOGGER: Once = Once::new();

/// Initialize quiet logging for tests (call once per test process)
pub fn init_test_logging() {
    INIT_LOGGER.call_once(|| {
        let log_level = match std::env::var("TEST_LOG").as_deref() {
            Ok("TRACE") => tracing::Level::TRACE,
            Ok("DEBUG") => tracing::Level::DEBUG,
            Ok("INFO") => tracing::Level::INFO,
            Ok("WARN" | "ERROR") | _ => tracing::Level::WARN,
        };

        tracing_subscriber::fmt()
            .with_max_level(log_level)
            .with_test_writer()
            .init();
    });
}

pub const TEST_JWT_SECRET: &[u8] = b"integration-test-secret-0123456789";

// ============================================================================
// Scripted Upstream
// ============================================================================

/// What the scripted provider does for one round
#[derive(Debug, Clone)]
pub enum Script {
    /// Emit these events, then end
    Events(Vec<UpstreamEvent>),
    /// Emit these events, then hang forever
    Stall(Vec<UpstreamEvent>),
    /// Wait before opening the stream, then emit these events
    Delayed(Duration, Vec<UpstreamEvent>),
    /// Fail before opening the stream
    Fail(AppError),
}

/// Inference provider replaying canned rounds in order
#[derive(Default)]
pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<RoundRequest>>,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Rounds that each emit `events`
    pub fn with_rounds(rounds: Vec<Vec<UpstreamEvent>>) -> Self {
        Self::new(rounds.into_iter().map(Script::Events).collect())
    }

    /// Every request received so far
    pub fn requests(&self) -> Vec<RoundRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn remaining(&self) -> usize {
        self.scripts.lock().unwrap().len()
    }
}

#[async_trait]
impl InferenceProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn default_model(&self) -> &str {
        "scripted-model"
    }

    async fn stream_round(&self, request: &RoundRequest) -> AppResult<UpstreamStream> {
        self.requests.lock().unwrap().push(request.clone());
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| AppError::internal("Scripted provider ran out of rounds"))?;

        match script {
            Script::Events(events) => Ok(stream::iter(events.into_iter().map(Ok)).boxed()),
            Script::Stall(events) => Ok(stream::iter(events.into_iter().map(Ok))
                .chain(stream::pending())
                .boxed()),
            Script::Delayed(delay, events) => {
                tokio::time::sleep(delay).await;
                Ok(stream::iter(events.into_iter().map(Ok)).boxed())
            }
            Script::Fail(error) => Err(error),
        }
    }
}

/// A round emitting one text block
pub fn text_round(text: &str) -> Vec<UpstreamEvent> {
    vec![
        UpstreamEvent::RoundStart {
            input_tokens: Some(10),
        },
        UpstreamEvent::BlockStart {
            index: 0,
            kind: BlockKind::Text,
        },
        UpstreamEvent::BlockDelta {
            index: 0,
            delta: BlockDelta::Text(text.to_owned()),
        },
        UpstreamEvent::BlockStop { index: 0 },
        UpstreamEvent::RoundEnd {
            output_tokens: Some(5),
            stop_reason: Some("end_turn".to_owned()),
        },
    ]
}

/// A round emitting optional text followed by tool calls `(id, name, input json)`
pub fn tool_round(text: &str, calls: &[(&str, &str, &str)]) -> Vec<UpstreamEvent> {
    let mut events = vec![UpstreamEvent::RoundStart {
        input_tokens: Some(10),
    }];
    let mut index = 0;
    if !text.is_empty() {
        events.push(UpstreamEvent::BlockStart {
            index,
            kind: BlockKind::Text,
        });
        events.push(UpstreamEvent::BlockDelta {
            index,
            delta: BlockDelta::Text(text.to_owned()),
        });
        events.push(UpstreamEvent::BlockStop { index });
        index += 1;
    }
    for (id, name, input) in calls {
        events.push(UpstreamEvent::BlockStart {
            index,
            kind: BlockKind::ToolUse {
                id: (*id).to_owned(),
                name: (*name).to_owned(),
            },
        });
        events.push(UpstreamEvent::BlockDelta {
            index,
            delta: BlockDelta::InputJson((*input).to_owned()),
        });
        events.push(UpstreamEvent::BlockStop { index });
        index += 1;
    }
    events.push(UpstreamEvent::RoundEnd {
        output_tokens: Some(7),
        stop_reason: Some("tool_use".to_owned()),
    });
    events
}

// ============================================================================
// Test Tools
// ============================================================================

/// Search tool answering every query with a fixed date
pub struct WebSearchTool;

#[async_trait]
impl ChatTool for WebSearchTool {
    fn name(&self) -> &'static str {
        "web_search"
    }

    fn description(&self) -> &'static str {
        "Search the web"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "query": { "type": "string" } },
            "required": ["query"]
        })
    }

    async fn execute(&self, input: Value, _context: &ToolExecutionContext) -> AppResult<Value> {
        Ok(json!({
            "query": input["query"],
            "results": ["Today is 2025-06-01"]
        }))
    }
}

/// Tool that always fails
pub struct FailingTool;

#[async_trait]
impl ChatTool for FailingTool {
    fn name(&self) -> &'static str {
        "always_fails"
    }

    fn description(&self) -> &'static str {
        "Fails every time"
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _input: Value, _context: &ToolExecutionContext) -> AppResult<Value> {
        Err(AppError::external_service("Search backend", "backend offline"))
    }
}

/// Built-in tools plus the test tools
pub fn test_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::with_builtin_tools();
    registry.register(Arc::new(WebSearchTool));
    registry.register(Arc::new(FailingTool));
    registry
}

// ============================================================================
// Persistence and Sessions
// ============================================================================

pub async fn create_test_repository() -> Arc<SqliteChatRepository> {
    init_test_logging();
    Arc::new(
        SqliteChatRepository::in_memory()
            .await
            .expect("in-memory repository"),
    )
}

/// Session config with fast timers and whole-fragment chunks
pub fn test_session_config() -> SessionConfig {
    SessionConfig {
        heartbeat_interval: Duration::from_secs(30),
        idle_timeout: Duration::from_secs(30),
        chunk_chars: 0,
        ..SessionConfig::default()
    }
}

/// Session over `provider` with keyword personas and no title generation
pub fn build_session(
    repository: Arc<dyn ChatRepository>,
    provider: Arc<dyn InferenceProvider>,
    config: SessionConfig,
) -> StreamingSession {
    StreamingSession::new(
        repository,
        provider,
        Arc::new(test_registry()),
        Arc::new(KeywordClassifier::new().expect("keyword rules")),
        config,
    )
    .with_title_generator(None)
}

/// Session that generates titles through `title_provider`
pub fn build_session_with_titles(
    repository: Arc<dyn ChatRepository>,
    provider: Arc<dyn InferenceProvider>,
    title_provider: Arc<dyn InferenceProvider>,
    config: SessionConfig,
) -> StreamingSession {
    build_session(repository, provider, config)
        .with_title_generator(Some(TitleGenerator::new(title_provider, None)))
}

pub fn test_auth_manager() -> AuthManager {
    AuthManager::new(TEST_JWT_SECRET, 24)
}

/// Server resources over an in-memory repository and a scripted provider
pub async fn create_test_resources(provider: Arc<ScriptedProvider>) -> Arc<ServerResources> {
    let repository = create_test_repository().await;
    let session = build_session(repository.clone(), provider, test_session_config());
    Arc::new(ServerResources::new(test_auth_manager(), repository, session).with_max_message_chars(200))
}
