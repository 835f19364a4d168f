// ABOUTME: Upstream inference abstraction: message blocks, block events, provider trait
// ABOUTME: Rounds stream interleaved text and tool-use blocks that the round parser reassembles
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Inference Provider Interface
//!
//! One call to the upstream service is a *round*: the provider streams block
//! events describing text blocks and tool-use blocks, each addressed by an
//! index. [`round::parse_round`] turns that event stream back into text and
//! complete tool calls.
//!
//! ## Key Concepts
//!
//! - **`InferenceProvider`**: async trait that opens one round as a stream
//! - **`UpstreamEvent`**: round start, block start/delta/stop, round end, error
//! - **`ChatMessage`**: role plus content blocks, the upstream conversation format
//!
//! ## Example: Parsing a Round
//!
//! ```rust,no_run
//! use streamchat_server::llm::{ChatMessage, InferenceProvider, RoundRequest};
//! use streamchat_server::llm::round::{parse_round, NoopObserver};
//! use tokio_util::sync::CancellationToken;
//!
//! async fn example(provider: &dyn InferenceProvider) {
//!     let request = RoundRequest::new(vec![ChatMessage::user_text("Hello")]);
//!     let result = parse_round(provider, &request, &NoopObserver, &CancellationToken::new()).await;
//! }
//! ```

mod anthropic;
pub mod prompts;
pub mod round;
pub mod sse_parser;

pub use anthropic::{parse_stream_event, AnthropicConfig, AnthropicProvider};

use std::pin::Pin;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_stream::Stream;

use crate::errors::AppResult;

// ============================================================================
// Message Types
// ============================================================================

/// Upstream conversation role
///
/// Tool results travel back to the model inside a user turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// Human input and tool results
    User,
    /// Model output
    Assistant,
}

impl ChatRole {
    /// Convert to string representation for API calls
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One content block inside a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text
    Text {
        /// Text content
        text: String,
    },
    /// A tool call requested by the model
    ToolUse {
        /// Upstream-assigned call identifier
        id: String,
        /// Tool name
        name: String,
        /// Parsed input object
        input: Value,
    },
    /// The outcome of a tool call, answered back to the model
    ToolResult {
        /// Identifier of the call being answered
        tool_use_id: String,
        /// Result payload
        content: Value,
        /// Whether the payload describes a failure
        is_error: bool,
    },
}

/// A message in the upstream conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Sender role
    pub role: ChatRole,
    /// Ordered content blocks
    pub content: Vec<ContentBlock>,
}

impl ChatMessage {
    /// Create a user message containing one text block
    #[must_use]
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    /// Create an assistant message containing one text block
    #[must_use]
    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    /// Create an assistant turn from the blocks a round produced
    #[must_use]
    pub const fn assistant_blocks(content: Vec<ContentBlock>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content,
        }
    }

    /// Create the user turn answering a set of tool calls
    #[must_use]
    pub fn tool_results(results: Vec<ToolResult>) -> Self {
        Self {
            role: ChatRole::User,
            content: results.into_iter().map(ContentBlock::from).collect(),
        }
    }

    /// Concatenated text of every text block
    #[must_use]
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// A complete tool call reassembled from a tool-use block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Upstream-assigned call identifier
    pub id: String,
    /// Tool name
    pub name: String,
    /// Parsed input object
    pub input: Value,
}

/// Outcome of executing one tool call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Identifier of the call being answered
    pub tool_use_id: String,
    /// Result payload
    pub content: Value,
    /// Whether the payload describes a failure
    pub is_error: bool,
}

impl ToolResult {
    /// Successful result
    #[must_use]
    pub fn success(tool_use_id: impl Into<String>, content: Value) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            content,
            is_error: false,
        }
    }

    /// Error result with a `{"error": message}` payload
    #[must_use]
    pub fn error(tool_use_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            content: serde_json::json!({ "error": message.into() }),
            is_error: true,
        }
    }
}

impl From<ToolResult> for ContentBlock {
    fn from(result: ToolResult) -> Self {
        Self::ToolResult {
            tool_use_id: result.tool_use_id,
            content: result.content,
            is_error: result.is_error,
        }
    }
}

/// Tool description advertised to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Tool name
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// JSON Schema for the input object
    pub input_schema: Value,
}

/// Token usage reported by the upstream service
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Input tokens, if reported
    pub input_tokens: Option<u32>,
    /// Output tokens, if reported
    pub output_tokens: Option<u32>,
}

impl TokenUsage {
    /// Sum two usage reports; unknown stays unknown only when both are unknown
    #[must_use]
    pub fn add(self, other: Self) -> Self {
        Self {
            input_tokens: sum_optional(self.input_tokens, other.input_tokens),
            output_tokens: sum_optional(self.output_tokens, other.output_tokens),
        }
    }
}

fn sum_optional(a: Option<u32>, b: Option<u32>) -> Option<u32> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.saturating_add(b)),
        (Some(v), None) | (None, Some(v)) => Some(v),
        (None, None) => None,
    }
}

// ============================================================================
// Block Events
// ============================================================================

/// Kind of block announced by a block-start event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockKind {
    /// Text block
    Text,
    /// Tool-use block with its identity
    ToolUse {
        /// Upstream-assigned call identifier
        id: String,
        /// Tool name
        name: String,
    },
}

/// Payload of a block-delta event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockDelta {
    /// Text fragment for a text block
    Text(String),
    /// Serialized JSON fragment for a tool-use block's input
    InputJson(String),
}

/// One event of an upstream round
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamEvent {
    /// Round opened
    RoundStart {
        /// Input tokens, if reported
        input_tokens: Option<u32>,
    },
    /// A block at `index` started
    BlockStart {
        /// Block position within the round
        index: usize,
        /// Block kind
        kind: BlockKind,
    },
    /// A fragment for the block at `index`
    BlockDelta {
        /// Block position within the round
        index: usize,
        /// Fragment payload
        delta: BlockDelta,
    },
    /// The block at `index` is complete
    BlockStop {
        /// Block position within the round
        index: usize,
    },
    /// Round closed
    RoundEnd {
        /// Output tokens, if reported
        output_tokens: Option<u32>,
        /// Why the model stopped
        stop_reason: Option<String>,
    },
    /// Upstream reported a failure mid-stream
    Error {
        /// Error message
        message: String,
    },
}

/// Stream of events for one round
pub type UpstreamStream = Pin<Box<dyn Stream<Item = AppResult<UpstreamEvent>> + Send>>;

/// Request for one round
#[derive(Debug, Clone, Default)]
pub struct RoundRequest {
    /// Model override (provider default when `None`)
    pub model: Option<String>,
    /// System instruction
    pub system: Option<String>,
    /// Conversation so far
    pub messages: Vec<ChatMessage>,
    /// Tools the model may call
    pub tools: Vec<ToolSchema>,
    /// Output token budget override
    pub max_tokens: Option<u32>,
}

impl RoundRequest {
    /// Create a request over a conversation
    #[must_use]
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    /// Set the model
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the system instruction
    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Set the tool catalog
    #[must_use]
    pub fn with_tools(mut self, tools: Vec<ToolSchema>) -> Self {
        self.tools = tools;
        self
    }

    /// Set the output token budget
    #[must_use]
    pub const fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

// ============================================================================
// Provider Trait
// ============================================================================

/// Upstream inference service
///
/// Implementations open a round and return its events as a stream. Stream
/// errors and `UpstreamEvent::Error` are both fatal to the round.
#[async_trait]
pub trait InferenceProvider: Send + Sync {
    /// Provider name for logs and error messages
    fn name(&self) -> &'static str;

    /// Model used when a request does not name one
    fn default_model(&self) -> &str;

    /// Open one round
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be sent or the service rejects it
    async fn stream_round(&self, request: &RoundRequest) -> AppResult<UpstreamStream>;
}
