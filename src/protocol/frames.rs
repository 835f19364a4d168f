// ABOUTME: Named stream frames sent from session to client and their text encoding
// ABOUTME: Each frame is `event: <name>` plus JSON `data:` lines and a blank line
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use axum::response::sse::Event;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::errors::{AppError, AppResult};
use crate::llm::{TokenUsage, ToolCall};
use crate::models::Persona;

/// Frame names as they appear after `event:`
pub mod names {
    /// Session metadata
    pub const META: &str = "meta";
    /// Text delta
    pub const CHUNK: &str = "chunk";
    /// Generated conversation title
    pub const TITLE: &str = "title";
    /// Advisory tool invocation notice
    pub const TOOL_USE: &str = "tool_use";
    /// Successful end of stream
    pub const DONE: &str = "done";
    /// Failed end of stream
    pub const ERROR: &str = "error";
}

/// Comment text written for heartbeats
pub const HEARTBEAT_COMMENT: &str = "keep-alive";

/// Session metadata, sent first and again before `done` with the stored reply ID
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaPayload {
    /// Conversation the turn belongs to
    pub conversation_id: String,
    /// Persona selected for this turn
    pub persona: Persona,
    /// Stored user message ID
    pub user_message_id: String,
    /// Stored assistant message ID, once persisted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistant_message_id: Option<String>,
    /// Model generating the reply
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Text delta
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkPayload {
    /// Text fragment
    pub delta: String,
}

/// Conversation title
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TitlePayload {
    /// Title text
    pub title: String,
}

/// Tool invocation notice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolUsePayload {
    /// Tool name
    pub tool: String,
    /// Input the model passed
    pub parameters: Value,
}

/// Token usage in `done`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsagePayload {
    /// Input tokens across all rounds, if reported
    #[serde(default)]
    pub input_tokens: Option<u32>,
    /// Output tokens across all rounds, if reported
    #[serde(default)]
    pub output_tokens: Option<u32>,
}

impl From<TokenUsage> for UsagePayload {
    fn from(usage: TokenUsage) -> Self {
        Self {
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
        }
    }
}

/// Successful end of stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DonePayload {
    /// Token usage
    #[serde(default)]
    pub usage: UsagePayload,
}

/// Failed end of stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    /// Human-readable message
    pub message: String,
}

/// One frame on the stream
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    /// `meta`
    Meta(MetaPayload),
    /// `chunk`
    Chunk(ChunkPayload),
    /// `title`
    Title(TitlePayload),
    /// `tool_use`
    ToolUse(ToolUsePayload),
    /// `done`
    Done(DonePayload),
    /// `error`
    Error(ErrorPayload),
    /// Comment line keeping the connection alive
    Heartbeat,
}

impl StreamFrame {
    /// Text delta frame
    #[must_use]
    pub fn chunk(delta: impl Into<String>) -> Self {
        Self::Chunk(ChunkPayload {
            delta: delta.into(),
        })
    }

    /// Title frame
    #[must_use]
    pub fn title(title: impl Into<String>) -> Self {
        Self::Title(TitlePayload {
            title: title.into(),
        })
    }

    /// Tool notice for a completed tool call
    #[must_use]
    pub fn tool_use(call: &ToolCall) -> Self {
        Self::ToolUse(ToolUsePayload {
            tool: call.name.clone(),
            parameters: call.input.clone(),
        })
    }

    /// Done frame
    #[must_use]
    pub fn done(usage: TokenUsage) -> Self {
        Self::Done(DonePayload {
            usage: usage.into(),
        })
    }

    /// Error frame
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(ErrorPayload {
            message: message.into(),
        })
    }

    /// Event name, or `None` for heartbeats
    #[must_use]
    pub const fn event_name(&self) -> Option<&'static str> {
        match self {
            Self::Meta(_) => Some(names::META),
            Self::Chunk(_) => Some(names::CHUNK),
            Self::Title(_) => Some(names::TITLE),
            Self::ToolUse(_) => Some(names::TOOL_USE),
            Self::Done(_) => Some(names::DONE),
            Self::Error(_) => Some(names::ERROR),
            Self::Heartbeat => None,
        }
    }

    /// Whether this frame ends the stream
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Done(_) | Self::Error(_))
    }

    /// JSON payload for the `data:` lines
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the payload cannot be encoded
    pub fn payload_json(&self) -> AppResult<String> {
        let json = match self {
            Self::Meta(payload) => serde_json::to_string(payload)?,
            Self::Chunk(payload) => serde_json::to_string(payload)?,
            Self::Title(payload) => serde_json::to_string(payload)?,
            Self::ToolUse(payload) => serde_json::to_string(payload)?,
            Self::Done(payload) => serde_json::to_string(payload)?,
            Self::Error(payload) => serde_json::to_string(payload)?,
            Self::Heartbeat => String::new(),
        };
        Ok(json)
    }

    /// Encode as wire text
    ///
    /// Payloads containing newlines are split over several `data:` lines.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the payload cannot be encoded
    pub fn encode(&self) -> AppResult<String> {
        let Some(name) = self.event_name() else {
            return Ok(format!(":{HEARTBEAT_COMMENT}\n\n"));
        };
        let payload = self.payload_json()?;
        let mut out = format!("event: {name}\n");
        for line in payload.split('\n') {
            out.push_str("data: ");
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
        Ok(out)
    }

    /// Convert to an axum SSE event
    #[must_use]
    pub fn to_sse_event(&self) -> Event {
        let Some(name) = self.event_name() else {
            return Event::default().comment(HEARTBEAT_COMMENT);
        };
        match self.payload_json() {
            Ok(json) => Event::default().event(name).data(json),
            Err(e) => {
                warn!(frame = name, error = %e, "Failed to encode frame payload");
                Event::default()
                    .event(names::ERROR)
                    .data(r#"{"message":"Failed to encode frame"}"#)
            }
        }
    }

    /// Rebuild a frame from its event name and joined data
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for unknown names and a serialization error for
    /// payloads that do not match the named frame
    pub fn decode(name: &str, data: &str) -> AppResult<Self> {
        let frame = match name {
            names::META => Self::Meta(serde_json::from_str(data)?),
            names::CHUNK => Self::Chunk(serde_json::from_str(data)?),
            names::TITLE => Self::Title(serde_json::from_str(data)?),
            names::TOOL_USE => Self::ToolUse(serde_json::from_str(data)?),
            names::DONE => Self::Done(serde_json::from_str(data)?),
            names::ERROR => Self::Error(serde_json::from_str(data)?),
            other => {
                return Err(AppError::invalid_input(format!(
                    "Unknown frame name: {other}"
                )))
            }
        };
        Ok(frame)
    }
}
