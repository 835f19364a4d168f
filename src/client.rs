// ABOUTME: HTTP client for the streaming chat endpoint
// ABOUTME: Posts a message with a bearer token and decodes the response into typed frames
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Chat Stream Client
//!
//! ```rust,no_run
//! use futures_util::StreamExt;
//! use streamchat_server::client::ChatStreamClient;
//!
//! # async fn run() -> streamchat_server::errors::AppResult<()> {
//! let client = ChatStreamClient::new("http://localhost:8081", "token")?;
//! let reply = client.send("What's 2+2?", None).await?.collect_reply().await?;
//! println!("{}", reply.text);
//! # Ok(())
//! # }
//! ```

use std::pin::Pin;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use reqwest::Client;
use serde::Serialize;

use crate::constants::{endpoints, llm::CONNECT_TIMEOUT_SECS};
use crate::errors::{AppError, AppResult, ErrorResponse};
use crate::llm::TokenUsage;
use crate::protocol::{decode_frames, MetaPayload, StreamFrame};

/// Typed frames from one chat response
pub type FrameStream = Pin<Box<dyn Stream<Item = AppResult<StreamFrame>> + Send>>;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StreamBody<'a> {
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    conversation_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<&'a str>,
}

/// Client for `POST /api/chat/stream`
#[derive(Clone)]
pub struct ChatStreamClient {
    client: Client,
    base_url: String,
    token: String,
}

impl ChatStreamClient {
    /// Create a client for the server at `base_url`
    ///
    /// # Errors
    ///
    /// Returns an internal error if the HTTP client cannot be built
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> AppResult<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| AppError::internal(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            token: token.into(),
        })
    }

    /// Send a message and open its frame stream
    ///
    /// # Errors
    ///
    /// Returns the server's error when it rejects the request before
    /// streaming, or an external-service error if the request fails
    pub async fn send(
        &self,
        message: &str,
        conversation_id: Option<&str>,
    ) -> AppResult<ChatResponseStream> {
        self.send_with_title(message, conversation_id, None).await
    }

    /// Send a message, naming the conversation if it is new
    ///
    /// A `title` is ignored for a conversation that already has one.
    ///
    /// # Errors
    ///
    /// Same as [`Self::send`]
    pub async fn send_with_title(
        &self,
        message: &str,
        conversation_id: Option<&str>,
        title: Option<&str>,
    ) -> AppResult<ChatResponseStream> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, endpoints::CHAT_STREAM))
            .bearer_auth(&self.token)
            .json(&StreamBody {
                message,
                conversation_id,
                title,
            })
            .send()
            .await
            .map_err(|e| AppError::external_service("Chat server", e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match serde_json::from_str::<ErrorResponse>(&body) {
                Ok(parsed) => AppError::new(parsed.error.code, parsed.error.message),
                Err(_) => AppError::external_service(
                    "Chat server",
                    format!("HTTP {}: {body}", status.as_u16()),
                ),
            });
        }

        Ok(ChatResponseStream {
            frames: Box::pin(decode_frames(response.bytes_stream())),
        })
    }
}

/// Decoded frames of one response
pub struct ChatResponseStream {
    frames: FrameStream,
}

impl ChatResponseStream {
    /// Wrap an already-decoded frame stream
    #[must_use]
    pub fn from_frames(frames: FrameStream) -> Self {
        Self { frames }
    }

    /// Next frame, heartbeats included
    pub async fn next_frame(&mut self) -> Option<AppResult<StreamFrame>> {
        self.frames.next().await
    }

    /// Drain the stream into a reply
    ///
    /// # Errors
    ///
    /// Returns the server's `error` frame as an error, a decode error, or an
    /// internal error if the stream ends without a terminal frame
    pub async fn collect_reply(mut self) -> AppResult<ChatReply> {
        let mut reply = ChatReply::default();
        while let Some(frame) = self.next_frame().await {
            match frame? {
                StreamFrame::Meta(meta) => reply.meta = Some(meta),
                StreamFrame::Chunk(chunk) => reply.text.push_str(&chunk.delta),
                StreamFrame::Title(title) => reply.title = Some(title.title),
                StreamFrame::ToolUse(tool) => reply.tools_used.push(tool.tool),
                StreamFrame::Done(done) => {
                    reply.usage = TokenUsage {
                        input_tokens: done.usage.input_tokens,
                        output_tokens: done.usage.output_tokens,
                    };
                    return Ok(reply);
                }
                StreamFrame::Error(error) => {
                    return Err(AppError::external_service("Chat server", error.message))
                }
                StreamFrame::Heartbeat => reply.heartbeats += 1,
            }
        }
        Err(AppError::internal("Chat stream ended without a terminal frame"))
    }
}

/// Everything a completed response carried
#[derive(Debug, Clone, Default)]
pub struct ChatReply {
    /// Most recent `meta` payload
    pub meta: Option<MetaPayload>,
    /// Concatenated `chunk` deltas
    pub text: String,
    /// Generated title, if one arrived
    pub title: Option<String>,
    /// Tool names from `tool_use` notices
    pub tools_used: Vec<String>,
    /// Usage from `done`
    pub usage: TokenUsage,
    /// Heartbeats seen
    pub heartbeats: usize,
}
