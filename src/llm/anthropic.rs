// ABOUTME: Messages API provider streaming block events over SSE
// ABOUTME: Maps wire events to UpstreamEvent and HTTP failures to AppError codes
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Anthropic Messages Provider
//!
//! Streams one round per request. Each SSE `data:` payload carries a `type`
//! field (`message_start`, `content_block_start`, `content_block_delta`,
//! `content_block_stop`, `message_delta`, `message_stop`, `ping`, `error`)
//! which maps one-to-one onto [`UpstreamEvent`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, instrument, warn};

use super::sse_parser::{
    create_sse_stream, is_retryable_request_error, is_retryable_status, RetryConfig,
};
use super::{
    BlockDelta, BlockKind, ChatMessage, ContentBlock, InferenceProvider, RoundRequest,
    UpstreamEvent, UpstreamStream,
};
use crate::constants::llm::{
    API_VERSION, CONNECT_TIMEOUT_SECS, DEFAULT_BASE_URL, DEFAULT_MAX_TOKENS, DEFAULT_MODEL,
};
use crate::errors::{AppError, AppResult};

const PROVIDER_NAME: &str = "Anthropic";

/// Provider configuration
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    /// API key sent as `x-api-key`
    pub api_key: String,
    /// Base URL without the `/v1/messages` suffix
    pub base_url: String,
    /// Model used when a request does not name one
    pub default_model: String,
    /// Output token budget used when a request does not set one
    pub max_tokens: u32,
    /// Retry policy for opening a stream
    pub retry: RetryConfig,
}

impl AnthropicConfig {
    /// Configuration with default URL, model, and budget
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_owned(),
            default_model: DEFAULT_MODEL.to_owned(),
            max_tokens: DEFAULT_MAX_TOKENS,
            retry: RetryConfig::default_config(),
        }
    }
}

/// Streaming Messages API client
pub struct AnthropicProvider {
    client: Client,
    config: AnthropicConfig,
}

impl AnthropicProvider {
    /// Create a new provider with the given configuration
    ///
    /// No overall request timeout is set: rounds stream for as long as the
    /// model writes, and session idle timeouts bound them instead.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(config: AnthropicConfig) -> AppResult<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| AppError::internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    fn api_url(&self) -> String {
        format!("{}/v1/messages", self.config.base_url.trim_end_matches('/'))
    }

    fn build_body<'a>(&'a self, request: &'a RoundRequest) -> MessagesRequest<'a> {
        MessagesRequest {
            model: request
                .model
                .as_deref()
                .unwrap_or(&self.config.default_model),
            max_tokens: request.max_tokens.unwrap_or(self.config.max_tokens),
            system: request.system.as_deref(),
            messages: request.messages.iter().map(WireMessage::from).collect(),
            tools: request
                .tools
                .iter()
                .map(|tool| WireTool {
                    name: &tool.name,
                    description: &tool.description,
                    input_schema: &tool.input_schema,
                })
                .collect(),
            stream: true,
        }
    }

    async fn send_with_retry(&self, body: &MessagesRequest<'_>) -> AppResult<reqwest::Response> {
        let retry = &self.config.retry;
        let mut attempt = 0;
        loop {
            let sent = self
                .client
                .post(self.api_url())
                .header("x-api-key", &self.config.api_key)
                .header("anthropic-version", API_VERSION)
                .header("content-type", "application/json")
                .json(body)
                .send()
                .await;

            match sent {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response)
                    if is_retryable_status(response.status().as_u16())
                        && attempt < retry.max_retries =>
                {
                    warn!(
                        status = response.status().as_u16(),
                        attempt, "Retryable upstream status"
                    );
                }
                Ok(response) => {
                    let status = response.status();
                    let text = response.text().await.unwrap_or_default();
                    return Err(parse_error_response(status, &text));
                }
                Err(e) if is_retryable_request_error(&e) && attempt < retry.max_retries => {
                    warn!(attempt, error = %e, "Retryable upstream connection failure");
                }
                Err(e) => {
                    error!("Failed to send streaming request to {PROVIDER_NAME}: {e}");
                    return Err(if e.is_connect() || e.is_timeout() {
                        AppError::external_unavailable(PROVIDER_NAME, format!("Cannot connect: {e}"))
                    } else {
                        AppError::external_service(PROVIDER_NAME, format!("Request failed: {e}"))
                    });
                }
            }

            tokio::time::sleep(retry.delay_for_attempt(attempt)).await;
            attempt += 1;
        }
    }
}

#[async_trait]
impl InferenceProvider for AnthropicProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    fn default_model(&self) -> &str {
        &self.config.default_model
    }

    #[instrument(skip(self, request), fields(model = %request.model.as_deref().unwrap_or(&self.config.default_model)))]
    async fn stream_round(&self, request: &RoundRequest) -> AppResult<UpstreamStream> {
        let body = self.build_body(request);
        debug!(
            messages = body.messages.len(),
            tools = body.tools.len(),
            "Opening upstream round"
        );

        let response = self.send_with_retry(&body).await?;
        Ok(create_sse_stream(
            response.bytes_stream(),
            parse_stream_event,
            PROVIDER_NAME,
        ))
    }
}

/// Map an error response to an `AppError`
fn parse_error_response(status: StatusCode, body: &str) -> AppError {
    let message = serde_json::from_str::<WireErrorEnvelope>(body).map_or_else(
        |_| body.chars().take(200).collect::<String>(),
        |envelope| envelope.error.message,
    );

    match status.as_u16() {
        401 | 403 => AppError::external_service(
            PROVIDER_NAME,
            format!("API authentication failed: {message}"),
        ),
        429 => AppError::external_rate_limited(PROVIDER_NAME, message),
        400 | 404 | 413 => {
            AppError::external_service(PROVIDER_NAME, format!("Request rejected ({status}): {message}"))
        }
        502..=504 | 529 => AppError::external_unavailable(PROVIDER_NAME, message),
        _ => AppError::external_service(PROVIDER_NAME, format!("API error ({status}): {message}")),
    }
}

/// Parse one SSE `data:` payload into an upstream event
///
/// Returns `None` for events that carry nothing the round parser needs
/// (`ping`, `message_stop`, unknown types) and for payloads that fail to parse.
#[must_use]
pub fn parse_stream_event(payload: &str) -> Option<AppResult<UpstreamEvent>> {
    let event = match serde_json::from_str::<WireStreamEvent>(payload) {
        Ok(event) => event,
        Err(e) => {
            warn!("Failed to parse stream event: {e}");
            return None;
        }
    };

    let mapped = match event {
        WireStreamEvent::MessageStart { message } => UpstreamEvent::RoundStart {
            input_tokens: message.usage.and_then(|usage| usage.input_tokens),
        },
        WireStreamEvent::ContentBlockStart {
            index,
            content_block,
        } => {
            let kind = match content_block {
                WireBlockStart::Text { .. } => BlockKind::Text,
                WireBlockStart::ToolUse { id, name } => BlockKind::ToolUse { id, name },
                WireBlockStart::Other => {
                    debug!(index, "Skipping unsupported content block");
                    return None;
                }
            };
            UpstreamEvent::BlockStart { index, kind }
        }
        WireStreamEvent::ContentBlockDelta { index, delta } => {
            let delta = match delta {
                WireDelta::TextDelta { text } => BlockDelta::Text(text),
                WireDelta::InputJsonDelta { partial_json } => BlockDelta::InputJson(partial_json),
                WireDelta::Other => return None,
            };
            UpstreamEvent::BlockDelta { index, delta }
        }
        WireStreamEvent::ContentBlockStop { index } => UpstreamEvent::BlockStop { index },
        WireStreamEvent::MessageDelta { delta, usage } => UpstreamEvent::RoundEnd {
            output_tokens: usage.and_then(|usage| usage.output_tokens),
            stop_reason: delta.and_then(|delta| delta.stop_reason),
        },
        WireStreamEvent::Error { error } => UpstreamEvent::Error {
            message: error.message,
        },
        WireStreamEvent::MessageStop | WireStreamEvent::Ping | WireStreamEvent::Unknown => {
            return None
        }
    };
    Some(Ok(mapped))
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: Vec<WireBlock<'a>>,
}

impl<'a> From<&'a ChatMessage> for WireMessage<'a> {
    fn from(message: &'a ChatMessage) -> Self {
        Self {
            role: message.role.as_str(),
            content: message.content.iter().map(WireBlock::from).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireBlock<'a> {
    Text {
        text: &'a str,
    },
    ToolUse {
        id: &'a str,
        name: &'a str,
        input: &'a Value,
    },
    ToolResult {
        tool_use_id: &'a str,
        content: String,
        is_error: bool,
    },
}

impl<'a> From<&'a ContentBlock> for WireBlock<'a> {
    fn from(block: &'a ContentBlock) -> Self {
        match block {
            ContentBlock::Text { text } => Self::Text { text },
            ContentBlock::ToolUse { id, name, input } => Self::ToolUse { id, name, input },
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => Self::ToolResult {
                tool_use_id,
                content: match content {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                },
                is_error: *is_error,
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct WireTool<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a Value,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireStreamEvent {
    MessageStart {
        message: WireMessageStart,
    },
    ContentBlockStart {
        index: usize,
        content_block: WireBlockStart,
    },
    ContentBlockDelta {
        index: usize,
        delta: WireDelta,
    },
    ContentBlockStop {
        index: usize,
    },
    MessageDelta {
        #[serde(default)]
        delta: Option<WireMessageDelta>,
        #[serde(default)]
        usage: Option<WireUsage>,
    },
    MessageStop,
    Ping,
    Error {
        error: WireErrorBody,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct WireMessageStart {
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: Option<u32>,
    #[serde(default)]
    output_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireBlockStart {
    Text {
        #[serde(default)]
        #[allow(dead_code)]
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireDelta {
    TextDelta {
        text: String,
    },
    InputJsonDelta {
        partial_json: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct WireMessageDelta {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireErrorEnvelope {
    error: WireErrorBody,
}

#[derive(Debug, Deserialize)]
struct WireErrorBody {
    message: String,
}
