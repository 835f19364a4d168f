// ABOUTME: Round parser that rebuilds text and tool calls from interleaved block events
// ABOUTME: Emits text as it arrives and each tool call once its block completes
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Round Parser
//!
//! Blocks are addressed by index and their deltas may interleave. Every
//! started block owns a buffer: text deltas are appended and forwarded to the
//! observer immediately, tool-use input fragments are concatenated and only
//! parsed as JSON when the block stops.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{
    BlockDelta, BlockKind, ContentBlock, InferenceProvider, RoundRequest, TokenUsage, ToolCall,
    UpstreamEvent,
};
use crate::errors::{AppError, AppResult};

/// Receives incremental output while a round is parsed
#[async_trait]
pub trait RoundObserver: Send + Sync {
    /// A text fragment arrived, in arrival order
    async fn on_text(&self, delta: &str);

    /// A tool-use block completed
    fn on_tool_use(&self, call: &ToolCall);
}

/// Observer that discards everything
pub struct NoopObserver;

#[async_trait]
impl RoundObserver for NoopObserver {
    async fn on_text(&self, _delta: &str) {}

    fn on_tool_use(&self, _call: &ToolCall) {}
}

/// Everything a round produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoundResult {
    /// Text deltas concatenated in arrival order
    pub text: String,
    /// Finalized blocks in block-start arrival order, ready to append as the assistant turn
    pub blocks: Vec<ContentBlock>,
    /// Tool calls in the order their blocks started
    pub tool_calls: Vec<ToolCall>,
    /// Token usage for this round
    pub usage: TokenUsage,
    /// Reason the model stopped, if reported
    pub stop_reason: Option<String>,
}

impl RoundResult {
    /// Whether the model asked for any tools
    #[must_use]
    pub fn wants_tools(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

#[derive(Debug)]
enum BlockBuffer {
    Text(String),
    ToolUse {
        id: String,
        name: String,
        input_json: String,
    },
}

/// Output of applying one event
#[derive(Debug)]
enum Applied {
    Nothing,
    Text(String),
    ToolUse(ToolCall),
}

/// Per-round parse state
#[derive(Debug, Default)]
struct RoundAccumulator {
    open: HashMap<usize, BlockBuffer>,
    finished: HashMap<usize, ContentBlock>,
    start_order: Vec<usize>,
    result: RoundResult,
}

impl RoundAccumulator {
    fn apply(&mut self, event: UpstreamEvent) -> AppResult<Applied> {
        match event {
            UpstreamEvent::RoundStart { input_tokens } => {
                self.result.usage.input_tokens = input_tokens;
                Ok(Applied::Nothing)
            }
            UpstreamEvent::BlockStart { index, kind } => {
                if self.open.contains_key(&index) || self.finished.contains_key(&index) {
                    warn!(index, "Ignoring duplicate block start");
                    return Ok(Applied::Nothing);
                }
                let buffer = match kind {
                    BlockKind::Text => BlockBuffer::Text(String::new()),
                    BlockKind::ToolUse { id, name } => BlockBuffer::ToolUse {
                        id,
                        name,
                        input_json: String::new(),
                    },
                };
                self.open.insert(index, buffer);
                self.start_order.push(index);
                Ok(Applied::Nothing)
            }
            UpstreamEvent::BlockDelta { index, delta } => Ok(self.apply_delta(index, delta)),
            UpstreamEvent::BlockStop { index } => {
                let Some(buffer) = self.open.remove(&index) else {
                    debug!(index, "Block stop for unknown index");
                    return Ok(Applied::Nothing);
                };
                Ok(self.finalize(index, buffer))
            }
            UpstreamEvent::RoundEnd {
                output_tokens,
                stop_reason,
            } => {
                if output_tokens.is_some() {
                    self.result.usage.output_tokens = output_tokens;
                }
                if stop_reason.is_some() {
                    self.result.stop_reason = stop_reason;
                }
                Ok(Applied::Nothing)
            }
            UpstreamEvent::Error { message } => {
                Err(AppError::external_service("Upstream", message))
            }
        }
    }

    fn apply_delta(&mut self, index: usize, delta: BlockDelta) -> Applied {
        match (self.open.get_mut(&index), delta) {
            (Some(BlockBuffer::Text(text)), BlockDelta::Text(fragment)) => {
                if fragment.is_empty() {
                    return Applied::Nothing;
                }
                text.push_str(&fragment);
                self.result.text.push_str(&fragment);
                Applied::Text(fragment)
            }
            (Some(BlockBuffer::ToolUse { input_json, .. }), BlockDelta::InputJson(fragment)) => {
                input_json.push_str(&fragment);
                Applied::Nothing
            }
            (None, _) => {
                debug!(index, "Delta for unknown block index");
                Applied::Nothing
            }
            (Some(_), _) => {
                debug!(index, "Delta kind does not match block kind");
                Applied::Nothing
            }
        }
    }

    fn finalize(&mut self, index: usize, buffer: BlockBuffer) -> Applied {
        match buffer {
            BlockBuffer::Text(text) => {
                self.finished.insert(index, ContentBlock::Text { text });
                Applied::Nothing
            }
            BlockBuffer::ToolUse {
                id,
                name,
                input_json,
            } => {
                let input = parse_tool_input(&name, &input_json);
                let call = ToolCall { id, name, input };
                self.finished.insert(
                    index,
                    ContentBlock::ToolUse {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        input: call.input.clone(),
                    },
                );
                Applied::ToolUse(call)
            }
        }
    }

    /// Finalize leftover blocks and order blocks by start arrival
    fn finish(mut self) -> (RoundResult, Vec<ToolCall>) {
        let mut late_calls = Vec::new();
        let start_order = std::mem::take(&mut self.start_order);
        for index in &start_order {
            if let Some(buffer) = self.open.remove(index) {
                warn!(index, "Round ended with an unfinished block");
                if let Applied::ToolUse(call) = self.finalize(*index, buffer) {
                    late_calls.push(call);
                }
            }
        }
        let mut finished = self.finished;
        let mut result = self.result;
        result.blocks = start_order
            .iter()
            .filter_map(|index| finished.remove(index))
            .filter(|block| !matches!(block, ContentBlock::Text { text } if text.is_empty()))
            .collect();
        result.tool_calls = result
            .blocks
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolUse { id, name, input } => Some(ToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                }),
                _ => None,
            })
            .collect();
        (result, late_calls)
    }
}

/// Parse a tool-use block's concatenated input fragments
///
/// Never fails: an empty buffer, malformed JSON, or a non-object value all
/// become an empty object. The registry then reports missing fields back to
/// the model as an error result.
#[must_use]
pub fn parse_tool_input(tool_name: &str, input_json: &str) -> Value {
    if input_json.trim().is_empty() {
        return Value::Object(Map::new());
    }
    match serde_json::from_str::<Value>(input_json) {
        Ok(value @ Value::Object(_)) => value,
        Ok(_) => {
            warn!(tool = tool_name, "Tool input is not a JSON object, using {{}}");
            Value::Object(Map::new())
        }
        Err(e) => {
            warn!(tool = tool_name, error = %e, "Malformed tool input JSON, using {{}}");
            Value::Object(Map::new())
        }
    }
}

/// Run one round against the provider and reassemble its output
///
/// Text fragments reach the observer in arrival order and concatenate to
/// `RoundResult::text`. Each tool call reaches the observer once its block
/// stops. Cancellation is checked before the request is sent and between
/// every event; a cancelled round returns `OperationCancelled` and drops the
/// upstream stream, which closes its connection.
///
/// # Errors
///
/// Returns an error if the provider fails, the stream reports an error, or
/// the token is cancelled
pub async fn parse_round(
    provider: &dyn InferenceProvider,
    request: &RoundRequest,
    observer: &dyn RoundObserver,
    cancel: &CancellationToken,
) -> AppResult<RoundResult> {
    if cancel.is_cancelled() {
        return Err(AppError::cancelled("Round cancelled before start"));
    }

    let mut stream = tokio::select! {
        biased;
        () = cancel.cancelled() => return Err(AppError::cancelled("Round cancelled before start")),
        opened = provider.stream_round(request) => opened?,
    };

    let mut accumulator = RoundAccumulator::default();
    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(AppError::cancelled("Round cancelled")),
            item = stream.next() => item,
        };
        let Some(item) = next else { break };

        match accumulator.apply(item?)? {
            Applied::Nothing => {}
            Applied::Text(fragment) => observer.on_text(&fragment).await,
            Applied::ToolUse(call) => observer.on_tool_use(&call),
        }
    }
    drop(stream);

    if cancel.is_cancelled() {
        return Err(AppError::cancelled("Round cancelled"));
    }

    let (result, late_calls) = accumulator.finish();
    for call in &late_calls {
        observer.on_tool_use(call);
    }

    debug!(
        provider = provider.name(),
        text_chars = result.text.chars().count(),
        tool_calls = result.tool_calls.len(),
        stop_reason = result.stop_reason.as_deref().unwrap_or("none"),
        "Round parsed"
    );
    Ok(result)
}

/// Run one tool-free round and return only its text
///
/// # Errors
///
/// Returns an error under the same conditions as [`parse_round`]
pub async fn complete_text(
    provider: &dyn InferenceProvider,
    request: &RoundRequest,
    cancel: &CancellationToken,
) -> AppResult<String> {
    parse_round(provider, request, &NoopObserver, cancel)
        .await
        .map(|result| result.text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool_start(index: usize, id: &str, name: &str) -> UpstreamEvent {
        UpstreamEvent::BlockStart {
            index,
            kind: BlockKind::ToolUse {
                id: id.to_owned(),
                name: name.to_owned(),
            },
        }
    }

    #[test]
    fn test_interleaved_blocks_keep_their_own_buffers() {
        let mut acc = RoundAccumulator::default();
        let events = vec![
            UpstreamEvent::BlockStart {
                index: 0,
                kind: BlockKind::Text,
            },
            tool_start(1, "t1", "calculator"),
            UpstreamEvent::BlockDelta {
                index: 1,
                delta: BlockDelta::InputJson("{\"expression\":".to_owned()),
            },
            UpstreamEvent::BlockDelta {
                index: 0,
                delta: BlockDelta::Text("Let me ".to_owned()),
            },
            UpstreamEvent::BlockDelta {
                index: 1,
                delta: BlockDelta::InputJson("\"2+2\"}".to_owned()),
            },
            UpstreamEvent::BlockDelta {
                index: 0,
                delta: BlockDelta::Text("check.".to_owned()),
            },
            UpstreamEvent::BlockStop { index: 1 },
            UpstreamEvent::BlockStop { index: 0 },
        ];
        for event in events {
            acc.apply(event).unwrap();
        }
        let (result, late) = acc.finish();
        assert!(late.is_empty());
        assert_eq!(result.text, "Let me check.");
        assert_eq!(result.tool_calls[0].input, json!({"expression": "2+2"}));
        assert_eq!(result.blocks.len(), 2);
    }

    #[test]
    fn test_unparseable_tool_input_falls_back_to_empty_object() {
        assert_eq!(parse_tool_input("current_time", ""), json!({}));
        assert_eq!(parse_tool_input("calculator", "[1,2]"), json!({}));
        assert_eq!(parse_tool_input("calculator", "{\"a\":"), json!({}));
    }

    #[test]
    fn test_unfinished_tool_block_is_finalized_at_end() {
        let mut acc = RoundAccumulator::default();
        acc.apply(tool_start(0, "t1", "current_time")).unwrap();
        let (result, late) = acc.finish();
        assert_eq!(late.len(), 1);
        assert_eq!(result.tool_calls.len(), 1);
    }

    #[test]
    fn test_upstream_error_event_is_fatal() {
        let mut acc = RoundAccumulator::default();
        let err = acc
            .apply(UpstreamEvent::Error {
                message: "overloaded".to_owned(),
            })
            .unwrap_err();
        assert!(err.message.contains("overloaded"));
    }
}
