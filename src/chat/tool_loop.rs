// ABOUTME: Tool-execution loop alternating model rounds with tool execution
// ABOUTME: Runs until a round requests no tools or the round cap is exceeded
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Tool-Execution Loop
//!
//! Each round's assistant turn (text plus tool-use blocks) is appended to the
//! working history, followed by one user turn carrying a result for every
//! tool call, in call order. The loop ends when a round asks for no tools.
//!
//! When the last permitted round still asks for tools, those calls are not
//! executed. Their `tool_use` notices were already relayed while the round
//! streamed, so a client sees the notices followed by the exhaustion error.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::{AppError, AppResult};
use crate::llm::round::{parse_round, RoundObserver};
use crate::llm::{ChatMessage, InferenceProvider, RoundRequest, TokenUsage, ToolResult};
use crate::tools::{ToolExecutionContext, ToolRegistry};

/// Inputs for one loop run
#[derive(Debug, Clone, Default)]
pub struct LoopRequest {
    /// Model override
    pub model: Option<String>,
    /// System instruction
    pub system: Option<String>,
    /// Conversation so far, ending with the new user turn
    pub history: Vec<ChatMessage>,
    /// Output token budget per round
    pub max_tokens: Option<u32>,
}

/// What a completed loop produced
#[derive(Debug, Clone, Default)]
pub struct LoopOutcome {
    /// Text of the final round
    pub final_text: String,
    /// Text of every round concatenated, as the observer saw it
    pub full_text: String,
    /// Usage summed over rounds
    pub usage: TokenUsage,
    /// Rounds executed
    pub rounds: usize,
    /// Working history including every intermediate turn
    pub history: Vec<ChatMessage>,
}

/// Drives rounds and tool execution
pub struct ToolLoop<'a> {
    provider: &'a dyn InferenceProvider,
    registry: &'a ToolRegistry,
    max_rounds: usize,
}

impl<'a> ToolLoop<'a> {
    /// Create a loop with a round cap
    #[must_use]
    pub const fn new(
        provider: &'a dyn InferenceProvider,
        registry: &'a ToolRegistry,
        max_rounds: usize,
    ) -> Self {
        Self {
            provider,
            registry,
            max_rounds,
        }
    }

    /// Run rounds until the model stops asking for tools
    ///
    /// Text streams through `observer` as each round produces it. Tool calls
    /// within a round execute sequentially in call order.
    ///
    /// # Errors
    ///
    /// Returns `ToolLoopExhausted` when the model still wants tools after
    /// `max_rounds` rounds, `OperationCancelled` when `cancel` fires, or any
    /// round error
    pub async fn run(
        &self,
        request: LoopRequest,
        context: &ToolExecutionContext,
        observer: &dyn RoundObserver,
        cancel: &CancellationToken,
    ) -> AppResult<LoopOutcome> {
        let tools = self.registry.schemas();
        let mut history = request.history;
        let mut usage = TokenUsage::default();
        let mut full_text = String::new();

        for round in 1..=self.max_rounds {
            let round_request = RoundRequest {
                model: request.model.clone(),
                system: request.system.clone(),
                messages: history.clone(),
                tools: tools.clone(),
                max_tokens: request.max_tokens,
            };

            let result = parse_round(self.provider, &round_request, observer, cancel).await?;
            usage = usage.add(result.usage);
            full_text.push_str(&result.text);

            if !result.wants_tools() {
                debug!(round, "Tool loop finished");
                history.push(ChatMessage::assistant_blocks(result.blocks));
                return Ok(LoopOutcome {
                    final_text: result.text,
                    full_text,
                    usage,
                    rounds: round,
                    history,
                });
            }

            if round == self.max_rounds {
                break;
            }

            info!(
                round,
                tools = ?result.tool_calls.iter().map(|call| call.name.as_str()).collect::<Vec<_>>(),
                "Executing tool calls"
            );

            let calls = result.tool_calls;
            history.push(ChatMessage::assistant_blocks(result.blocks));

            let mut results: Vec<ToolResult> = Vec::with_capacity(calls.len());
            for call in &calls {
                if cancel.is_cancelled() {
                    return Err(AppError::cancelled("Tool loop cancelled"));
                }
                results.push(self.registry.execute(call, context).await);
            }
            history.push(ChatMessage::tool_results(results));
        }

        warn!(max_rounds = self.max_rounds, "Tool loop exhausted");
        Err(AppError::tool_loop_exhausted(self.max_rounds))
    }
}
