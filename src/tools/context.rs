// ABOUTME: Defines ToolExecutionContext which gives tools caller identity and cancellation
// ABOUTME: Replaces scattered parameter passing with a single context object
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Tool Execution Context

use tokio_util::sync::CancellationToken;

/// Context provided to every tool execution
#[derive(Debug, Clone)]
pub struct ToolExecutionContext {
    /// Authenticated user ID
    pub user_id: String,
    /// Conversation the call belongs to, when executing inside a session
    pub conversation_id: Option<String>,
    /// Cancelled when the owning session aborts
    pub cancel: CancellationToken,
}

impl ToolExecutionContext {
    /// Create a context for a user with a fresh cancellation token
    #[must_use]
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            conversation_id: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Set the conversation
    #[must_use]
    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    /// Share a cancellation token with the caller
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}
