// ABOUTME: Persistence layer for conversations and messages
// ABOUTME: Defines the ChatRepository trait consumed by streaming sessions
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Chat Persistence
//!
//! Sessions talk to storage only through [`ChatRepository`]. Every
//! conversation lookup is scoped by owner: a conversation that exists but
//! belongs to someone else is reported as not found.

mod chat;

pub use chat::SqliteChatRepository;

use async_trait::async_trait;

use crate::errors::AppResult;
use crate::models::{ConversationRecord, MessageRecord, MessageRole, MessageStatus, Persona};

/// Fields of a message to append
#[derive(Debug, Clone)]
pub struct NewMessage {
    /// Sender role
    pub role: MessageRole,
    /// Persona that produced the message (assistant turns only)
    pub persona: Option<Persona>,
    /// Text content
    pub content: String,
    /// Finalization status
    pub status: MessageStatus,
    /// Output tokens, if known
    pub token_count: Option<i64>,
}

impl NewMessage {
    /// A completed user message
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            persona: None,
            content: content.into(),
            status: MessageStatus::Complete,
            token_count: None,
        }
    }

    /// An assistant message in its final state
    #[must_use]
    pub fn assistant(
        persona: Persona,
        content: impl Into<String>,
        status: MessageStatus,
        token_count: Option<i64>,
    ) -> Self {
        Self {
            role: MessageRole::Assistant,
            persona: Some(persona),
            content: content.into(),
            status,
            token_count,
        }
    }
}

/// Partial update of a stored message
#[derive(Debug, Clone, Default)]
pub struct MessagePatch {
    /// Replacement content
    pub content: Option<String>,
    /// Replacement status
    pub status: Option<MessageStatus>,
    /// Replacement token count
    pub token_count: Option<i64>,
}

/// Storage for conversations and their messages
#[async_trait]
pub trait ChatRepository: Send + Sync {
    /// Load an owned conversation, or create one when no ID is given
    ///
    /// # Errors
    ///
    /// Returns `ResourceNotFound` when the ID is unknown or owned by another
    /// user, or a database error
    async fn resolve_or_create_conversation(
        &self,
        user_id: &str,
        conversation_id: Option<&str>,
        title: Option<&str>,
    ) -> AppResult<ConversationRecord>;

    /// Load a conversation scoped to its owner
    ///
    /// # Errors
    ///
    /// Returns a database error
    async fn get_conversation(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> AppResult<Option<ConversationRecord>>;

    /// Append a message and bump the conversation's last-activity time
    ///
    /// # Errors
    ///
    /// Returns a database error
    async fn append_message(
        &self,
        conversation_id: &str,
        message: NewMessage,
    ) -> AppResult<MessageRecord>;

    /// Apply a partial update to a message
    ///
    /// # Errors
    ///
    /// Returns `ResourceNotFound` for an unknown message, or a database error
    async fn update_message(&self, message_id: &str, patch: MessagePatch) -> AppResult<()>;

    /// The most recent `limit` messages in chronological order
    ///
    /// # Errors
    ///
    /// Returns a database error
    async fn list_recent_turns(
        &self,
        conversation_id: &str,
        limit: u32,
    ) -> AppResult<Vec<MessageRecord>>;

    /// Set the title only if none is set yet
    ///
    /// Returns `true` if this call set the title.
    ///
    /// # Errors
    ///
    /// Returns a database error
    async fn set_title_if_unset(&self, conversation_id: &str, title: &str) -> AppResult<bool>;
}
