// ABOUTME: Conversation and message record types plus closed enums for role, status, persona
// ABOUTME: Shared between persistence, session orchestration, and the wire protocol
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::AppError;

/// Role of a persisted message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// Input typed by the user
    User,
    /// Text produced by the model
    Assistant,
    /// Output of a tool execution
    Tool,
}

impl MessageRole {
    /// Stable string used in storage and on the wire
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

impl FromStr for MessageRole {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "tool" => Ok(Self::Tool),
            other => Err(AppError::invalid_input(format!(
                "Unknown message role: {other}"
            ))),
        }
    }
}

/// Finalization status of a persisted message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Content was fully produced
    Complete,
    /// Generation stopped because the client went away or the session timed out
    Interrupted,
    /// Generation stopped because of a failure
    Error,
}

impl MessageStatus {
    /// Stable string used in storage
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Interrupted => "interrupted",
            Self::Error => "error",
        }
    }
}

impl FromStr for MessageStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "complete" => Ok(Self::Complete),
            "interrupted" => Ok(Self::Interrupted),
            "error" => Ok(Self::Error),
            other => Err(AppError::invalid_input(format!(
                "Unknown message status: {other}"
            ))),
        }
    }
}

/// Response persona selected per turn
///
/// The set is closed: classifiers may only produce one of these labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Persona {
    /// Default conversational assistant
    #[default]
    General,
    /// Programming and debugging help
    Coder,
    /// Math, calculation, and data analysis
    Analyst,
    /// Lookups, current events, and fact finding
    Researcher,
    /// Drafting, editing, and summarizing prose
    Writer,
}

impl Persona {
    /// Every label in the closed set
    pub const ALL: [Self; 5] = [
        Self::General,
        Self::Coder,
        Self::Analyst,
        Self::Researcher,
        Self::Writer,
    ];

    /// Stable label used in storage, prompts, and frames
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Coder => "coder",
            Self::Analyst => "analyst",
            Self::Researcher => "researcher",
            Self::Writer => "writer",
        }
    }
}

impl fmt::Display for Persona {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Persona {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|persona| persona.as_str() == s.trim().to_lowercase())
            .ok_or_else(|| AppError::invalid_input(format!("Unknown persona label: {s}")))
    }
}

/// Stored conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationRecord {
    /// Unique conversation ID
    pub id: String,
    /// User ID who owns the conversation
    pub user_id: String,
    /// Title, unset until supplied by the caller or generated
    pub title: Option<String>,
    /// When the conversation was created (RFC 3339)
    pub created_at: String,
    /// Last activity (RFC 3339)
    pub updated_at: String,
}

/// Stored message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Unique message ID
    pub id: String,
    /// Parent conversation
    pub conversation_id: String,
    /// Sender role
    pub role: MessageRole,
    /// Persona that produced the message (assistant turns only)
    pub persona: Option<Persona>,
    /// Final text content
    pub content: String,
    /// Finalization status
    pub status: MessageStatus,
    /// Output tokens consumed producing this message, if known
    pub token_count: Option<i64>,
    /// When the message was created (RFC 3339)
    pub created_at: String,
}
