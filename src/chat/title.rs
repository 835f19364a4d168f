// ABOUTME: Conversation title generation from the first user message
// ABOUTME: Runs detached from the session and applies only if no title is set yet
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::constants::limits::MAX_TITLE_CHARS;
use crate::constants::llm::AUX_MAX_TOKENS;
use crate::database::ChatRepository;
use crate::errors::{AppError, AppResult};
use crate::llm::prompts::TITLE_PROMPT;
use crate::llm::round::complete_text;
use crate::llm::{ChatMessage, InferenceProvider, RoundRequest};

/// Generates short conversation titles with an auxiliary model call
#[derive(Clone)]
pub struct TitleGenerator {
    provider: Arc<dyn InferenceProvider>,
    model: Option<String>,
}

impl TitleGenerator {
    /// Create a generator; `model` overrides the provider default
    #[must_use]
    pub fn new(provider: Arc<dyn InferenceProvider>, model: Option<String>) -> Self {
        Self { provider, model }
    }

    /// Generate a title for a conversation opening with `first_message`
    ///
    /// # Errors
    ///
    /// Returns an upstream error, or `InvalidInput` if the reply is empty
    pub async fn generate(
        &self,
        first_message: &str,
        cancel: &CancellationToken,
    ) -> AppResult<String> {
        let mut request = RoundRequest::new(vec![ChatMessage::user_text(first_message)])
            .with_system(TITLE_PROMPT)
            .with_max_tokens(AUX_MAX_TOKENS);
        request.model.clone_from(&self.model);

        let reply = complete_text(self.provider.as_ref(), &request, cancel).await?;
        clean_title(&reply).ok_or_else(|| AppError::invalid_input("Model returned an empty title"))
    }

    /// Generate and store a title in the background
    ///
    /// The receiver yields the title only if this task set it; it closes
    /// without a value on failure or when a title already existed.
    pub fn spawn(
        &self,
        repository: Arc<dyn ChatRepository>,
        conversation_id: String,
        first_message: String,
    ) -> oneshot::Receiver<String> {
        let (tx, rx) = oneshot::channel();
        let generator = self.clone();

        tokio::spawn(async move {
            let title = match generator
                .generate(&first_message, &CancellationToken::new())
                .await
            {
                Ok(title) => title,
                Err(e) => {
                    warn!(conversation_id = %conversation_id, error = %e, "Title generation failed");
                    return;
                }
            };

            match repository.set_title_if_unset(&conversation_id, &title).await {
                Ok(true) => {
                    debug!(conversation_id = %conversation_id, "Conversation titled");
                    let _ = tx.send(title);
                }
                Ok(false) => debug!(conversation_id = %conversation_id, "Title already set"),
                Err(e) => warn!(conversation_id = %conversation_id, error = %e, "Failed to store title"),
            }
        });

        rx
    }
}

/// Normalize a model reply into a title
///
/// Keeps the first non-empty line, strips wrapping quotes and trailing
/// punctuation, and caps the length on a character boundary.
#[must_use]
pub fn clean_title(reply: &str) -> Option<String> {
    let line = reply.lines().map(str::trim).find(|line| !line.is_empty())?;
    let line = line.strip_prefix("Title:").map_or(line, str::trim);
    let trimmed = line
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '*' | '#'))
        .trim_end_matches(['.', '!', ',', ';', ':'])
        .trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(MAX_TITLE_CHARS).collect())
}
