// ABOUTME: Persona classification selecting a response style per turn
// ABOUTME: Keyword rules or a model call whose JSON reply is extracted and validated
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Persona Classification
//!
//! Two interchangeable strategies behind [`PersonaClassifier`]:
//!
//! - [`KeywordClassifier`] matches regular expressions against the latest user
//!   message, checked in a fixed priority order; no match is `general`.
//! - [`ModelClassifier`] asks the model with a few-shot prompt, extracts the
//!   first balanced JSON object from the reply, and accepts only labels from
//!   the closed persona set.
//!
//! Both fail explicitly on empty input. Callers decide on a fallback.

use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::constants::llm::AUX_MAX_TOKENS;
use crate::errors::{AppError, AppResult};
use crate::llm::prompts::{classifier_examples, CLASSIFIER_PROMPT};
use crate::llm::round::complete_text;
use crate::llm::{ChatMessage, ChatRole, InferenceProvider, RoundRequest};
use crate::models::Persona;

/// Chooses a persona for the next reply
#[async_trait]
pub trait PersonaClassifier: Send + Sync {
    /// Classify from the conversation window ending with the new user turn
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if there is no user text, or an error from the
    /// underlying strategy
    async fn classify(
        &self,
        history: &[ChatMessage],
        cancel: &CancellationToken,
    ) -> AppResult<Persona>;
}

/// Text of the most recent user turn, skipping tool-result turns
fn latest_user_text(history: &[ChatMessage]) -> AppResult<String> {
    history
        .iter()
        .rev()
        .filter(|message| message.role == ChatRole::User)
        .map(ChatMessage::text)
        .find(|text| !text.trim().is_empty())
        .ok_or_else(|| AppError::invalid_input("No user message to classify"))
}

// ============================================================================
// Keyword Strategy
// ============================================================================

const KEYWORD_RULES: [(Persona, &str); 4] = [
    (
        Persona::Coder,
        r"(?i)\b(code|coding|bug|debug|compile|compiler|function|rust|python|javascript|typescript|java|golang|stack ?trace|regex|sql|api|script|refactor)\b",
    ),
    (
        Persona::Analyst,
        r"(?i)(\d+(\.\d+)?\s*[-+*/^%x]\s*\d+|\b(calculate|compute|math|equation|percent(age)?|average|mean|median|statistics?|sum|solve|multiply|divide)\b)",
    ),
    (
        Persona::Researcher,
        r"(?i)\b(search|look up|lookup|find out|latest|news|today|current|date|time|who is|who was|research|history of)\b",
    ),
    (
        Persona::Writer,
        r"(?i)\b(write|draft|essay|poem|story|rewrite|summari[sz]e|summary|edit|proofread|email|letter|blog)\b",
    ),
];

/// Regex rules checked in priority order: coder, analyst, researcher, writer
pub struct KeywordClassifier {
    rules: Vec<(Persona, Regex)>,
}

impl KeywordClassifier {
    /// Compile the built-in rules
    ///
    /// # Errors
    ///
    /// Returns an internal error if a rule fails to compile
    pub fn new() -> AppResult<Self> {
        let rules = KEYWORD_RULES
            .iter()
            .map(|(persona, pattern)| {
                Regex::new(pattern)
                    .map(|regex| (*persona, regex))
                    .map_err(|e| AppError::internal(format!("Invalid persona rule: {e}")))
            })
            .collect::<AppResult<Vec<_>>>()?;
        Ok(Self { rules })
    }

    /// Classify a single message
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for empty or whitespace-only text
    pub fn classify_text(&self, text: &str) -> AppResult<Persona> {
        if text.trim().is_empty() {
            return Err(AppError::invalid_input("No user message to classify"));
        }
        Ok(self
            .rules
            .iter()
            .find(|(_, regex)| regex.is_match(text))
            .map_or(Persona::General, |(persona, _)| *persona))
    }
}

#[async_trait]
impl PersonaClassifier for KeywordClassifier {
    async fn classify(
        &self,
        history: &[ChatMessage],
        _cancel: &CancellationToken,
    ) -> AppResult<Persona> {
        let text = latest_user_text(history)?;
        self.classify_text(&text)
    }
}

// ============================================================================
// Model Strategy
// ============================================================================

/// Asks the model to choose a persona
pub struct ModelClassifier {
    provider: Arc<dyn InferenceProvider>,
    model: Option<String>,
}

impl ModelClassifier {
    /// Create a classifier; `model` overrides the provider default
    #[must_use]
    pub fn new(provider: Arc<dyn InferenceProvider>, model: Option<String>) -> Self {
        Self { provider, model }
    }
}

#[async_trait]
impl PersonaClassifier for ModelClassifier {
    async fn classify(
        &self,
        history: &[ChatMessage],
        cancel: &CancellationToken,
    ) -> AppResult<Persona> {
        let text = latest_user_text(history)?;

        let mut messages = classifier_examples();
        messages.push(ChatMessage::user_text(text));
        let mut request = RoundRequest::new(messages)
            .with_system(CLASSIFIER_PROMPT)
            .with_max_tokens(AUX_MAX_TOKENS);
        request.model.clone_from(&self.model);

        let reply = complete_text(self.provider.as_ref(), &request, cancel).await?;
        let persona = parse_persona_reply(&reply)?;
        debug!(persona = %persona, "Model classified persona");
        Ok(persona)
    }
}

/// Parse a classifier reply into a persona
///
/// # Errors
///
/// Returns `InvalidInput` when the reply holds no JSON object, the object
/// has no string `persona` key, or the label is outside the closed set
pub fn parse_persona_reply(reply: &str) -> AppResult<Persona> {
    let object = extract_json_object(reply)
        .ok_or_else(|| AppError::invalid_input("Classifier reply contains no JSON object"))?;
    let value: Value = serde_json::from_str(object)
        .map_err(|e| AppError::invalid_input(format!("Classifier reply is not valid JSON: {e}")))?;
    let label = value
        .get("persona")
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::invalid_input("Classifier reply has no persona label"))?;
    label.parse()
}

/// First balanced `{...}` span in `text`
///
/// Braces inside JSON strings (including escaped quotes) do not count.
#[must_use]
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0_usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}
