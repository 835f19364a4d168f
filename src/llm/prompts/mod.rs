// ABOUTME: System prompts for chat rounds, persona classification, and titles
// ABOUTME: Prompts are loaded at compile time from markdown files
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # System Prompts
//!
//! Prompts are loaded at compile time from markdown files for easy maintenance.

use crate::llm::ChatMessage;
use crate::models::Persona;

const GENERAL_PROMPT: &str = include_str!("general.md");
const CODER_PROMPT: &str = include_str!("coder.md");
const ANALYST_PROMPT: &str = include_str!("analyst.md");
const RESEARCHER_PROMPT: &str = include_str!("researcher.md");
const WRITER_PROMPT: &str = include_str!("writer.md");

/// Instruction for the model-backed persona classifier
pub const CLASSIFIER_PROMPT: &str = include_str!("classifier.md");

/// Instruction for conversation title generation
pub const TITLE_PROMPT: &str = include_str!("title.md");

/// System prompt that shapes responses for a persona
#[must_use]
pub const fn persona_system_prompt(persona: Persona) -> &'static str {
    match persona {
        Persona::General => GENERAL_PROMPT,
        Persona::Coder => CODER_PROMPT,
        Persona::Analyst => ANALYST_PROMPT,
        Persona::Researcher => RESEARCHER_PROMPT,
        Persona::Writer => WRITER_PROMPT,
    }
}

/// Few-shot exchanges shown to the classifier before the real message
#[must_use]
pub fn classifier_examples() -> Vec<ChatMessage> {
    [
        ("Why does my Rust borrow checker complain here?", "coder"),
        ("What is 17% of 2,340?", "analyst"),
        ("What's the date today?", "researcher"),
        ("Can you tighten up this cover letter?", "writer"),
        ("Hey, how's it going?", "general"),
    ]
    .into_iter()
    .flat_map(|(message, label)| {
        [
            ChatMessage::user_text(message),
            ChatMessage::assistant_text(format!("{{\"persona\": \"{label}\"}}")),
        ]
    })
    .collect()
}
