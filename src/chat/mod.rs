// ABOUTME: Chat orchestration from an inbound message to a stream of frames
// ABOUTME: Tool-execution loop, persona selection, title generation, and session lifecycle
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Chat
//!
//! [`StreamingSession`] owns one request end to end. It drives a
//! [`ToolLoop`], which calls the round parser until the model stops asking
//! for tools, and relays what the model produces through a [`FrameSink`].

/// Persona classification strategies
pub mod persona;
/// Session state machine and liveness timers
pub mod session;
/// Per-session frame channel
pub mod sink;
/// Conversation title generation
pub mod title;
/// Round-by-round tool execution
pub mod tool_loop;

pub use persona::{KeywordClassifier, ModelClassifier, PersonaClassifier};
pub use session::{
    AbortReason, SessionConfig, SessionOutcome, SessionRequest, SessionState, StreamingSession,
};
pub use sink::FrameSink;
pub use title::TitleGenerator;
pub use tool_loop::{LoopOutcome, LoopRequest, ToolLoop};
