// ABOUTME: Main library entry point for the streamchat server
// ABOUTME: Streams multi-turn LLM conversations with autonomous tool execution to clients
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

#![recursion_limit = "256"]
#![deny(unsafe_code)]

//! # Streamchat Server
//!
//! A chat server that lets a user hold a multi-turn conversation with a remote
//! LLM inference service. The model may invoke tools mid-answer; the result is
//! streamed to the client token by token as named text frames.
//!
//! ## Architecture
//!
//! Leaf-first:
//! - **tools**: name-to-implementation registry; executes one call, never fails
//! - **llm**: upstream provider trait, SSE parsing, and the round parser that
//!   rebuilds text and tool calls from interleaved block events
//! - **chat**: the tool-execution loop, persona classification, title
//!   generation, and the streaming session that owns one request end to end
//! - **protocol**: frame encoding for the server and incremental frame decoding
//!   for clients
//! - **routes**: axum handlers exposing the session over HTTP
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use streamchat_server::config::environment::ServerConfig;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = ServerConfig::from_env()?;
//!     println!("{}", config.summary());
//!     Ok(())
//! }
//! ```

/// JWT bearer-token identification of callers
pub mod auth;

/// Chat orchestration: tool loop, personas, titles, streaming sessions
pub mod chat;

/// Streaming client that decodes frames from the chat endpoint
pub mod client;

/// Environment-driven configuration
pub mod config;

/// Conversation and message persistence
pub mod database;

/// Unified error handling re-exported from the core crate
pub mod errors;

/// Upstream inference provider abstraction and round parsing
pub mod llm;

/// Production logging and structured output
pub mod logging;

/// Wire protocol: frame encoding and incremental decoding
pub mod protocol;

/// Shared server resources wired by dependency injection
pub mod resources;

/// `HTTP` routes
pub mod routes;

/// Tool registry and built-in tools
pub mod tools;

pub use streamchat_core::{constants, models};
