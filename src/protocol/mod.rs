// ABOUTME: Wire protocol between the chat server and its clients
// ABOUTME: Frame types and encoding for the server, incremental decoding for clients
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Stream Frame Protocol
//!
//! A response is a sequence of named frames:
//!
//! ```text
//! event: chunk
//! data: {"delta":"Hel"}
//!
//! ```
//!
//! Frame names are `meta`, `chunk`, `title`, `tool_use`, `done`, and `error`.
//! Lines beginning with `:` are heartbeats. Exactly one of `done` or `error`
//! ends a stream that was not aborted.

pub mod decoder;
pub mod frames;

pub use decoder::{decode_frames, FrameDecoder};
pub use frames::{
    ChunkPayload, DonePayload, ErrorPayload, MetaPayload, StreamFrame, TitlePayload,
    ToolUsePayload, UsagePayload,
};
