// ABOUTME: Line-buffering SSE parser for upstream inference streams
// ABOUTME: Handles partial lines and split UTF-8 sequences across TCP boundaries
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # SSE Stream Parser
//!
//! Line buffering for Server-Sent Events shared by the upstream provider and
//! the client-side frame decoder.
//!
//! 1. **Multiple events per TCP chunk**: every complete line in a chunk is
//!    emitted, not just the first.
//! 2. **Partial lines across TCP boundaries**: bytes are buffered until a full
//!    line arrives. Buffering happens on raw bytes so a multi-byte character
//!    split between two chunks decodes correctly.
//!
//! Providers supply a `parse_data` closure that converts the `data:` payload
//! into their event type:
//!
//! ```text
//! let stream = create_sse_stream(
//!     response.bytes_stream(),
//!     |json_str| { /* parse provider-specific JSON */ },
//!     "Anthropic",
//! );
//! ```

use std::collections::VecDeque;
use std::mem;
use std::pin::Pin;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use futures_util::stream::unfold;
use futures_util::{Stream, StreamExt};

use crate::errors::{AppError, AppResult};

/// Raw-byte line splitter
///
/// Accepts LF and CRLF terminators. Lines are decoded only once complete, so
/// chunk boundaries may fall anywhere, including inside a UTF-8 sequence.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buffer: Vec<u8>,
}

impl LineBuffer {
    /// Create an empty buffer
    #[must_use]
    pub const fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Append bytes and return every line completed by them, terminators stripped
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(newline_pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=newline_pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// Take whatever unterminated content remains
    pub fn take_remaining(&mut self) -> Option<String> {
        let mut remaining = mem::take(&mut self.buffer);
        if remaining.last() == Some(&b'\r') {
            remaining.pop();
        }
        if remaining.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&remaining).into_owned())
        }
    }
}

/// A parsed SSE event from the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// A `data:` payload with the prefix stripped
    Data(String),
    /// The `[DONE]` termination signal used by some gateways
    Done,
}

/// Line-buffering SSE parser that only surfaces `data:` payloads
///
/// Upstream event names are redundant with the `type` field inside each JSON
/// payload, so `event:`, `id:`, `retry:` and comment lines are ignored.
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    lines: LineBuffer,
}

impl SseLineBuffer {
    /// Create a new empty line buffer
    #[must_use]
    pub const fn new() -> Self {
        Self {
            lines: LineBuffer::new(),
        }
    }

    /// Feed raw bytes from a TCP chunk, returning any complete SSE events
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.lines
            .feed(bytes)
            .iter()
            .filter_map(|line| parse_line(line))
            .collect()
    }

    /// Flush any remaining buffered content as a final event
    pub fn flush(&mut self) -> Vec<SseEvent> {
        self.lines
            .take_remaining()
            .and_then(|line| parse_line(&line))
            .into_iter()
            .collect()
    }
}

fn parse_line(line: &str) -> Option<SseEvent> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    let data = trimmed.strip_prefix("data:")?.trim_start();
    if data == "[DONE]" {
        return Some(SseEvent::Done);
    }
    if data.is_empty() {
        None
    } else {
        Some(SseEvent::Data(data.to_owned()))
    }
}

/// Boxed stream of parsed items
pub type SseItemStream<T> = Pin<Box<dyn Stream<Item = AppResult<T>> + Send>>;

/// Create a properly-buffered SSE stream from a raw byte stream
///
/// # Arguments
///
/// * `byte_stream` - Raw bytes from `response.bytes_stream()`
/// * `parse_data` - Closure that parses a `data:` payload into an optional item
/// * `provider_name` - Provider name for error messages
///
/// Returning `None` from `parse_data` skips events that produce no output
/// (pings, metadata-only events). A `[DONE]` marker ends the stream.
pub fn create_sse_stream<S, F, T>(
    byte_stream: S,
    parse_data: F,
    provider_name: &'static str,
) -> SseItemStream<T>
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
    F: Fn(&str) -> Option<AppResult<T>> + Send + 'static,
    T: Send + 'static,
{
    let state = SseStreamState {
        parser: SseLineBuffer::new(),
        pending: VecDeque::new(),
        stream_ended: false,
    };

    // unfold keeps parser state across async iterations: each step either
    // drains a pending item or reads the next TCP chunk
    let stream = unfold(
        (
            Box::pin(byte_stream)
                as Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>,
            state,
            parse_data,
        ),
        move |(mut byte_stream, mut state, parse_data)| async move {
            loop {
                if let Some(item) = state.pending.pop_front() {
                    return Some((item, (byte_stream, state, parse_data)));
                }

                if state.stream_ended {
                    return None;
                }

                match byte_stream.next().await {
                    Some(Ok(bytes)) => {
                        let events = state.parser.feed(&bytes);
                        state.absorb(events, &parse_data);
                    }
                    Some(Err(e)) => {
                        state.stream_ended = true;
                        return Some((
                            Err(AppError::external_service(
                                provider_name,
                                format!("Stream read error: {e}"),
                            )),
                            (byte_stream, state, parse_data),
                        ));
                    }
                    None => {
                        state.stream_ended = true;
                        let events = state.parser.flush();
                        state.absorb(events, &parse_data);
                    }
                }
            }
        },
    );

    Box::pin(stream)
}

struct SseStreamState<T> {
    parser: SseLineBuffer,
    pending: VecDeque<AppResult<T>>,
    stream_ended: bool,
}

impl<T> SseStreamState<T> {
    fn absorb<F>(&mut self, events: Vec<SseEvent>, parse_data: &F)
    where
        F: Fn(&str) -> Option<AppResult<T>>,
    {
        for event in events {
            match event {
                SseEvent::Data(payload) => {
                    if let Some(result) = parse_data(&payload) {
                        self.pending.push_back(result);
                    }
                }
                SseEvent::Done => {
                    self.stream_ended = true;
                    return;
                }
            }
        }
    }
}

// ============================================================================
// Retry Configuration
// ============================================================================

/// Retry configuration for upstream streaming requests
///
/// Retries only cover the initial HTTP request. Once bytes start flowing the
/// stream is not retried, since the client may already have seen output.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 = no retries)
    pub max_retries: u32,
    /// Initial delay before first retry (milliseconds)
    pub initial_delay_ms: u64,
    /// Maximum delay cap for exponential backoff (milliseconds)
    pub max_delay_ms: u64,
}

impl RetryConfig {
    /// Default retry config: 3 retries, 500ms initial, 5s max
    #[must_use]
    pub const fn default_config() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 500,
            max_delay_ms: 5000,
        }
    }

    /// Config that never retries
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            max_retries: 0,
            initial_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// Exponential backoff delay with jitter for a given attempt
    ///
    /// `delay = min(initial_ms * 2^attempt, max_ms) + jitter(0..100ms)`
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay = self
            .initial_delay_ms
            .saturating_mul(1_u64.checked_shl(attempt).unwrap_or(u64::MAX));
        let capped_delay = base_delay.min(self.max_delay_ms);
        let jitter = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| u64::from(d.subsec_millis()))
            % 100;
        Duration::from_millis(capped_delay + jitter)
    }
}

/// Whether an HTTP status is a transient upstream condition
///
/// 429 rate limiting, 502 bad gateway, 503 unavailable, 529 overloaded.
#[must_use]
pub const fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 502 | 503 | 529)
}

/// Whether a request error is a connection or timeout failure
#[must_use]
pub fn is_retryable_request_error(error: &reqwest::Error) -> bool {
    error.is_connect() || error.is_timeout()
}
