// ABOUTME: Incremental decoder turning arbitrary byte chunks back into stream frames
// ABOUTME: Output is identical however the input is split, including mid-character splits
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use std::mem;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};

use super::frames::StreamFrame;
use crate::errors::{AppError, AppResult};
use crate::llm::sse_parser::LineBuffer;

/// Frame name used when a frame carries no `event:` line
const DEFAULT_EVENT_NAME: &str = "message";

/// Stateful frame decoder
///
/// Lines are split on LF or CRLF. `event:` sets the pending name, `data:`
/// lines accumulate and are joined with `\n`, a blank line dispatches the
/// frame, and a line starting with `:` is a heartbeat. One optional space
/// after the field colon is stripped. `id:`, `retry:` and unknown fields are
/// ignored.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    lines: LineBuffer,
    event: Option<String>,
    data: Vec<String>,
}

impl FrameDecoder {
    /// Create an empty decoder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every frame it completes
    ///
    /// Frames that fail to parse are returned as errors in position; the
    /// decoder keeps going with the next frame.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<AppResult<StreamFrame>> {
        let mut frames = Vec::new();
        for line in self.lines.feed(bytes) {
            self.process_line(&line, &mut frames);
        }
        frames
    }

    /// Flush at end of input
    ///
    /// An unterminated final line is processed and any pending frame is
    /// dispatched as if a blank line followed.
    pub fn finish(&mut self) -> Vec<AppResult<StreamFrame>> {
        let mut frames = Vec::new();
        if let Some(line) = self.lines.take_remaining() {
            self.process_line(&line, &mut frames);
        }
        self.dispatch(&mut frames);
        frames
    }

    fn process_line(&mut self, line: &str, frames: &mut Vec<AppResult<StreamFrame>>) {
        if line.is_empty() {
            self.dispatch(frames);
            return;
        }
        if line.starts_with(':') {
            frames.push(Ok(StreamFrame::Heartbeat));
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_owned()),
            "data" => self.data.push(value.to_owned()),
            _ => {}
        }
    }

    fn dispatch(&mut self, frames: &mut Vec<AppResult<StreamFrame>>) {
        let event = self.event.take();
        let data = mem::take(&mut self.data);
        if event.is_none() && data.is_empty() {
            return;
        }
        let name = event.as_deref().unwrap_or(DEFAULT_EVENT_NAME);
        frames.push(StreamFrame::decode(name, &data.join("\n")));
    }
}

/// Decode a byte stream into frames
pub fn decode_frames<S, E>(byte_stream: S) -> impl Stream<Item = AppResult<StreamFrame>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    async_stream::stream! {
        let mut decoder = FrameDecoder::new();
        let mut byte_stream = Box::pin(byte_stream);
        while let Some(chunk) = byte_stream.next().await {
            match chunk {
                Ok(bytes) => {
                    for frame in decoder.feed(&bytes) {
                        yield frame;
                    }
                }
                Err(e) => {
                    yield Err(AppError::external_service("Chat stream", format!("Stream read error: {e}")));
                    return;
                }
            }
        }
        for frame in decoder.finish() {
            yield frame;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multiline_data_is_joined() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.feed(b"event: error\ndata: {\"message\":\ndata: \"boom\"}\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(
            frames.into_iter().next().unwrap().unwrap(),
            StreamFrame::error("boom")
        );
    }

    #[test]
    fn test_finish_dispatches_pending_frame() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.feed(b"event: chunk\ndata:{\"delta\":\"x\"}").is_empty());
        let frames = decoder.finish();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_ref().unwrap(), &StreamFrame::chunk("x"));
    }
}
