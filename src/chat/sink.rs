// ABOUTME: Per-session frame channel tracking when the last real frame was written
// ABOUTME: Feeds the liveness timers that write heartbeats and abort idle sessions
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::protocol::StreamFrame;

#[derive(Debug)]
struct Activity {
    last_frame: Instant,
    last_write: Instant,
}

/// Sending half of a session's frame channel
///
/// Real frames reset both the heartbeat and idle clocks. Heartbeats reset
/// only the heartbeat clock, so a stalled upstream still times out.
#[derive(Debug, Clone)]
pub struct FrameSink {
    tx: mpsc::Sender<StreamFrame>,
    activity: Arc<Mutex<Activity>>,
}

impl FrameSink {
    /// Create a bounded frame channel
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<StreamFrame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let now = Instant::now();
        let sink = Self {
            tx,
            activity: Arc::new(Mutex::new(Activity {
                last_frame: now,
                last_write: now,
            })),
        };
        (sink, rx)
    }

    fn record(&self, real: bool) {
        let now = Instant::now();
        let mut activity = self.activity.lock().unwrap_or_else(PoisonError::into_inner);
        activity.last_write = now;
        if real {
            activity.last_frame = now;
        }
    }

    /// Send a frame, waiting for channel capacity
    ///
    /// Returns `false` once the receiver is gone.
    pub async fn send(&self, frame: StreamFrame) -> bool {
        let real = !matches!(frame, StreamFrame::Heartbeat);
        if self.tx.send(frame).await.is_err() {
            return false;
        }
        self.record(real);
        true
    }

    /// Send a frame, giving up after `limit`
    ///
    /// Returns `false` if the receiver is gone or made no room in time.
    pub async fn send_within(&self, frame: StreamFrame, limit: Duration) -> bool {
        tokio::time::timeout(limit, self.send(frame))
            .await
            .unwrap_or(false)
    }

    /// Send a frame unless `cancel` fires first
    ///
    /// Returns `false` if cancelled or the receiver is gone.
    pub async fn send_or_cancel(&self, frame: StreamFrame, cancel: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            () = cancel.cancelled() => false,
            sent = self.send(frame) => sent,
        }
    }

    /// Send without waiting; dropped if the channel is full
    ///
    /// Returns `true` if the frame was queued.
    pub fn try_send(&self, frame: StreamFrame) -> bool {
        let real = !matches!(frame, StreamFrame::Heartbeat);
        if self.tx.try_send(frame).is_err() {
            return false;
        }
        self.record(real);
        true
    }

    /// Time since the last non-heartbeat frame
    #[must_use]
    pub fn since_last_frame(&self) -> Duration {
        let activity = self.activity.lock().unwrap_or_else(PoisonError::into_inner);
        activity.last_frame.elapsed()
    }

    /// Time since anything, heartbeats included, was written
    #[must_use]
    pub fn since_last_write(&self) -> Duration {
        let activity = self.activity.lock().unwrap_or_else(PoisonError::into_inner);
        activity.last_write.elapsed()
    }

    /// Resolves when the receiver is dropped
    pub async fn closed(&self) {
        self.tx.closed().await;
    }

    /// Whether the receiver is gone
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
