// ABOUTME: Chat route handler streaming a session's frames as server-sent events
// ABOUTME: Authenticates and validates before any session state exists, then spawns the session
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Chat routes
//!
//! `POST /api/chat/stream` accepts `{ message, conversationId?, title? }` and
//! answers with `text/event-stream`. Auth and validation failures come back
//! as JSON errors before the stream opens.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::HeaderMap,
    response::sse::{Event, Sse},
    routing::post,
    Json, Router,
};
use futures_util::stream::{Stream, StreamExt};
use serde::Deserialize;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{info, Instrument};

use crate::chat::{FrameSink, SessionRequest};
use crate::constants::endpoints;
use crate::errors::{AppError, AppResult};
use crate::logging::AppLogger;
use crate::resources::ServerResources;

/// Body of a streaming chat request
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamChatRequest {
    /// New user message
    pub message: Option<String>,
    /// Conversation to continue; omitted to start a new one
    pub conversation_id: Option<String>,
    /// Title for a new conversation
    pub title: Option<String>,
}

impl StreamChatRequest {
    /// Check the request and build a session request for `user_id`
    ///
    /// # Errors
    ///
    /// Returns `MissingRequiredField` without a message, `InvalidInput` for a
    /// blank message, `ValueOutOfRange` when it exceeds `max_chars`
    pub fn into_session_request(
        self,
        user_id: String,
        max_chars: usize,
    ) -> AppResult<SessionRequest> {
        let message = self.message.ok_or_else(|| AppError::missing_field("message"))?;
        if message.trim().is_empty() {
            return Err(AppError::invalid_input("Message must not be empty"));
        }
        let length = message.chars().count();
        if length > max_chars {
            return Err(AppError::out_of_range(format!(
                "Message is {length} characters; the limit is {max_chars}"
            )));
        }

        Ok(SessionRequest {
            user_id,
            message,
            conversation_id: non_blank(self.conversation_id),
            title: non_blank(self.title).map(|title| title.trim().to_owned()),
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Chat routes handler
pub struct ChatRoutes;

impl ChatRoutes {
    /// Create all chat routes
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        Router::new()
            .route(endpoints::CHAT_STREAM, post(Self::stream_chat))
            .with_state(resources)
    }

    /// Run one chat turn and stream its frames
    async fn stream_chat(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        body: Result<Json<StreamChatRequest>, JsonRejection>,
    ) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
        let auth = resources.auth_manager.authenticate(&headers).inspect_err(|e| {
            AppLogger::log_auth_event("unknown", "bearer_token", false, Some(&e.message));
            AppLogger::log_rejected_request(endpoints::CHAT_STREAM, &e.message, None);
        })?;
        AppLogger::log_auth_event(&auth.user_id, "bearer_token", true, None);

        let Json(body) = body.map_err(|rejection| {
            AppError::invalid_input(format!("Malformed request body: {}", rejection.body_text()))
        })?;
        let request = body
            .into_session_request(auth.user_id.clone(), resources.max_message_chars)
            .inspect_err(|e| {
                AppLogger::log_rejected_request(
                    endpoints::CHAT_STREAM,
                    &e.message,
                    Some(&auth.user_id),
                );
            })?;

        info!(
            user_id = %request.user_id,
            conversation_id = request.conversation_id.as_deref().unwrap_or("new"),
            "Starting chat session"
        );

        let (sink, rx) = FrameSink::channel(resources.frame_channel_capacity);
        let session = resources.session.clone();
        let span = tracing::info_span!("chat_session", user.id = %request.user_id);
        tokio::spawn(
            async move {
                session.run(request, sink, CancellationToken::new()).await;
            }
            .instrument(span),
        );

        let stream = ReceiverStream::new(rx).map(|frame| Ok::<_, Infallible>(frame.to_sse_event()));
        Ok(Sse::new(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorCode;

    fn body(message: Option<&str>) -> StreamChatRequest {
        StreamChatRequest {
            message: message.map(str::to_owned),
            ..StreamChatRequest::default()
        }
    }

    #[test]
    fn test_message_validation() {
        let missing = body(None).into_session_request("u".to_owned(), 10).unwrap_err();
        assert_eq!(missing.code, ErrorCode::MissingRequiredField);

        let blank = body(Some("  ")).into_session_request("u".to_owned(), 10).unwrap_err();
        assert_eq!(blank.code, ErrorCode::InvalidInput);

        let long = body(Some("12345678901")).into_session_request("u".to_owned(), 10).unwrap_err();
        assert_eq!(long.code, ErrorCode::ValueOutOfRange);

        let ok = body(Some("hello")).into_session_request("u".to_owned(), 10).unwrap();
        assert_eq!(ok.message, "hello");
        assert!(ok.conversation_id.is_none());
    }

    #[test]
    fn test_blank_conversation_id_starts_new_conversation() {
        let request = StreamChatRequest {
            message: Some("hi".to_owned()),
            conversation_id: Some(String::new()),
            title: Some("  Trip plans ".to_owned()),
        };
        let session = request.into_session_request("u".to_owned(), 100).unwrap();
        assert!(session.conversation_id.is_none());
        assert_eq!(session.title.as_deref(), Some("Trip plans"));
    }
}
