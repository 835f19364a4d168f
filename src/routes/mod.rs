// ABOUTME: Route module organization for the streamchat HTTP endpoints
// ABOUTME: Assembles chat and health routes with tracing and CORS layers
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Route module for the streamchat server
//!
//! Each domain module contains only route definitions and thin handlers that
//! delegate to the chat layer.

use std::sync::Arc;

use axum::Router;
use http::{header, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::resources::ServerResources;

/// Streaming chat routes
pub mod chat;
/// Health check routes
pub mod health;

/// Chat route handlers
pub use chat::{ChatRoutes, StreamChatRequest};
/// Health check route handlers
pub use health::HealthRoutes;

/// Full application router
#[must_use]
pub fn build_router(resources: Arc<ServerResources>, cors_allowed_origins: &str) -> Router {
    Router::new()
        .merge(HealthRoutes::routes())
        .merge(ChatRoutes::routes(resources))
        .layer(TraceLayer::new_for_http())
        .layer(setup_cors(cors_allowed_origins))
}

/// Configure CORS from a comma-separated origin list
///
/// An empty list or `*` allows any origin.
#[must_use]
pub fn setup_cors(allowed_origins: &str) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty() && *origin != "*")
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();

    let allow_origin = if origins.is_empty() {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT])
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
}
