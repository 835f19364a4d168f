// ABOUTME: Core types and constants for the streamchat server
// ABOUTME: Foundation crate with error handling, conversation models, and constants
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

#![deny(unsafe_code)]

//! # Streamchat Core
//!
//! Foundation crate providing shared types and constants for the streamchat
//! server. This crate is designed to change infrequently, enabling
//! incremental compilation benefits in the workspace.
//!
//! ## Modules
//!
//! - **errors**: Unified error handling with `AppError` and `ErrorCode`
//! - **constants**: Defaults for limits, timers, and environment variable names
//! - **models**: Message roles, message status, and response personas

/// Unified error handling system with standard error codes and HTTP responses
pub mod errors;

/// Application constants and configuration defaults organized by domain
pub mod constants;

/// Core conversation models (roles, status, personas)
pub mod models;
