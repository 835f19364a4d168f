// ABOUTME: Configuration management module for centralized server settings
// ABOUTME: Re-exports the environment-driven server configuration types
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Configuration module for the streamchat server
//!
//! All settings come from environment variables; see
//! [`crate::constants::env_config`] for the names.

/// Environment and server configuration
pub mod environment;

pub use environment::{
    AuthConfig, ChatSettings, DatabaseConfig, LlmConfig, PersonaStrategy, ServerConfig,
};
