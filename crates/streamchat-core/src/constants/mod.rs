// ABOUTME: Constants module with domain-separated organization
// ABOUTME: Defaults for network, session liveness, limits, and upstream model settings
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Constants module
//!
//! Constants are grouped into logical domains rather than being in a single
//! large file. Values here are defaults; the server reads overrides from the
//! environment variables listed in [`env_config`].

/// API endpoints
pub mod endpoints {
    /// Health check endpoint
    pub const HEALTH_CHECK: &str = "/health";
    /// Streaming chat endpoint
    pub const CHAT_STREAM: &str = "/api/chat/stream";
}

/// Network ports
pub mod ports {
    /// Default HTTP port
    pub const DEFAULT_HTTP_PORT: u16 = 8081;
}

/// Service identity used in structured logs
pub mod service_names {
    /// Service name reported at startup
    pub const STREAMCHAT_SERVER: &str = "streamchat-server";
}

/// Session liveness timers
pub mod session {
    /// Seconds without a real frame before a heartbeat is written
    pub const DEFAULT_HEARTBEAT_SECS: u64 = 15;
    /// Seconds without a real frame before the session is aborted
    pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 120;
    /// Capacity of the per-session frame channel
    pub const FRAME_CHANNEL_CAPACITY: usize = 64;
}

/// Request and history limits
pub mod limits {
    /// Maximum characters accepted in a single user message
    pub const DEFAULT_MAX_MESSAGE_CHARS: usize = 8_000;
    /// Number of recent turns loaded as model context
    pub const DEFAULT_HISTORY_LIMIT: u32 = 20;
    /// Maximum consecutive tool rounds before the loop gives up
    pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 10;
    /// Characters per re-chunked text frame (0 disables re-chunking)
    pub const DEFAULT_CHUNK_CHARS: usize = 24;
    /// Maximum characters kept from a generated title
    pub const MAX_TITLE_CHARS: usize = 80;
}

/// Upstream inference defaults
pub mod llm {
    /// Default Messages API base URL
    pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
    /// Default model for chat rounds
    pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5";
    /// Default model for short auxiliary calls (titles, classification)
    pub const DEFAULT_AUX_MODEL: &str = "claude-haiku-4-5";
    /// Default output token budget per round
    pub const DEFAULT_MAX_TOKENS: u32 = 4_096;
    /// Output token budget for auxiliary calls
    pub const AUX_MAX_TOKENS: u32 = 64;
    /// Messages API version header value
    pub const API_VERSION: &str = "2023-06-01";
    /// Connection timeout in seconds
    pub const CONNECT_TIMEOUT_SECS: u64 = 30;
}

/// Authentication defaults
pub mod auth {
    /// Default JWT lifetime in hours
    pub const DEFAULT_JWT_EXPIRY_HOURS: u64 = 24;
}

/// Environment variable names
pub mod env_config {
    /// HTTP listen port
    pub const HTTP_PORT: &str = "HTTP_PORT";
    /// Comma-separated CORS origins, or `*`
    pub const CORS_ALLOWED_ORIGINS: &str = "CORS_ALLOWED_ORIGINS";
    /// Database connection URL
    pub const DATABASE_URL: &str = "DATABASE_URL";
    /// JWT signing secret
    pub const JWT_SECRET: &str = "JWT_SECRET";
    /// JWT lifetime in hours
    pub const JWT_EXPIRY_HOURS: &str = "JWT_EXPIRY_HOURS";
    /// Upstream API key
    pub const ANTHROPIC_API_KEY: &str = "ANTHROPIC_API_KEY";
    /// Upstream base URL
    pub const LLM_BASE_URL: &str = "LLM_BASE_URL";
    /// Upstream chat model
    pub const LLM_MODEL: &str = "LLM_MODEL";
    /// Upstream auxiliary model
    pub const LLM_AUX_MODEL: &str = "LLM_AUX_MODEL";
    /// Upstream output token budget
    pub const LLM_MAX_TOKENS: &str = "LLM_MAX_TOKENS";
    /// Heartbeat interval seconds
    pub const HEARTBEAT_SECS: &str = "STREAMCHAT_HEARTBEAT_SECS";
    /// Idle timeout seconds
    pub const IDLE_TIMEOUT_SECS: &str = "STREAMCHAT_IDLE_TIMEOUT_SECS";
    /// History window size
    pub const HISTORY_LIMIT: &str = "STREAMCHAT_HISTORY_LIMIT";
    /// Maximum message characters
    pub const MAX_MESSAGE_CHARS: &str = "STREAMCHAT_MAX_MESSAGE_CHARS";
    /// Tool round cap
    pub const MAX_TOOL_ROUNDS: &str = "STREAMCHAT_MAX_TOOL_ROUNDS";
    /// Re-chunk size
    pub const CHUNK_CHARS: &str = "STREAMCHAT_CHUNK_CHARS";
    /// Persona classification strategy (`keyword` or `model`)
    pub const PERSONA_STRATEGY: &str = "STREAMCHAT_PERSONA_STRATEGY";
}
