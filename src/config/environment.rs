// ABOUTME: Environment configuration management for deployment-specific settings
// ABOUTME: Parses server, database, auth, upstream, and session settings from environment variables
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Environment-based configuration management for production deployment

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::info;

use crate::chat::SessionConfig;
use crate::constants::{auth, env_config, limits, llm, ports, session};

/// Default database location
pub const DEFAULT_DATABASE_URL: &str = "sqlite:./data/streamchat.db";

/// Longest accepted token lifetime (one year)
pub const MAX_JWT_EXPIRY_HOURS: u64 = 24 * 365;

/// Which persona classifier the server runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PersonaStrategy {
    /// Regular-expression rules over the latest message
    #[default]
    Keyword,
    /// Few-shot model call with JSON extraction
    Model,
}

impl FromStr for PersonaStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "keyword" => Ok(Self::Keyword),
            "model" => Ok(Self::Model),
            other => bail!("Unknown persona strategy '{other}', expected 'keyword' or 'model'"),
        }
    }
}

impl fmt::Display for PersonaStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Keyword => write!(f, "keyword"),
            Self::Model => write!(f, "model"),
        }
    }
}

/// Persistence settings
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// `sqlx` connection URL
    pub url: String,
}

/// Bearer token settings
#[derive(Clone)]
pub struct AuthConfig {
    /// HS256 signing secret
    pub jwt_secret: String,
    /// Token lifetime
    pub jwt_expiry_hours: u64,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &"[REDACTED]")
            .field("jwt_expiry_hours", &self.jwt_expiry_hours)
            .finish()
    }
}

/// Upstream inference settings
#[derive(Clone)]
pub struct LlmConfig {
    /// Messages API key
    pub api_key: String,
    /// Messages API base URL
    pub base_url: String,
    /// Model for chat rounds
    pub model: String,
    /// Model for titles and classification
    pub aux_model: String,
    /// Output token budget per round
    pub max_tokens: u32,
}

impl fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmConfig")
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("aux_model", &self.aux_model)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

/// Chat session settings
#[derive(Debug, Clone)]
pub struct ChatSettings {
    /// Heartbeat interval in seconds
    pub heartbeat_secs: u64,
    /// Idle timeout in seconds
    pub idle_timeout_secs: u64,
    /// Messages loaded as model context
    pub history_limit: u32,
    /// Longest accepted user message in characters
    pub max_message_chars: usize,
    /// Tool loop round cap
    pub max_tool_rounds: usize,
    /// Characters per chunk frame; 0 disables re-chunking
    pub chunk_chars: usize,
    /// Persona classifier
    pub persona_strategy: PersonaStrategy,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            heartbeat_secs: session::DEFAULT_HEARTBEAT_SECS,
            idle_timeout_secs: session::DEFAULT_IDLE_TIMEOUT_SECS,
            history_limit: limits::DEFAULT_HISTORY_LIMIT,
            max_message_chars: limits::DEFAULT_MAX_MESSAGE_CHARS,
            max_tool_rounds: limits::DEFAULT_MAX_TOOL_ROUNDS,
            chunk_chars: limits::DEFAULT_CHUNK_CHARS,
            persona_strategy: PersonaStrategy::default(),
        }
    }
}

impl ChatSettings {
    /// Reject values no session could run with
    ///
    /// # Errors
    ///
    /// Returns an error naming the offending setting
    pub fn validate(&self) -> Result<()> {
        if self.max_tool_rounds == 0 {
            bail!("{} must be at least 1", env_config::MAX_TOOL_ROUNDS);
        }
        if self.heartbeat_secs == 0 {
            bail!("{} must be at least 1", env_config::HEARTBEAT_SECS);
        }
        if self.idle_timeout_secs == 0 {
            bail!("{} must be at least 1", env_config::IDLE_TIMEOUT_SECS);
        }
        if self.history_limit == 0 {
            bail!("{} must be at least 1", env_config::HISTORY_LIMIT);
        }
        if self.max_message_chars == 0 {
            bail!("{} must be at least 1", env_config::MAX_MESSAGE_CHARS);
        }
        Ok(())
    }
}

/// Complete server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP listen port
    pub http_port: u16,
    /// Comma-separated CORS origins, or `*`
    pub cors_allowed_origins: String,
    /// Persistence
    pub database: DatabaseConfig,
    /// Bearer tokens
    pub auth: AuthConfig,
    /// Upstream inference
    pub llm: LlmConfig,
    /// Chat sessions
    pub chat: ChatSettings,
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or a value fails
    /// to parse or validate
    pub fn from_env() -> Result<Self> {
        info!("Loading configuration from environment variables");

        let config = Self {
            http_port: parse_env(env_config::HTTP_PORT, ports::DEFAULT_HTTP_PORT)?,
            cors_allowed_origins: env_var_or(env_config::CORS_ALLOWED_ORIGINS, "*"),
            database: DatabaseConfig {
                url: env_var_or(env_config::DATABASE_URL, DEFAULT_DATABASE_URL),
            },
            auth: AuthConfig {
                jwt_secret: required_env(env_config::JWT_SECRET)?,
                jwt_expiry_hours: parse_env(
                    env_config::JWT_EXPIRY_HOURS,
                    auth::DEFAULT_JWT_EXPIRY_HOURS,
                )?,
            },
            llm: LlmConfig {
                api_key: required_env(env_config::ANTHROPIC_API_KEY)?,
                base_url: env_var_or(env_config::LLM_BASE_URL, llm::DEFAULT_BASE_URL),
                model: env_var_or(env_config::LLM_MODEL, llm::DEFAULT_MODEL),
                aux_model: env_var_or(env_config::LLM_AUX_MODEL, llm::DEFAULT_AUX_MODEL),
                max_tokens: parse_env(env_config::LLM_MAX_TOKENS, llm::DEFAULT_MAX_TOKENS)?,
            },
            chat: ChatSettings {
                heartbeat_secs: parse_env(
                    env_config::HEARTBEAT_SECS,
                    session::DEFAULT_HEARTBEAT_SECS,
                )?,
                idle_timeout_secs: parse_env(
                    env_config::IDLE_TIMEOUT_SECS,
                    session::DEFAULT_IDLE_TIMEOUT_SECS,
                )?,
                history_limit: parse_env(env_config::HISTORY_LIMIT, limits::DEFAULT_HISTORY_LIMIT)?,
                max_message_chars: parse_env(
                    env_config::MAX_MESSAGE_CHARS,
                    limits::DEFAULT_MAX_MESSAGE_CHARS,
                )?,
                max_tool_rounds: parse_env(
                    env_config::MAX_TOOL_ROUNDS,
                    limits::DEFAULT_MAX_TOOL_ROUNDS,
                )?,
                chunk_chars: parse_env(env_config::CHUNK_CHARS, limits::DEFAULT_CHUNK_CHARS)?,
                persona_strategy: parse_env(
                    env_config::PERSONA_STRATEGY,
                    PersonaStrategy::default(),
                )?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    ///
    /// # Errors
    ///
    /// Returns an error naming the offending setting
    pub fn validate(&self) -> Result<()> {
        if self.auth.jwt_secret.len() < 16 {
            bail!("{} must be at least 16 bytes", env_config::JWT_SECRET);
        }
        if !(1..=MAX_JWT_EXPIRY_HOURS).contains(&self.auth.jwt_expiry_hours) {
            bail!(
                "{} must be between 1 and {MAX_JWT_EXPIRY_HOURS}",
                env_config::JWT_EXPIRY_HOURS
            );
        }
        if self.llm.max_tokens == 0 {
            bail!("{} must be at least 1", env_config::LLM_MAX_TOKENS);
        }
        self.chat.validate()
    }

    /// Session tunables derived from this configuration
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            heartbeat_interval: Duration::from_secs(self.chat.heartbeat_secs),
            idle_timeout: Duration::from_secs(self.chat.idle_timeout_secs),
            history_limit: self.chat.history_limit,
            max_tool_rounds: self.chat.max_tool_rounds,
            chunk_chars: self.chat.chunk_chars,
            model: Some(self.llm.model.clone()),
            max_tokens: Some(self.llm.max_tokens),
        }
    }

    /// Human-readable summary without secrets
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "Streamchat Server Configuration:\n\
             - HTTP Port: {}\n\
             - Database: {}\n\
             - Token Expiry: {}h\n\
             - Upstream: {} (model {}, aux {})\n\
             - Heartbeat / Idle: {}s / {}s\n\
             - History Limit: {}\n\
             - Max Tool Rounds: {}\n\
             - Persona Strategy: {}",
            self.http_port,
            self.database.url,
            self.auth.jwt_expiry_hours,
            self.llm.base_url,
            self.llm.model,
            self.llm.aux_model,
            self.chat.heartbeat_secs,
            self.chat.idle_timeout_secs,
            self.chat.history_limit,
            self.chat.max_tool_rounds,
            self.chat.persona_strategy,
        )
    }
}

/// Get environment variable or default value
fn env_var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn required_env(key: &str) -> Result<String> {
    env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .with_context(|| format!("{key} environment variable is required"))
}

/// Parse an environment variable, falling back to `default` when unset
fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid {key} value '{raw}': {e}")),
        Err(_) => Ok(default),
    }
}
