// ABOUTME: Shared server resources built once at startup and injected into handlers
// ABOUTME: Wires persistence, upstream provider, tool registry, classifier, and auth together
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Server Resources
//!
//! Every long-lived component is constructed here and handed to the router
//! inside one `Arc`. Nothing is a process-wide singleton, so tests build a
//! fresh set per case.

use std::sync::Arc;

use tracing::info;

use crate::auth::AuthManager;
use crate::chat::{
    KeywordClassifier, ModelClassifier, PersonaClassifier, StreamingSession, TitleGenerator,
};
use crate::config::{PersonaStrategy, ServerConfig};
use crate::constants::{limits, session};
use crate::database::{ChatRepository, SqliteChatRepository};
use crate::errors::AppResult;
use crate::llm::{AnthropicConfig, AnthropicProvider, InferenceProvider};
use crate::tools::ToolRegistry;

/// Components shared by every request
#[derive(Clone)]
pub struct ServerResources {
    /// Bearer token validation
    pub auth_manager: AuthManager,
    /// Conversation storage
    pub repository: Arc<dyn ChatRepository>,
    /// Session runner
    pub session: StreamingSession,
    /// Longest accepted user message in characters
    pub max_message_chars: usize,
    /// Per-session frame channel capacity
    pub frame_channel_capacity: usize,
}

impl ServerResources {
    /// Assemble resources from already-built components
    #[must_use]
    pub fn new(
        auth_manager: AuthManager,
        repository: Arc<dyn ChatRepository>,
        session: StreamingSession,
    ) -> Self {
        Self {
            auth_manager,
            repository,
            session,
            max_message_chars: limits::DEFAULT_MAX_MESSAGE_CHARS,
            frame_channel_capacity: session::FRAME_CHANNEL_CAPACITY,
        }
    }

    /// Override the message length limit
    #[must_use]
    pub const fn with_max_message_chars(mut self, max_message_chars: usize) -> Self {
        self.max_message_chars = max_message_chars;
        self
    }

    /// Build every component from configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated, the
    /// HTTP client cannot be built, or classifier rules fail to compile
    pub async fn from_config(config: &ServerConfig) -> AppResult<Self> {
        let repository: Arc<dyn ChatRepository> =
            Arc::new(SqliteChatRepository::connect(&config.database.url).await?);

        let mut provider_config = AnthropicConfig::new(&config.llm.api_key);
        provider_config.base_url.clone_from(&config.llm.base_url);
        provider_config.default_model.clone_from(&config.llm.model);
        provider_config.max_tokens = config.llm.max_tokens;
        let provider: Arc<dyn InferenceProvider> = Arc::new(AnthropicProvider::new(provider_config)?);

        let registry = Arc::new(ToolRegistry::with_builtin_tools());

        let aux_model = Some(config.llm.aux_model.clone());
        let classifier: Arc<dyn PersonaClassifier> = match config.chat.persona_strategy {
            PersonaStrategy::Keyword => Arc::new(KeywordClassifier::new()?),
            PersonaStrategy::Model => {
                Arc::new(ModelClassifier::new(provider.clone(), aux_model.clone()))
            }
        };
        let titles = TitleGenerator::new(provider.clone(), aux_model);

        let session = StreamingSession::new(
            repository.clone(),
            provider,
            registry.clone(),
            classifier,
            config.session_config(),
        )
        .with_title_generator(Some(titles));

        let expiry_hours = i64::try_from(config.auth.jwt_expiry_hours).unwrap_or(i64::MAX);
        let auth_manager = AuthManager::new(config.auth.jwt_secret.as_bytes(), expiry_hours);

        info!(
            tools = ?registry.tool_names(),
            persona_strategy = %config.chat.persona_strategy,
            "Server resources ready"
        );

        Ok(Self::new(auth_manager, repository, session)
            .with_max_message_chars(config.chat.max_message_chars))
    }
}
