// ABOUTME: SQLite implementation of ChatRepository using sqlx
// ABOUTME: Conversation lookups are owner-scoped; message appends run in a transaction
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use super::{ChatRepository, MessagePatch, NewMessage};
use crate::errors::{AppError, AppResult};
use crate::models::{ConversationRecord, MessageRecord, MessageRole, MessageStatus, Persona};

const SCHEMA: [&str; 3] = [
    r"
    CREATE TABLE IF NOT EXISTS chat_conversations (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        title TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS chat_messages (
        id TEXT PRIMARY KEY,
        conversation_id TEXT NOT NULL REFERENCES chat_conversations(id) ON DELETE CASCADE,
        role TEXT NOT NULL,
        persona TEXT,
        content TEXT NOT NULL,
        status TEXT NOT NULL,
        token_count INTEGER,
        created_at TEXT NOT NULL
    )
    ",
    r"
    CREATE INDEX IF NOT EXISTS idx_chat_messages_conversation
        ON chat_messages (conversation_id, created_at)
    ",
];

/// `SQLite` chat storage
#[derive(Clone)]
pub struct SqliteChatRepository {
    pool: SqlitePool,
}

impl SqliteChatRepository {
    /// Wrap an existing pool; call [`Self::migrate`] before use
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a database URL and create the schema
    ///
    /// In-memory databases get a single connection so every query sees the
    /// same database.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid, the connection fails, or the
    /// schema cannot be created
    pub async fn connect(database_url: &str) -> AppResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| AppError::config(format!("Invalid database URL: {e}")))?
            .create_if_missing(true)
            .foreign_keys(true);

        let max_connections = if database_url.contains(":memory:") {
            1
        } else {
            5
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| AppError::database(format!("Failed to connect to database: {e}")))?;

        let repository = Self::new(pool);
        repository.migrate().await?;
        info!("Chat database ready");
        Ok(repository)
    }

    /// Fresh in-memory database
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created
    pub async fn in_memory() -> AppResult<Self> {
        Self::connect("sqlite::memory:").await
    }

    /// Create tables and indexes if they do not exist
    ///
    /// # Errors
    ///
    /// Returns an error if a schema statement fails
    pub async fn migrate(&self) -> AppResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| AppError::database(format!("Failed to create schema: {e}")))?;
        }
        Ok(())
    }

    async fn create_conversation(
        &self,
        user_id: &str,
        title: Option<&str>,
    ) -> AppResult<ConversationRecord> {
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().to_rfc3339();

        sqlx::query(
            r"
            INSERT INTO chat_conversations (id, user_id, title, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $4)
            ",
        )
        .bind(&id)
        .bind(user_id)
        .bind(title)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to create conversation: {e}")))?;

        debug!(conversation_id = %id, "Created conversation");
        Ok(ConversationRecord {
            id,
            user_id: user_id.to_owned(),
            title: title.map(ToOwned::to_owned),
            created_at: now.clone(),
            updated_at: now,
        })
    }
}

fn conversation_from_row(row: &SqliteRow) -> ConversationRecord {
    ConversationRecord {
        id: row.get("id"),
        user_id: row.get("user_id"),
        title: row.get("title"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn message_from_row(row: &SqliteRow) -> AppResult<MessageRecord> {
    let role: String = row.get("role");
    let status: String = row.get("status");
    let persona: Option<String> = row.get("persona");

    Ok(MessageRecord {
        id: row.get("id"),
        conversation_id: row.get("conversation_id"),
        role: MessageRole::from_str(&role)
            .map_err(|e| AppError::database(format!("Corrupt message row: {}", e.message)))?,
        persona: persona
            .as_deref()
            .map(Persona::from_str)
            .transpose()
            .map_err(|e| AppError::database(format!("Corrupt message row: {}", e.message)))?,
        content: row.get("content"),
        status: MessageStatus::from_str(&status)
            .map_err(|e| AppError::database(format!("Corrupt message row: {}", e.message)))?,
        token_count: row.get("token_count"),
        created_at: row.get("created_at"),
    })
}

#[async_trait]
impl ChatRepository for SqliteChatRepository {
    async fn resolve_or_create_conversation(
        &self,
        user_id: &str,
        conversation_id: Option<&str>,
        title: Option<&str>,
    ) -> AppResult<ConversationRecord> {
        match conversation_id {
            Some(id) => self
                .get_conversation(id, user_id)
                .await?
                .ok_or_else(|| AppError::not_found("Conversation")),
            None => self.create_conversation(user_id, title).await,
        }
    }

    async fn get_conversation(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> AppResult<Option<ConversationRecord>> {
        let row = sqlx::query(
            r"
            SELECT id, user_id, title, created_at, updated_at
            FROM chat_conversations
            WHERE id = $1 AND user_id = $2
            ",
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to get conversation: {e}")))?;

        Ok(row.as_ref().map(conversation_from_row))
    }

    async fn append_message(
        &self,
        conversation_id: &str,
        message: NewMessage,
    ) -> AppResult<MessageRecord> {
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().to_rfc3339();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::database(format!("Failed to begin transaction: {e}")))?;

        sqlx::query(
            r"
            INSERT INTO chat_messages (id, conversation_id, role, persona, content, status, token_count, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ",
        )
        .bind(&id)
        .bind(conversation_id)
        .bind(message.role.as_str())
        .bind(message.persona.map(|persona| persona.as_str()))
        .bind(&message.content)
        .bind(message.status.as_str())
        .bind(message.token_count)
        .bind(&now)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::database(format!("Failed to add message: {e}")))?;

        sqlx::query("UPDATE chat_conversations SET updated_at = $1 WHERE id = $2")
            .bind(&now)
            .bind(conversation_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::database(format!("Failed to update conversation: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| AppError::database(format!("Failed to commit message: {e}")))?;

        Ok(MessageRecord {
            id,
            conversation_id: conversation_id.to_owned(),
            role: message.role,
            persona: message.persona,
            content: message.content,
            status: message.status,
            token_count: message.token_count,
            created_at: now,
        })
    }

    async fn update_message(&self, message_id: &str, patch: MessagePatch) -> AppResult<()> {
        let result = sqlx::query(
            r"
            UPDATE chat_messages
            SET content = COALESCE($1, content),
                status = COALESCE($2, status),
                token_count = COALESCE($3, token_count)
            WHERE id = $4
            ",
        )
        .bind(patch.content)
        .bind(patch.status.map(|status| status.as_str()))
        .bind(patch.token_count)
        .bind(message_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to update message: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found("Message"));
        }
        Ok(())
    }

    async fn list_recent_turns(
        &self,
        conversation_id: &str,
        limit: u32,
    ) -> AppResult<Vec<MessageRecord>> {
        let rows = sqlx::query(
            r"
            SELECT id, conversation_id, role, persona, content, status, token_count, created_at
            FROM chat_messages
            WHERE conversation_id = $1
            ORDER BY rowid DESC
            LIMIT $2
            ",
        )
        .bind(conversation_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to get messages: {e}")))?;

        let mut messages = rows
            .iter()
            .map(message_from_row)
            .collect::<AppResult<Vec<_>>>()?;
        messages.reverse();
        Ok(messages)
    }

    async fn set_title_if_unset(&self, conversation_id: &str, title: &str) -> AppResult<bool> {
        let result = sqlx::query(
            r"
            UPDATE chat_conversations
            SET title = $1, updated_at = $2
            WHERE id = $3 AND (title IS NULL OR title = '')
            ",
        )
        .bind(title)
        .bind(chrono::Utc::now().to_rfc3339())
        .bind(conversation_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to set title: {e}")))?;

        Ok(result.rows_affected() > 0)
    }
}
