// src/session/mod.rs
// Session persistence bridge: lazy creation, full-log replace, wholesale load

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use tracing::{debug, warn};

use crate::chat::{ChatRole, Citation, Message, NumberedCitation, Reasoning};
use crate::config::CONFIG;
use crate::error::ChatError;

/// Optional reference tying a session to the record it was opened from.
/// Immutable after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id")]
pub enum LinkedEntity {
    Bill(String),
    Committee(String),
    Member(String),
}

/// Snapshot of one message as stored in the session row. Metadata fields
/// default to empty so old snapshots reconstruct rather than fail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedMessage {
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub citations: Vec<Citation>,
    #[serde(default)]
    pub related_entities: Vec<Citation>,
    #[serde(default)]
    pub numbered_citations: Vec<NumberedCitation>,
    #[serde(default)]
    pub side_channel_entities: Vec<String>,
    #[serde(default)]
    pub reasoning: Option<Reasoning>,
}

impl PersistedMessage {
    pub fn from_message(message: &Message) -> Self {
        PersistedMessage {
            role: message.role.as_str().to_string(),
            content: message.content.clone(),
            timestamp: message.created_at,
            citations: message.citations.clone(),
            related_entities: message.related_entities.clone(),
            numbered_citations: message.numbered_citations.clone(),
            side_channel_entities: message.side_channel_entities.clone(),
            reasoning: message.reasoning.clone(),
        }
    }

    pub fn into_message(self) -> Message {
        let role = if self.role == "user" {
            ChatRole::User
        } else {
            ChatRole::Assistant
        };
        Message {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: self.content,
            streamed_content: String::new(),
            is_streaming: false,
            citations: self.citations,
            related_entities: self.related_entities,
            numbered_citations: self.numbered_citations,
            reasoning: self.reasoning,
            side_channel_entities: self.side_channel_entities,
            created_at: self.timestamp,
        }
    }
}

/// Persistence collaborator contract: insert returning id, idempotent full
/// replace of the message log, wholesale select by id. Failures surface as
/// `ChatError::Persistence`; the bridge logs and swallows them.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(
        &self,
        title: &str,
        linked: Option<&LinkedEntity>,
        messages: &[PersistedMessage],
    ) -> Result<i64, ChatError>;

    async fn replace_messages(
        &self,
        session_id: i64,
        messages: &[PersistedMessage],
    ) -> Result<(), ChatError>;

    async fn load_messages(
        &self,
        session_id: i64,
    ) -> Result<Option<Vec<PersistedMessage>>, ChatError>;
}

pub struct SqliteSessionStore {
    pool: SqlitePool,
}

impl SqliteSessionStore {
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chat_sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                linked_entity TEXT,
                messages TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;
        Ok(SqliteSessionStore { pool })
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn create_session(
        &self,
        title: &str,
        linked: Option<&LinkedEntity>,
        messages: &[PersistedMessage],
    ) -> Result<i64, ChatError> {
        let linked_json = linked
            .map(serde_json::to_string)
            .transpose()
            .map_err(ChatError::persistence)?;
        let result = sqlx::query(
            "INSERT INTO chat_sessions (title, linked_entity, messages, created_at) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(title)
        .bind(linked_json)
        .bind(serde_json::to_string(messages).map_err(ChatError::persistence)?)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(ChatError::persistence)?;
        Ok(result.last_insert_rowid())
    }

    async fn replace_messages(
        &self,
        session_id: i64,
        messages: &[PersistedMessage],
    ) -> Result<(), ChatError> {
        sqlx::query("UPDATE chat_sessions SET messages = ? WHERE id = ?")
            .bind(serde_json::to_string(messages).map_err(ChatError::persistence)?)
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(ChatError::persistence)?;
        Ok(())
    }

    async fn load_messages(
        &self,
        session_id: i64,
    ) -> Result<Option<Vec<PersistedMessage>>, ChatError> {
        let row = sqlx::query("SELECT messages FROM chat_sessions WHERE id = ?")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(ChatError::persistence)?;
        match row {
            Some(row) => {
                let raw: String = row.get(0);
                Ok(Some(
                    serde_json::from_str(&raw).map_err(ChatError::persistence)?,
                ))
            }
            None => Ok(None),
        }
    }
}

/// In-memory store used in tests and non-durable contexts.
#[derive(Default)]
pub struct InMemorySessionStore {
    next_id: AtomicI64,
    sessions: Mutex<HashMap<i64, (String, Option<LinkedEntity>, Vec<PersistedMessage>)>>,
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create_session(
        &self,
        title: &str,
        linked: Option<&LinkedEntity>,
        messages: &[PersistedMessage],
    ) -> Result<i64, ChatError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.sessions.lock().unwrap().insert(
            id,
            (title.to_string(), linked.cloned(), messages.to_vec()),
        );
        Ok(id)
    }

    async fn replace_messages(
        &self,
        session_id: i64,
        messages: &[PersistedMessage],
    ) -> Result<(), ChatError> {
        let mut sessions = self.sessions.lock().unwrap();
        match sessions.get_mut(&session_id) {
            Some(entry) => {
                entry.2 = messages.to_vec();
                Ok(())
            }
            None => Err(ChatError::persistence(format!("no session {}", session_id))),
        }
    }

    async fn load_messages(
        &self,
        session_id: i64,
    ) -> Result<Option<Vec<PersistedMessage>>, ChatError> {
        Ok(self
            .sessions
            .lock()
            .unwrap()
            .get(&session_id)
            .map(|entry| entry.2.clone()))
    }
}

/// Bridge between the live conversation and the session store.
///
/// Persistence is strictly opt-in per caller context: when `eligible` is
/// false every operation is a no-op, never silently attempted. All failures
/// are logged and swallowed; losing durability never loses the live exchange.
pub struct SessionBridge {
    store: Arc<dyn SessionStore>,
    eligible: bool,
}

impl SessionBridge {
    pub fn new(store: Arc<dyn SessionStore>, eligible: bool) -> Self {
        SessionBridge { store, eligible }
    }

    /// Derive the session title from the first user message.
    pub fn title_for(text: &str) -> String {
        let max = CONFIG.session_title_max_chars;
        if text.chars().count() <= max {
            text.to_string()
        } else {
            let truncated: String = text.chars().take(max).collect();
            format!("{}...", truncated)
        }
    }

    /// Lazily create the session on the first user submission. Returns `None`
    /// for non-eligible contexts and on persistence failure.
    pub async fn ensure_session(
        &self,
        first_user_message: &str,
        linked: Option<&LinkedEntity>,
    ) -> Option<i64> {
        if !self.eligible {
            return None;
        }
        let title = Self::title_for(first_user_message);
        match self.store.create_session(&title, linked, &[]).await {
            Ok(id) => {
                debug!("created session {} ({})", id, title);
                Some(id)
            }
            Err(e) => {
                warn!("session creation failed: {}", e);
                None
            }
        }
    }

    /// Replace the whole persisted log with the current one. Idempotent.
    pub async fn append_exchange(&self, session_id: i64, messages: &[Message]) {
        if !self.eligible {
            return;
        }
        let snapshots: Vec<PersistedMessage> =
            messages.iter().map(PersistedMessage::from_message).collect();
        if let Err(e) = self.store.replace_messages(session_id, &snapshots).await {
            warn!("session {} update failed: {}", session_id, e);
        }
    }

    /// Load a session wholesale, reconstructing messages with their metadata.
    pub async fn load_session(&self, session_id: i64) -> Option<Vec<Message>> {
        match self.store.load_messages(session_id).await {
            Ok(Some(snapshots)) => Some(
                snapshots
                    .into_iter()
                    .map(PersistedMessage::into_message)
                    .collect(),
            ),
            Ok(None) => None,
            Err(e) => {
                warn!("session {} load failed: {}", session_id, e);
                None
            }
        }
    }
}
