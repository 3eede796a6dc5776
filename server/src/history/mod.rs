//! Durable conversation history.
//!
//! The gateway only talks to history through [`HistoryStore`]. Calls may
//! block on I/O, so async callers run them on the blocking pool and never
//! while holding presence state.

pub mod memory;
pub mod sqlite;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::{HistoryBackend, HistoryConfig};

/// A persisted message. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// One message as seen by `viewer` when reading a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationEntry {
    pub from_self: bool,
    #[serde(rename = "message")]
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl ConversationEntry {
    fn for_viewer(message: &StoredMessage, viewer: &str) -> Self {
        Self {
            from_self: message.sender_id == viewer,
            text: message.text.clone(),
            created_at: message.created_at,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("history store unavailable: {0}")]
    Unavailable(String),
    #[error("history task failed: {0}")]
    TaskFailed(String),
}

pub trait HistoryStore: Send + Sync {
    /// Append one message. The participant pair is derived from sender and recipient.
    fn append(
        &self,
        sender_id: &str,
        recipient_id: &str,
        text: &str,
        created_at: DateTime<Utc>,
    ) -> Result<StoredMessage, HistoryError>;

    /// All messages between `user_a` and `user_b` (in either direction),
    /// ascending by creation time, with `from_self` relative to `viewer`.
    fn query_conversation(
        &self,
        user_a: &str,
        user_b: &str,
        viewer: &str,
    ) -> Result<Vec<ConversationEntry>, HistoryError>;
}

/// Canonical (sorted) form of the unordered participant pair.
pub fn participants<'a>(user_a: &'a str, user_b: &'a str) -> (&'a str, &'a str) {
    if user_a <= user_b {
        (user_a, user_b)
    } else {
        (user_b, user_a)
    }
}

/// Build the configured history backend.
pub fn open_store(
    config: &HistoryConfig,
    data_dir: &str,
) -> Result<Arc<dyn HistoryStore>, Box<dyn std::error::Error>> {
    match config.backend {
        HistoryBackend::Sqlite => {
            let db = crate::db::init_db(data_dir)?;
            Ok(Arc::new(sqlite::SqliteHistoryStore::new(db)))
        }
        HistoryBackend::Memory => {
            tracing::warn!("Using in-memory history store; messages are lost on restart");
            Ok(Arc::new(memory::MemoryHistoryStore::new()))
        }
    }
}
