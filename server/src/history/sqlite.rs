use chrono::{DateTime, Utc};

use super::{participants, ConversationEntry, HistoryError, HistoryStore, StoredMessage};
use crate::db::DbPool;

/// History backed by the `messages` table.
///
/// `created_at` is stored as epoch milliseconds; the returned
/// `StoredMessage` carries the value exactly as persisted.
pub struct SqliteHistoryStore {
    db: DbPool,
}

impl SqliteHistoryStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, rusqlite::Connection>, HistoryError> {
        self.db
            .lock()
            .map_err(|_| HistoryError::Unavailable("database lock poisoned".to_string()))
    }
}

fn from_millis(column: usize, millis: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(column, millis))
}

impl HistoryStore for SqliteHistoryStore {
    fn append(
        &self,
        sender_id: &str,
        recipient_id: &str,
        text: &str,
        created_at: DateTime<Utc>,
    ) -> Result<StoredMessage, HistoryError> {
        let millis = created_at.timestamp_millis();
        let created_at = from_millis(0, millis)?;
        let (participant_a, participant_b) = participants(sender_id, recipient_id);
        let id = uuid::Uuid::now_v7().to_string();

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO messages (id, sender_id, recipient_id, participant_a, participant_b, text, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                id,
                sender_id,
                recipient_id,
                participant_a,
                participant_b,
                text,
                millis,
            ],
        )?;

        Ok(StoredMessage {
            id,
            sender_id: sender_id.to_string(),
            recipient_id: recipient_id.to_string(),
            text: text.to_string(),
            created_at,
        })
    }

    fn query_conversation(
        &self,
        user_a: &str,
        user_b: &str,
        viewer: &str,
    ) -> Result<Vec<ConversationEntry>, HistoryError> {
        let (participant_a, participant_b) = participants(user_a, user_b);

        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT sender_id, text, created_at
             FROM messages
             WHERE participant_a = ?1 AND participant_b = ?2
             ORDER BY created_at ASC, seq ASC",
        )?;

        let entries = stmt
            .query_map(rusqlite::params![participant_a, participant_b], |row| {
                let sender_id: String = row.get(0)?;
                Ok(ConversationEntry {
                    from_self: sender_id == viewer,
                    text: row.get(1)?,
                    created_at: from_millis(2, row.get(2)?)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(entries)
    }
}
