use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::{participants, ConversationEntry, HistoryError, HistoryStore, StoredMessage};

/// Process-local history. Used with `history.backend = "memory"` and in tests.
#[derive(Default)]
pub struct MemoryHistoryStore {
    messages: Mutex<Vec<StoredMessage>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl HistoryStore for MemoryHistoryStore {
    fn append(
        &self,
        sender_id: &str,
        recipient_id: &str,
        text: &str,
        created_at: DateTime<Utc>,
    ) -> Result<StoredMessage, HistoryError> {
        let message = StoredMessage {
            id: uuid::Uuid::now_v7().to_string(),
            sender_id: sender_id.to_string(),
            recipient_id: recipient_id.to_string(),
            text: text.to_string(),
            created_at,
        };
        self.messages.lock().push(message.clone());
        Ok(message)
    }

    fn query_conversation(
        &self,
        user_a: &str,
        user_b: &str,
        viewer: &str,
    ) -> Result<Vec<ConversationEntry>, HistoryError> {
        let pair = participants(user_a, user_b);

        let mut matching: Vec<StoredMessage> = self
            .messages
            .lock()
            .iter()
            .filter(|m| participants(&m.sender_id, &m.recipient_id) == pair)
            .cloned()
            .collect();
        // Stable sort keeps append order for equal timestamps
        matching.sort_by_key(|m| m.created_at);

        Ok(matching
            .iter()
            .map(|m| ConversationEntry::for_viewer(m, viewer))
            .collect())
    }
}
