//! Message relay: persist always, deliver live if the recipient is online.
//!
//! The history append runs on the blocking pool while the live push happens
//! on the calling task; the two outcomes are reported separately and one
//! failing never prevents the other from being attempted.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::chat::presence::Presence;
use crate::chat::session::SessionError;
use crate::history::{HistoryError, HistoryStore, StoredMessage};
use crate::ws::broadcast;
use crate::ws::protocol::ServerEvent;
use crate::ws::UserId;

/// Live-path outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Delivery {
    Delivered,
    /// Recipient has no registered connection; history is the only path.
    RecipientOffline,
    /// Recipient was registered but its connection was already gone.
    Failed,
}

/// Durable-path outcome.
#[derive(Debug)]
pub enum Persistence {
    Persisted(StoredMessage),
    Failed(HistoryError),
}

#[derive(Debug)]
pub struct RelayResult {
    pub persistence: Persistence,
    pub delivery: Delivery,
}

impl RelayResult {
    pub fn is_persisted(&self) -> bool {
        matches!(self.persistence, Persistence::Persisted(_))
    }
}

/// Reject a message before it reaches either path.
pub fn validate_message(recipient_id: &str, text: &str, max_len: usize) -> Result<(), SessionError> {
    if recipient_id.trim().is_empty() {
        return Err(SessionError::InvalidMessage("recipient must not be empty".to_string()));
    }
    if text.trim().is_empty() {
        return Err(SessionError::InvalidMessage("message text must not be empty".to_string()));
    }
    if text.chars().count() > max_len {
        return Err(SessionError::InvalidMessage(format!(
            "message text exceeds {} characters",
            max_len
        )));
    }
    Ok(())
}

/// A relay whose live push is done and whose history append is in flight.
pub struct PendingRelay {
    append: JoinHandle<Result<StoredMessage, HistoryError>>,
    delivery: Delivery,
    sender_id: UserId,
    recipient_id: UserId,
}

/// Start the append on the blocking pool, then push live.
///
/// Returns without waiting for the store, so the caller can keep serving
/// its connection while the append completes.
pub fn start_relay(
    presence: &Presence,
    history: &Arc<dyn HistoryStore>,
    sender_id: &str,
    recipient_id: &str,
    text: &str,
) -> PendingRelay {
    let append = {
        let history = history.clone();
        let created_at = Utc::now();
        let (sender, recipient, body) = (
            sender_id.to_string(),
            recipient_id.to_string(),
            text.to_string(),
        );
        tokio::task::spawn_blocking(move || history.append(&sender, &recipient, &body, created_at))
    };

    let delivery = deliver_live(presence, sender_id, recipient_id, text);

    PendingRelay {
        append,
        delivery,
        sender_id: sender_id.to_string(),
        recipient_id: recipient_id.to_string(),
    }
}

impl PendingRelay {
    pub fn delivery(&self) -> Delivery {
        self.delivery
    }

    /// Wait for the append and combine both outcomes.
    pub async fn finish(self) -> RelayResult {
        let persistence = match self.append.await {
            Ok(Ok(stored)) => Persistence::Persisted(stored),
            Ok(Err(e)) => Persistence::Failed(e),
            Err(e) => Persistence::Failed(HistoryError::TaskFailed(e.to_string())),
        };

        match &persistence {
            Persistence::Persisted(stored) => tracing::debug!(
                sender_id = %self.sender_id,
                recipient_id = %self.recipient_id,
                message_id = %stored.id,
                delivery = ?self.delivery,
                "Message relayed"
            ),
            Persistence::Failed(e) => tracing::warn!(
                sender_id = %self.sender_id,
                recipient_id = %self.recipient_id,
                delivery = ?self.delivery,
                error = %e,
                "Failed to persist relayed message"
            ),
        }

        RelayResult {
            persistence,
            delivery: self.delivery,
        }
    }
}

pub async fn relay_message(
    presence: &Presence,
    history: &Arc<dyn HistoryStore>,
    sender_id: &str,
    recipient_id: &str,
    text: &str,
) -> RelayResult {
    start_relay(presence, history, sender_id, recipient_id, text)
        .finish()
        .await
}

fn deliver_live(presence: &Presence, sender_id: &str, recipient_id: &str, text: &str) -> Delivery {
    let Some(conn) = presence.lookup(recipient_id) else {
        return Delivery::RecipientOffline;
    };

    let event = ServerEvent::Message {
        from: sender_id.to_string(),
        text: text.to_string(),
        delivered_at: Utc::now(),
    };
    if broadcast::send_to(&conn, &event) {
        Delivery::Delivered
    } else {
        Delivery::Failed
    }
}
