//! JSON wire protocol for the WebSocket surface and the dispatch of client events.

use axum::extract::ws::Message;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{broadcast, UserId};
use crate::chat::relay::{self, Delivery, Persistence, RelayResult};
use crate::chat::session::{Session, SessionError};
use crate::state::AppState;

/// Events a client sends, one JSON object per text frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    Identify {
        user_id: UserId,
    },
    Logout {
        user_id: UserId,
    },
    SendMessage {
        to: UserId,
        text: String,
        /// Optional; must match the identified user when present.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<UserId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
}

/// Events pushed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Full presence snapshot. Replaces any snapshot with a lower version.
    Presence { version: u64, online: Vec<UserId> },
    /// Live delivery of a relayed message to its recipient.
    Message {
        from: UserId,
        text: String,
        delivered_at: DateTime<Utc>,
    },
    /// Outcome of a send_message, reported to the sender only.
    RelayResult {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        persisted: bool,
        delivery: Delivery,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Error {
        code: u16,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
}

impl ServerEvent {
    pub fn error(code: u16, message: impl Into<String>, request_id: Option<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
            request_id,
        }
    }

    pub fn relay_result(request_id: Option<String>, result: &RelayResult) -> Self {
        let error = match &result.persistence {
            Persistence::Persisted(_) => None,
            Persistence::Failed(e) => Some(e.to_string()),
        };
        Self::RelayResult {
            request_id,
            persisted: result.is_persisted(),
            delivery: result.delivery,
            error,
        }
    }

    /// Encode as a text frame.
    pub fn to_message(&self) -> Option<Message> {
        match serde_json::to_string(self) {
            Ok(json) => Some(Message::Text(json.into())),
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode server event");
                None
            }
        }
    }
}

/// Decode a text frame and dispatch it against the connection's session.
pub fn handle_text_message(text: &str, session: &mut Session, state: &AppState) {
    let event: ClientEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(
                conn_id = %session.connection_id(),
                error = %e,
                "Failed to decode client event"
            );
            session.send(&ServerEvent::error(400, "Invalid message", None));
            return;
        }
    };

    dispatch_event(event, session, state);
}

fn dispatch_event(event: ClientEvent, session: &mut Session, state: &AppState) {
    match event {
        ClientEvent::Identify { user_id } => {
            if let Err(e) = session.identify(user_id) {
                reject(session, &e, None);
            }
        }
        ClientEvent::Logout { user_id } => {
            if let Err(e) = session.logout(&user_id) {
                reject(session, &e, None);
            }
        }
        ClientEvent::SendMessage {
            to,
            text,
            from,
            request_id,
        } => {
            handle_send_message(session, state, &to, &text, from.as_deref(), request_id);
        }
    }
}

/// Live delivery happens before this returns; the history append and the
/// `relay_result` reply finish on their own task so the reader keeps
/// serving the connection meanwhile.
fn handle_send_message(
    session: &mut Session,
    state: &AppState,
    to: &str,
    text: &str,
    from: Option<&str>,
    request_id: Option<String>,
) {
    let sender = match session.sender(from) {
        Ok(sender) => sender.to_string(),
        Err(e) => {
            reject(session, &e, request_id);
            return;
        }
    };

    if let Err(e) = relay::validate_message(to, text, state.max_message_len) {
        reject(session, &e, request_id);
        return;
    }

    let pending = relay::start_relay(&state.presence, &state.history, &sender, to, text);
    let conn = session.connection().clone();
    tokio::spawn(async move {
        let result = pending.finish().await;
        broadcast::send_to(&conn, &ServerEvent::relay_result(request_id, &result));
    });
}

fn reject(session: &Session, err: &SessionError, request_id: Option<String>) {
    tracing::debug!(
        conn_id = %session.connection_id(),
        error = %err,
        "Client event rejected"
    );
    session.send(&ServerEvent::error(err.code(), err.to_string(), request_id));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_send_message_without_optional_fields() {
        let event: ClientEvent = serde_json::from_value(json!({
            "type": "send_message",
            "to": "bob",
            "text": "hi"
        }))
        .unwrap();

        assert_eq!(
            event,
            ClientEvent::SendMessage {
                to: "bob".into(),
                text: "hi".into(),
                from: None,
                request_id: None,
            }
        );
    }

    #[test]
    fn test_presence_event_shape() {
        let event = ServerEvent::Presence {
            version: 3,
            online: vec!["a".into(), "b".into()],
        };

        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "presence", "version": 3, "online": ["a", "b"]})
        );
    }

    #[test]
    fn test_relay_result_omits_error_when_persisted() {
        let event = ServerEvent::RelayResult {
            request_id: Some("r1".into()),
            persisted: true,
            delivery: Delivery::RecipientOffline,
            error: None,
        };

        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "type": "relay_result",
                "request_id": "r1",
                "persisted": true,
                "delivery": "recipient_offline"
            })
        );
    }

    #[test]
    fn test_unknown_event_type_is_rejected() {
        let result = serde_json::from_str::<ClientEvent>(r#"{"type":"join_room","room":"x"}"#);
        assert!(result.is_err());
    }
}
