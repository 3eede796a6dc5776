//! Per-connection session lifecycle.
//!
//! `Connecting → Established(user) → Closed`. `Closed` is terminal; once a
//! session logs out it no longer counts for presence even if the socket
//! stays open. Transport close always cleans up by connection identity.

use std::sync::Arc;

use crate::chat::presence::{Cleanup, Presence};
use crate::ws::broadcast;
use crate::ws::protocol::ServerEvent;
use crate::ws::{ConnectionHandle, ConnectionId, UserId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Established(UserId),
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("identify before sending {0}")]
    NotEstablished(&'static str),
    #[error("session is closed")]
    Closed,
    #[error("connection is identified as {current}, not {requested}")]
    IdentityMismatch { current: UserId, requested: UserId },
    #[error("user id must not be empty")]
    InvalidUserId,
    #[error("{0}")]
    InvalidMessage(String),
}

impl SessionError {
    /// Code carried in the error frame sent back to the client.
    pub fn code(&self) -> u16 {
        match self {
            Self::InvalidUserId | Self::InvalidMessage(_) => 400,
            Self::IdentityMismatch { .. } => 403,
            Self::NotEstablished(_) => 409,
            Self::Closed => 410,
        }
    }
}

pub struct Session {
    conn: ConnectionHandle,
    presence: Arc<Presence>,
    state: SessionState,
    detached: bool,
}

impl Session {
    /// Attach a freshly accepted connection. It receives presence pushes
    /// from now on but is not online until it identifies.
    pub fn new(presence: Arc<Presence>, conn: ConnectionHandle) -> Self {
        presence.attach(conn.clone());
        Self {
            conn,
            presence,
            state: SessionState::Connecting,
            detached: false,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.conn.id()
    }

    pub fn connection(&self) -> &ConnectionHandle {
        &self.conn
    }

    pub fn user_id(&self) -> Option<&str> {
        match &self.state {
            SessionState::Established(user_id) => Some(user_id.as_str()),
            _ => None,
        }
    }

    pub fn send(&self, event: &ServerEvent) -> bool {
        broadcast::send_to(&self.conn, event)
    }

    pub fn identify(&mut self, user_id: UserId) -> Result<(), SessionError> {
        if user_id.trim().is_empty() {
            return Err(SessionError::InvalidUserId);
        }

        match &self.state {
            SessionState::Closed => return Err(SessionError::Closed),
            SessionState::Established(current) if *current != user_id => {
                return Err(SessionError::IdentityMismatch {
                    current: current.clone(),
                    requested: user_id,
                });
            }
            _ => {}
        }

        self.presence.register(&user_id, self.conn.clone());
        tracing::info!(
            conn_id = %self.conn.id(),
            user_id = %user_id,
            "Session established"
        );
        self.state = SessionState::Established(user_id);
        Ok(())
    }

    /// Explicit sign-off. Removes the user's registry entry and closes the
    /// session for presence purposes. Repeating it is a no-op.
    pub fn logout(&mut self, user_id: &str) -> Result<Cleanup, SessionError> {
        let current = match &self.state {
            SessionState::Connecting => return Err(SessionError::NotEstablished("logout")),
            SessionState::Closed => {
                tracing::debug!(conn_id = %self.conn.id(), "Duplicate logout ignored");
                return Ok(Cleanup::Noop);
            }
            SessionState::Established(current) => current.clone(),
        };

        if current != user_id {
            return Err(SessionError::IdentityMismatch {
                current,
                requested: user_id.to_string(),
            });
        }

        let cleanup = self.presence.remove_by_user(&current);
        self.state = SessionState::Closed;
        tracing::info!(
            conn_id = %self.conn.id(),
            user_id = %current,
            cleanup = ?cleanup,
            "User logged out"
        );
        Ok(cleanup)
    }

    /// Identity to relay a message as. `from`, when given, must match it.
    pub fn sender(&self, from: Option<&str>) -> Result<&str, SessionError> {
        match &self.state {
            SessionState::Connecting => Err(SessionError::NotEstablished("messages")),
            SessionState::Closed => Err(SessionError::Closed),
            SessionState::Established(current) => match from {
                Some(from) if from != current.as_str() => Err(SessionError::IdentityMismatch {
                    current: current.clone(),
                    requested: from.to_string(),
                }),
                _ => Ok(current.as_str()),
            },
        }
    }

    /// Transport went away. Removes the registry entry only if it still
    /// points at this connection, then stops presence pushes to it.
    pub fn close(&mut self) -> Cleanup {
        let cleanup = match self.state {
            SessionState::Closed => Cleanup::Noop,
            _ => self.presence.remove_by_connection(self.conn.id()),
        };
        self.state = SessionState::Closed;

        if !self.detached {
            self.presence.detach(self.conn.id());
            self.detached = true;
        }
        cleanup
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}
