//! Server-side presence tracking and broadcast.
//!
//! `Presence` ties the connection registry to the broadcaster: every
//! registry mutation that changes the map produces exactly one full-snapshot
//! push to all attached connections. Snapshots are taken inside the
//! registry lock; the fan-out happens after it is released.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::state::AppState;
use crate::ws::broadcast::{self, Broadcaster};
use crate::ws::protocol::ServerEvent;
use crate::ws::registry::{ConnectionRegistry, PresenceSnapshot, Removed};
use crate::ws::{ConnectionHandle, ConnectionId, UserId};

/// Outcome of a cleanup request against the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cleanup {
    /// An entry was removed and the new snapshot was broadcast.
    Removed,
    /// Nothing to remove: repeated logout, or a connection that was
    /// already superseded or never identified.
    Noop,
}

#[derive(Default)]
pub struct Presence {
    registry: ConnectionRegistry,
    broadcaster: Broadcaster,
}

impl Presence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start receiving presence pushes on `conn` and send it the current view.
    pub fn attach(&self, conn: ConnectionHandle) {
        self.broadcaster.attach(conn.clone());
        let snapshot = self.registry.snapshot();
        broadcast::send_to(&conn, &presence_event(snapshot));
    }

    pub fn detach(&self, connection_id: ConnectionId) {
        self.broadcaster.detach(connection_id);
    }

    /// Map `user_id` to `conn`, replacing any previous connection, then broadcast.
    pub fn register(&self, user_id: &str, conn: ConnectionHandle) {
        let connection_id = conn.id();
        let snapshot = self.registry.register(user_id, conn);
        tracing::debug!(
            user_id = %user_id,
            conn_id = %connection_id,
            online = snapshot.users.len(),
            "User registered"
        );
        self.publish(snapshot);
    }

    pub fn remove_by_user(&self, user_id: &str) -> Cleanup {
        let removed = self.registry.remove_by_user(user_id);
        self.finish_cleanup(removed)
    }

    pub fn remove_by_connection(&self, connection_id: ConnectionId) -> Cleanup {
        let removed = self.registry.remove_by_connection(connection_id);
        self.finish_cleanup(removed)
    }

    pub fn lookup(&self, user_id: &str) -> Option<ConnectionHandle> {
        self.registry.lookup(user_id)
    }

    pub fn snapshot(&self) -> PresenceSnapshot {
        self.registry.snapshot()
    }

    pub fn attached_count(&self) -> usize {
        self.broadcaster.client_count()
    }

    fn finish_cleanup(&self, removed: Option<Removed>) -> Cleanup {
        match removed {
            Some(removed) => {
                tracing::debug!(
                    user_id = %removed.user_id,
                    conn_id = %removed.connection_id,
                    online = removed.snapshot.users.len(),
                    "User removed"
                );
                self.publish(removed.snapshot);
                Cleanup::Removed
            }
            None => Cleanup::Noop,
        }
    }

    fn publish(&self, snapshot: PresenceSnapshot) {
        let pushed = self.broadcaster.broadcast_to_all(&presence_event(snapshot));
        tracing::trace!(clients = pushed, "Presence broadcast");
    }
}

fn presence_event(snapshot: PresenceSnapshot) -> ServerEvent {
    ServerEvent::Presence {
        version: snapshot.version,
        online: snapshot.users.into_iter().collect(),
    }
}

// --- REST endpoint handlers ---

#[derive(Debug, Serialize, Deserialize)]
pub struct PresenceResponse {
    pub version: u64,
    pub online: Vec<UserId>,
}

/// GET /api/presence -- Current online users.
pub async fn get_presence(State(state): State<AppState>) -> Json<PresenceResponse> {
    let snapshot = state.presence.snapshot();
    Json(PresenceResponse {
        version: snapshot.version,
        online: snapshot.users.into_iter().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::ws::Message;
    use tokio::sync::mpsc;

    /// Attached connection that records every presence push it receives.
    struct Observer {
        conn: ConnectionHandle,
        rx: mpsc::UnboundedReceiver<Message>,
    }

    impl Observer {
        fn new() -> Self {
            let (tx, rx) = mpsc::unbounded_channel();
            Self {
                conn: ConnectionHandle::new(tx),
                rx,
            }
        }

        fn presence_pushes(&mut self) -> Vec<Vec<UserId>> {
            let mut pushes = Vec::new();
            while let Ok(Message::Text(text)) = self.rx.try_recv() {
                if let Ok(ServerEvent::Presence { online, .. }) =
                    serde_json::from_str::<ServerEvent>(text.as_str())
                {
                    pushes.push(online);
                }
            }
            pushes
        }
    }

    fn attached(presence: &Presence) -> Observer {
        let mut observer = Observer::new();
        presence.attach(observer.conn.clone());
        // Drop the initial snapshot sent on attach
        observer.presence_pushes();
        observer
    }

    #[test]
    fn test_attach_sends_current_snapshot() {
        let presence = Presence::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        presence.register("alice", ConnectionHandle::new(tx));

        let mut observer = Observer::new();
        presence.attach(observer.conn.clone());

        assert_eq!(observer.presence_pushes(), vec![vec!["alice".to_string()]]);
    }

    #[test]
    fn test_register_broadcasts_full_snapshot() {
        let presence = Presence::new();
        let mut observer = attached(&presence);
        let (tx_a, _rx_a) = mpsc::unbounded_channel();
        let (tx_b, _rx_b) = mpsc::unbounded_channel();

        presence.register("a", ConnectionHandle::new(tx_a));
        presence.register("b", ConnectionHandle::new(tx_b));

        assert_eq!(
            observer.presence_pushes(),
            vec![vec!["a".to_string()], vec!["a".to_string(), "b".to_string()]]
        );
    }

    #[test]
    fn test_repeated_logout_broadcasts_once() {
        let presence = Presence::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        presence.register("u", ConnectionHandle::new(tx));
        let mut observer = attached(&presence);

        assert_eq!(presence.remove_by_user("u"), Cleanup::Removed);
        assert_eq!(presence.remove_by_user("u"), Cleanup::Noop);

        assert_eq!(observer.presence_pushes(), vec![Vec::<UserId>::new()]);
        assert!(presence.lookup("u").is_none());
    }

    #[test]
    fn test_stale_connection_cleanup_does_not_broadcast() {
        let presence = Presence::new();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();
        let c1 = ConnectionHandle::new(tx1);
        let c2 = ConnectionHandle::new(tx2);
        presence.register("u", c1.clone());
        presence.register("u", c2.clone());
        let mut observer = attached(&presence);

        assert_eq!(presence.remove_by_connection(c1.id()), Cleanup::Noop);

        assert!(observer.presence_pushes().is_empty());
        assert_eq!(presence.lookup("u"), Some(c2));
    }

    #[test]
    fn test_detached_connection_stops_receiving() {
        let presence = Presence::new();
        let mut observer = attached(&presence);
        presence.detach(observer.conn.id());

        let (tx, _rx) = mpsc::unbounded_channel();
        presence.register("a", ConnectionHandle::new(tx));

        assert!(observer.presence_pushes().is_empty());
        assert_eq!(presence.attached_count(), 0);
    }
}
