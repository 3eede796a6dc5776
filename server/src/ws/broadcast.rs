use parking_lot::Mutex;
use std::collections::HashMap;

use super::protocol::ServerEvent;
use super::{ConnectionHandle, ConnectionId};

/// Owns the set of every attached WebSocket connection, identified or not.
///
/// Fan-out iterates this set rather than the registry, so presence reaches
/// clients that have connected but not yet identified.
#[derive(Default)]
pub struct Broadcaster {
    clients: Mutex<HashMap<ConnectionId, ConnectionHandle>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, conn: ConnectionHandle) {
        self.clients.lock().insert(conn.id(), conn);
    }

    /// Returns false if the connection was not attached.
    pub fn detach(&self, connection_id: ConnectionId) -> bool {
        self.clients.lock().remove(&connection_id).is_some()
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }

    /// Push an event to all attached connections. Returns how many accepted it.
    ///
    /// The client set is copied out before sending; a connection that closed
    /// in the meantime is skipped and left for its own actor to detach.
    pub fn broadcast_to_all(&self, event: &ServerEvent) -> usize {
        let Some(msg) = event.to_message() else {
            return 0;
        };

        let clients: Vec<ConnectionHandle> = self.clients.lock().values().cloned().collect();
        clients
            .iter()
            .filter(|conn| conn.send(msg.clone()))
            .count()
    }
}

/// Send an event to one connection.
pub fn send_to(conn: &ConnectionHandle, event: &ServerEvent) -> bool {
    match event.to_message() {
        Some(msg) => conn.send(msg),
        None => false,
    }
}
