//! Connection registry: the authoritative user → live connection map.
//!
//! A forward map (user → connection) and a reverse index (connection → user)
//! live behind one mutex and are always updated together. Disconnect cleanup
//! goes through the reverse index, so a late close of a superseded connection
//! can never evict the session that replaced it.

use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};

use super::{ConnectionHandle, ConnectionId, UserId};

/// Full set of online users, taken inside the registry's critical section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceSnapshot {
    /// Bumped on every mutation. Lets clients discard a snapshot that
    /// arrives after a newer one.
    pub version: u64,
    pub users: BTreeSet<UserId>,
}

impl PresenceSnapshot {
    pub fn contains(&self, user_id: &str) -> bool {
        self.users.contains(user_id)
    }
}

/// Result of a removal that actually changed the registry.
#[derive(Debug, Clone)]
pub struct Removed {
    pub user_id: UserId,
    pub connection_id: ConnectionId,
    pub snapshot: PresenceSnapshot,
}

#[derive(Default)]
struct Entries {
    by_user: HashMap<UserId, ConnectionHandle>,
    by_connection: HashMap<ConnectionId, UserId>,
    version: u64,
}

impl Entries {
    fn snapshot(&self) -> PresenceSnapshot {
        PresenceSnapshot {
            version: self.version,
            users: self.by_user.keys().cloned().collect(),
        }
    }

    fn bump(&mut self) -> PresenceSnapshot {
        self.version += 1;
        self.snapshot()
    }
}

#[derive(Default)]
pub struct ConnectionRegistry {
    entries: Mutex<Entries>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `user_id` to `conn`, replacing whatever was there before.
    ///
    /// If `conn` was previously registered under a different user, that
    /// mapping is dropped so a connection never belongs to two users.
    pub fn register(&self, user_id: &str, conn: ConnectionHandle) -> PresenceSnapshot {
        let mut entries = self.entries.lock();

        if let Some(previous_user) = entries.by_connection.remove(&conn.id()) {
            entries.by_user.remove(&previous_user);
        }
        if let Some(previous_conn) = entries.by_user.insert(user_id.to_string(), conn.clone()) {
            entries.by_connection.remove(&previous_conn.id());
        }
        entries.by_connection.insert(conn.id(), user_id.to_string());

        entries.bump()
    }

    pub fn lookup(&self, user_id: &str) -> Option<ConnectionHandle> {
        self.entries.lock().by_user.get(user_id).cloned()
    }

    /// Remove the entry for `user_id`. `None` when the user was not registered.
    pub fn remove_by_user(&self, user_id: &str) -> Option<Removed> {
        let mut entries = self.entries.lock();

        let conn = entries.by_user.remove(user_id)?;
        entries.by_connection.remove(&conn.id());

        Some(Removed {
            user_id: user_id.to_string(),
            connection_id: conn.id(),
            snapshot: entries.bump(),
        })
    }

    /// Remove whichever entry currently maps to `connection_id`.
    /// `None` when the connection was never registered or was already superseded.
    pub fn remove_by_connection(&self, connection_id: ConnectionId) -> Option<Removed> {
        let mut entries = self.entries.lock();

        let user_id = entries.by_connection.remove(&connection_id)?;
        entries.by_user.remove(&user_id);

        Some(Removed {
            user_id,
            connection_id,
            snapshot: entries.bump(),
        })
    }

    pub fn snapshot(&self) -> PresenceSnapshot {
        self.entries.lock().snapshot()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().by_user.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    fn assert_consistent(&self) {
        let entries = self.entries.lock();
        assert_eq!(entries.by_user.len(), entries.by_connection.len());
        for (user_id, conn) in &entries.by_user {
            assert_eq!(
                entries.by_connection.get(&conn.id()),
                Some(user_id),
                "reverse index out of sync for {}",
                user_id
            );
        }
    }
}
