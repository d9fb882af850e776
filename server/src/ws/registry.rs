//! Connection registry: tracks all live WebSocket connections per user.
//!
//! A user can have multiple concurrent connections (multiple devices/tabs);
//! that multiplicity is first-class, not an edge case. The registry is the
//! exclusive owner of the set of live connections. It is keyed by user id in
//! a sharded concurrent map, with a secondary connection-id → user-id index
//! so teardown paths can unregister by connection id alone.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::FanoutError;
use crate::ws::ConnectionSender;

pub type ConnectionId = Uuid;

/// Handle to one live connection: identity plus the outbound queue sender.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub user_id: String,
    pub connected_at: DateTime<Utc>,
    sender: ConnectionSender,
}

impl ConnectionHandle {
    /// Enqueue a frame on this connection's outbound queue. Non-blocking;
    /// ordering is the enqueue order. Fails only when the writer task has
    /// exited, i.e. the connection is dead.
    pub fn send(&self, msg: axum::extract::ws::Message) -> Result<(), FanoutError> {
        self.sender.send(msg).map_err(|_| FanoutError::DeliveryFailed {
            connection_id: self.id,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Result of a successful registration.
#[derive(Debug)]
pub struct Registered {
    pub handle: ConnectionHandle,
    /// True when this was the user's 0→1 connection transition, i.e. the
    /// caller should emit exactly one `user_presence { online }` event.
    pub first_for_user: bool,
}

/// Result of an unregistration that actually removed a connection.
#[derive(Debug)]
pub struct Disconnected {
    pub user_id: String,
    /// True when this was the user's 1→0 connection transition. Only the
    /// call that removes the final handle observes it, so the offline
    /// presence event fires exactly once even under concurrent teardown.
    pub last_for_user: bool,
}

pub struct ConnectionRegistry {
    /// user id → live connection handles
    connections: DashMap<String, Vec<ConnectionHandle>>,
    /// connection id → owning user id
    owners: DashMap<ConnectionId, String>,
    max_per_user: usize,
}

impl ConnectionRegistry {
    pub fn new(max_per_user: usize) -> Self {
        Self {
            connections: DashMap::new(),
            owners: DashMap::new(),
            max_per_user,
        }
    }

    /// Register a connection under a user. Refuses with `CapacityExceeded`
    /// once the user already holds the configured maximum of live
    /// connections; the excess connection is rejected, existing ones are
    /// untouched.
    pub fn register(
        &self,
        user_id: &str,
        sender: ConnectionSender,
    ) -> Result<Registered, FanoutError> {
        let handle = ConnectionHandle {
            id: Uuid::now_v7(),
            user_id: user_id.to_string(),
            connected_at: Utc::now(),
            sender,
        };

        let first_for_user = {
            let mut entry = self.connections.entry(user_id.to_string()).or_default();
            // Connections whose writer died without a clean unregister must
            // not count against the cap.
            entry.retain(|h| !h.is_closed());
            if entry.len() >= self.max_per_user {
                return Err(FanoutError::CapacityExceeded {
                    user_id: user_id.to_string(),
                    limit: self.max_per_user,
                });
            }
            let first = entry.is_empty();
            entry.push(handle.clone());
            first
        };

        self.owners.insert(handle.id, user_id.to_string());

        tracing::debug!(
            user_id = %user_id,
            connection_id = %handle.id,
            "Connection registered"
        );

        Ok(Registered {
            handle,
            first_for_user,
        })
    }

    /// Remove a connection by id. Idempotent: removing an already-removed id
    /// is a no-op and returns `None`.
    pub fn unregister(&self, connection_id: ConnectionId) -> Option<Disconnected> {
        // The owners entry is removed first; whichever caller wins this
        // removal performs the actual teardown, so double-unregister from
        // the actor and the broadcaster cannot race.
        let (_, user_id) = self.owners.remove(&connection_id)?;

        let mut last_for_user = false;
        if let Some(mut entry) = self.connections.get_mut(&user_id) {
            entry.retain(|h| h.id != connection_id);
            last_for_user = entry.is_empty();
        }
        if last_for_user {
            self.connections.remove_if(&user_id, |_, v| v.is_empty());
        }

        tracing::debug!(
            user_id = %user_id,
            connection_id = %connection_id,
            last_for_user,
            "Connection unregistered"
        );

        Some(Disconnected {
            user_id,
            last_for_user,
        })
    }

    /// Snapshot of a user's registered connections, consistent under
    /// concurrent register/unregister calls: an unregistered connection
    /// never appears. A connection whose writer has died but which has not
    /// been unregistered yet may appear once more — its next delivery
    /// attempt fails without reaching anyone and triggers its teardown.
    pub fn connections_for(&self, user_id: &str) -> Vec<ConnectionHandle> {
        self.connections
            .get(user_id)
            .map(|entry| entry.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot of every registered connection across all users. Used for
    /// broadcasts with no channel scope (presence changes).
    pub fn all_connections(&self) -> Vec<ConnectionHandle> {
        self.connections
            .iter()
            .flat_map(|entry| entry.value().clone())
            .collect()
    }

    pub fn connection_count(&self, user_id: &str) -> usize {
        self.connections
            .get(user_id)
            .map(|entry| entry.iter().filter(|h| !h.is_closed()).count())
            .unwrap_or(0)
    }
}
