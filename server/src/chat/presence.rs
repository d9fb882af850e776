//! Server-side presence tracking and broadcast.
//!
//! In-memory presence store (DashMap) keyed by user id. Presence is derived,
//! never persisted: a user is `online` iff they hold at least one live
//! connection. Explicit `away`/`busy` overrides are ephemeral and lose to
//! `offline` when the last connection closes.

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use relay_protocol::{PresenceStatus, ServerEvent};
use serde::Serialize;

use crate::auth::middleware::Claims;
use crate::state::AppState;

/// Entry tracked per user in the presence map.
#[derive(Debug, Clone)]
pub struct PresenceEntry {
    pub status: PresenceStatus,
    pub updated_at: DateTime<Utc>,
}

pub struct PresenceTracker {
    users: DashMap<String, PresenceEntry>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self {
            users: DashMap::new(),
        }
    }

    fn set(&self, user_id: &str, status: PresenceStatus) -> PresenceStatus {
        self.users.insert(
            user_id.to_string(),
            PresenceEntry {
                status,
                updated_at: Utc::now(),
            },
        );
        status
    }

    /// First connection came up (0→1 transition).
    pub fn user_online(&self, user_id: &str) -> PresenceStatus {
        self.set(user_id, PresenceStatus::Online)
    }

    /// Last connection went away (1→0 transition). Clears any explicit
    /// override; offline always wins.
    pub fn user_offline(&self, user_id: &str) -> PresenceStatus {
        self.set(user_id, PresenceStatus::Offline)
    }

    /// Explicit override from a connected client. Setting `online` resets a
    /// prior `away`/`busy` override.
    pub fn set_override(&self, user_id: &str, status: PresenceStatus) -> PresenceStatus {
        self.set(user_id, status)
    }

    pub fn status_of(&self, user_id: &str) -> PresenceStatus {
        self.users
            .get(user_id)
            .map(|e| e.status)
            .unwrap_or(PresenceStatus::Offline)
    }

    /// Current presence of every tracked user. Used for the initial
    /// snapshot sent to a newly connected client.
    pub fn snapshot(&self) -> Vec<(String, PresenceEntry)> {
        self.users
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Update a user's presence and broadcast the change to all connected
/// clients. Called on connect/disconnect transitions and on explicit
/// `update_presence` overrides.
pub fn set_user_presence(state: &AppState, user_id: &str, status: PresenceStatus) {
    let status = state.presence.set_override(user_id, status);
    state.broadcaster.broadcast_to_all(&ServerEvent::UserPresence {
        user_id: user_id.to_string(),
        status,
    });
}

// --- REST endpoint ---

#[derive(Debug, Serialize)]
pub struct PresenceResponse {
    pub user_id: String,
    pub status: String,
    pub updated_at: String,
}

/// GET /api/presence — Current presence for all tracked users. JWT auth
/// required.
pub async fn get_presence(
    State(state): State<AppState>,
    _claims: Claims,
) -> Json<Vec<PresenceResponse>> {
    let entries: Vec<PresenceResponse> = state
        .presence
        .snapshot()
        .into_iter()
        .map(|(user_id, entry)| PresenceResponse {
            user_id,
            status: entry.status.as_str().to_string(),
            updated_at: entry.updated_at.to_rfc3339(),
        })
        .collect();

    Json(entries)
}
