//! Error taxonomy for the fanout subsystem.
//!
//! Per-connection failures (`DeliveryFailed`) are always isolated: they are
//! caught and logged where they occur and never propagate to other
//! connections or abort an in-flight broadcast. Only failures that make a
//! specific operation meaningless are surfaced to that operation's caller.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum FanoutError {
    /// Bad or missing credential at connect time. The connection is refused
    /// before it is ever registered.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Subscribe to a channel the user is not a member of. Skipped and
    /// logged; never fatal to the rest of the subscribe batch.
    #[error("user {user_id} is not a member of channel {channel_id}")]
    AuthorizationDenied { user_id: String, channel_id: String },

    /// A user hit the configured concurrent-connection cap. The new
    /// connection is refused; existing connections are unaffected.
    #[error("user {user_id} already has {limit} live connections")]
    CapacityExceeded { user_id: String, limit: usize },

    /// A single connection's send failed. The connection is torn down;
    /// deliveries to other connections proceed.
    #[error("delivery to connection {connection_id} failed")]
    DeliveryFailed { connection_id: Uuid },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("database lock poisoned")]
    DbLock,

    #[error("blocking task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}
