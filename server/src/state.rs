use std::sync::Arc;
use std::time::Duration;

use crate::chat::presence::PresenceTracker;
use crate::config::Config;
use crate::db::DbPool;
use crate::ws::broadcast::Broadcaster;
use crate::ws::registry::ConnectionRegistry;
use crate::ws::subscriptions::SubscriptionIndex;

/// Shared application state passed to all handlers via axum State extractor.
///
/// The registry, subscription index, presence tracker, and broadcaster are
/// constructed once here and injected everywhere they are needed — there is
/// no hidden global connection manager. They live for the life of the
/// process and die with it.
#[derive(Clone)]
pub struct AppState {
    /// SQLite connection wrapped in Arc<Mutex>
    pub db: DbPool,
    /// JWT signing secret (256-bit random key)
    pub jwt_secret: Vec<u8>,
    /// Live WebSocket connections per user
    pub registry: Arc<ConnectionRegistry>,
    /// Which users want events for which channels
    pub subscriptions: Arc<SubscriptionIndex>,
    /// In-memory presence map
    pub presence: Arc<PresenceTracker>,
    /// Sole writer of outbound events
    pub broadcaster: Arc<Broadcaster>,
    /// Per-frame flush deadline before a connection is treated as dead
    pub send_timeout: Duration,
    /// Server-initiated ping cadence
    pub ping_interval: Duration,
    /// Pong deadline after a ping
    pub pong_timeout: Duration,
}

impl AppState {
    pub fn new(db: DbPool, jwt_secret: Vec<u8>, config: &Config) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(config.max_connections_per_user));
        let subscriptions = Arc::new(SubscriptionIndex::new());
        let presence = Arc::new(PresenceTracker::new());
        let broadcaster = Arc::new(Broadcaster::new(
            registry.clone(),
            subscriptions.clone(),
            presence.clone(),
        ));

        Self {
            db,
            jwt_secret,
            registry,
            subscriptions,
            presence,
            broadcaster,
            send_timeout: Duration::from_secs(config.send_timeout_secs),
            ping_interval: Duration::from_secs(config.ping_interval_secs),
            pong_timeout: Duration::from_secs(config.pong_timeout_secs),
        }
    }
}
