//! Fanout broadcaster: resolves a channel event to concrete connections and
//! delivers it, tolerating per-connection failure.
//!
//! All producers (message handler, typing handler, presence transitions)
//! submit events here rather than writing to sockets directly, so the
//! ordering and failure-isolation guarantees hold globally:
//!
//! - FIFO per destination: frames are enqueued inline, in submission order,
//!   onto each connection's outbound queue; the connection's writer task
//!   drains that queue in order. No cross-channel ordering is promised.
//! - One bad connection can't poison the batch: enqueue is non-blocking, a
//!   failed enqueue is logged and schedules teardown of that connection
//!   only, and delivery to the remaining connections always proceeds.

use std::sync::Arc;

use axum::extract::ws::Message;
use relay_protocol::ServerEvent;

use crate::chat::presence::PresenceTracker;
use crate::ws::registry::{ConnectionHandle, ConnectionRegistry, Disconnected};
use crate::ws::subscriptions::SubscriptionIndex;

pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
    subscriptions: Arc<SubscriptionIndex>,
    presence: Arc<PresenceTracker>,
}

impl Broadcaster {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        subscriptions: Arc<SubscriptionIndex>,
        presence: Arc<PresenceTracker>,
    ) -> Self {
        Self {
            registry,
            subscriptions,
            presence,
        }
    }

    fn encode(event: &ServerEvent) -> Option<Message> {
        match serde_json::to_string(event) {
            Ok(json) => Some(Message::Text(json.into())),
            Err(e) => {
                tracing::error!(kind = event.kind(), error = %e, "Failed to encode event");
                None
            }
        }
    }

    /// Deliver an event to every connection of every user subscribed to the
    /// channel.
    pub fn broadcast_to_channel(&self, channel_id: &str, event: &ServerEvent) {
        let Some(frame) = Self::encode(event) else {
            return;
        };

        let mut dead = Vec::new();
        for user_id in self.subscriptions.subscribers_of(channel_id) {
            for handle in self.registry.connections_for(&user_id) {
                if handle.send(frame.clone()).is_err() {
                    dead.push(handle);
                }
            }
        }

        tracing::trace!(
            channel_id = %channel_id,
            kind = event.kind(),
            "Channel broadcast dispatched"
        );
        self.reap(dead);
    }

    /// Deliver an event to all of one user's connections (personal acks).
    pub fn send_to_user(&self, user_id: &str, event: &ServerEvent) {
        let Some(frame) = Self::encode(event) else {
            return;
        };

        let mut dead = Vec::new();
        for handle in self.registry.connections_for(user_id) {
            if handle.send(frame.clone()).is_err() {
                dead.push(handle);
            }
        }
        self.reap(dead);
    }

    /// Deliver an event to every live connection (presence changes).
    pub fn broadcast_to_all(&self, event: &ServerEvent) {
        let Some(frame) = Self::encode(event) else {
            return;
        };

        let mut dead = Vec::new();
        for handle in self.registry.all_connections() {
            if handle.send(frame.clone()).is_err() {
                dead.push(handle);
            }
        }
        self.reap(dead);
    }

    /// Shared teardown for a connection that left the registry: when it was
    /// the user's last one, subscriptions are cleared (they do not outlive
    /// the connection batch) and the offline presence transition is
    /// broadcast. Called by the connection actor on reader exit and by the
    /// reaper on delivery failure.
    pub fn handle_disconnect(&self, disconnect: Disconnected) {
        if !disconnect.last_for_user {
            return;
        }
        self.subscriptions.clear_user(&disconnect.user_id);
        let status = self.presence.user_offline(&disconnect.user_id);
        self.broadcast_to_all(&ServerEvent::UserPresence {
            user_id: disconnect.user_id,
            status,
        });
    }

    /// Tear down connections whose enqueue failed. Iterative worklist: the
    /// offline broadcasts issued here may themselves surface further dead
    /// connections, which join the worklist instead of recursing.
    fn reap(&self, mut dead: Vec<ConnectionHandle>) {
        while let Some(handle) = dead.pop() {
            tracing::warn!(
                connection_id = %handle.id,
                user_id = %handle.user_id,
                "Delivery failed, tearing down connection"
            );
            let Some(disconnect) = self.registry.unregister(handle.id) else {
                continue; // already torn down elsewhere
            };
            if !disconnect.last_for_user {
                continue;
            }

            self.subscriptions.clear_user(&disconnect.user_id);
            let status = self.presence.user_offline(&disconnect.user_id);
            let event = ServerEvent::UserPresence {
                user_id: disconnect.user_id,
                status,
            };
            if let Some(frame) = Self::encode(&event) {
                for h in self.registry.all_connections() {
                    if h.send(frame.clone()).is_err() {
                        dead.push(h);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_protocol::PresenceStatus;
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Fixture {
        broadcaster: Broadcaster,
        registry: Arc<ConnectionRegistry>,
        subscriptions: Arc<SubscriptionIndex>,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(ConnectionRegistry::new(16));
        let subscriptions = Arc::new(SubscriptionIndex::new());
        let presence = Arc::new(PresenceTracker::new());
        let broadcaster =
            Broadcaster::new(registry.clone(), subscriptions.clone(), presence.clone());
        Fixture {
            broadcaster,
            registry,
            subscriptions,
        }
    }

    fn connect(fx: &Fixture, user_id: &str) -> (uuid::Uuid, UnboundedReceiver<Message>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let registered = fx.registry.register(user_id, tx).unwrap();
        (registered.handle.id, rx)
    }

    fn recv_event(rx: &mut UnboundedReceiver<Message>) -> Option<ServerEvent> {
        match rx.try_recv().ok()? {
            Message::Text(text) => serde_json::from_str(&text).ok(),
            _ => None,
        }
    }

    fn typing_event(channel: &str, user: &str) -> ServerEvent {
        ServerEvent::UserTyping {
            channel_id: channel.into(),
            user_id: user.into(),
            typing: true,
        }
    }

    #[tokio::test]
    async fn broadcast_reaches_all_subscribed_connections() {
        let fx = fixture();
        let (_id_a, mut rx_a) = connect(&fx, "alice");
        let (_id_b1, mut rx_b1) = connect(&fx, "bob");
        let (_id_b2, mut rx_b2) = connect(&fx, "bob");
        let (_id_c, mut rx_c) = connect(&fx, "carol");

        fx.subscriptions.subscribe("alice", "general");
        fx.subscriptions.subscribe("bob", "general");

        fx.broadcaster
            .broadcast_to_channel("general", &typing_event("general", "alice"));

        assert!(recv_event(&mut rx_a).is_some());
        assert!(recv_event(&mut rx_b1).is_some());
        assert!(recv_event(&mut rx_b2).is_some());
        // carol is not subscribed
        assert!(recv_event(&mut rx_c).is_none());
    }

    #[tokio::test]
    async fn one_dead_connection_does_not_poison_the_batch() {
        let fx = fixture();
        let mut receivers = Vec::new();
        let mut dead_id = None;
        for i in 0..5 {
            let user = format!("user-{}", i);
            let (id, rx) = connect(&fx, &user);
            fx.subscriptions.subscribe(&user, "general");
            if i == 2 {
                dead_id = Some(id);
                drop(rx); // connection #3's sends will fail
            } else {
                receivers.push(rx);
            }
        }

        fx.broadcaster
            .broadcast_to_channel("general", &typing_event("general", "user-0"));

        for rx in receivers.iter_mut() {
            assert!(recv_event(rx).is_some(), "live connection missed the event");
        }
        // the dead connection was removed from the registry afterward
        assert!(fx.registry.unregister(dead_id.unwrap()).is_none());
        assert_eq!(fx.registry.connection_count("user-2"), 0);
    }

    #[tokio::test]
    async fn events_arrive_in_submission_order_per_destination() {
        let fx = fixture();
        let (_id, mut rx) = connect(&fx, "alice");
        fx.subscriptions.subscribe("alice", "general");
        // another destination in the same broadcast
        let (_id_b, _rx_b) = connect(&fx, "bob");
        fx.subscriptions.subscribe("bob", "general");

        for content in ["A", "B", "C"] {
            fx.broadcaster.broadcast_to_channel(
                "general",
                &ServerEvent::MessageDeleted {
                    id: content.into(),
                    channel_id: "general".into(),
                },
            );
        }

        let mut seen = Vec::new();
        while let Some(ServerEvent::MessageDeleted { id, .. }) = recv_event(&mut rx) {
            seen.push(id);
        }
        assert_eq!(seen, vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn send_to_user_scopes_to_one_user() {
        let fx = fixture();
        let (_a1, mut rx_a1) = connect(&fx, "alice");
        let (_a2, mut rx_a2) = connect(&fx, "alice");
        let (_b, mut rx_b) = connect(&fx, "bob");

        fx.broadcaster
            .send_to_user("alice", &ServerEvent::Pong {});

        assert!(matches!(recv_event(&mut rx_a1), Some(ServerEvent::Pong {})));
        assert!(matches!(recv_event(&mut rx_a2), Some(ServerEvent::Pong {})));
        assert!(recv_event(&mut rx_b).is_none());
    }

    #[tokio::test]
    async fn reaping_last_connection_broadcasts_offline_and_clears_subs() {
        let fx = fixture();
        let (_a, mut rx_a) = connect(&fx, "alice");
        let (_b, rx_b) = connect(&fx, "bob");
        fx.subscriptions.subscribe("alice", "general");
        fx.subscriptions.subscribe("bob", "general");
        drop(rx_b); // bob's only connection dies

        fx.broadcaster
            .broadcast_to_channel("general", &typing_event("general", "alice"));

        // alice got the typing event, then bob's offline transition
        assert!(matches!(
            recv_event(&mut rx_a),
            Some(ServerEvent::UserTyping { .. })
        ));
        match recv_event(&mut rx_a) {
            Some(ServerEvent::UserPresence { user_id, status }) => {
                assert_eq!(user_id, "bob");
                assert_eq!(status, PresenceStatus::Offline);
            }
            other => panic!("expected bob's offline presence, got {:?}", other),
        }
        assert!(fx.subscriptions.subscribers_of("general") == vec!["alice"]);
    }
}
