pub mod actor;
pub mod broadcast;
pub mod handler;
pub mod protocol;
pub mod registry;
pub mod subscriptions;

use tokio::sync::mpsc;

/// Sender half of a WebSocket connection's outbound queue.
/// The broadcaster clones this to push frames to a specific client; the
/// connection's writer task owns the receiving half and the socket sink.
pub type ConnectionSender = mpsc::UnboundedSender<axum::extract::ws::Message>;
