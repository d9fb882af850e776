//! Inbound message dispatch for one WebSocket connection.
//!
//! Decodes the JSON envelope and routes to the subscribe/typing/message/
//! presence handlers. Every failure here is scoped to the offending
//! connection: bad input earns it an `error` event, nothing more.

use axum::extract::ws::Message;
use relay_protocol::{ClientMessage, PresenceStatus, ServerEvent};

use crate::chat::{membership, messages, presence, typing};
use crate::state::AppState;
use crate::ws::ConnectionSender;

/// Handle one incoming text frame: decode the envelope, dispatch.
pub async fn handle_text_message(
    text: &str,
    tx: &ConnectionSender,
    state: &AppState,
    user_id: &str,
) {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(
                user_id = %user_id,
                error = %e,
                "Failed to decode client envelope"
            );
            send_error(tx, "Invalid message envelope");
            return;
        }
    };

    match message {
        ClientMessage::Subscribe { channel_ids } => {
            handle_subscribe(state, user_id, channel_ids, tx).await;
        }
        ClientMessage::Unsubscribe { channel_ids } => {
            for channel_id in &channel_ids {
                state.subscriptions.unsubscribe(user_id, channel_id);
            }
            tracing::debug!(
                user_id = %user_id,
                channels = channel_ids.len(),
                "Unsubscribed"
            );
        }
        ClientMessage::Typing { channel_id, typing } => {
            typing::relay_typing(state, user_id, &channel_id, typing);
        }
        ClientMessage::SendMessage {
            channel_id,
            content,
            reply_to,
        } => {
            if let Err(e) =
                messages::handle_send(state, user_id, &channel_id, &content, reply_to).await
            {
                tracing::warn!(
                    user_id = %user_id,
                    channel_id = %channel_id,
                    error = %e,
                    "send_message rejected"
                );
                send_error(tx, "Failed to send message");
            }
        }
        ClientMessage::UpdatePresence { status } => {
            handle_update_presence(state, user_id, status, tx);
        }
        ClientMessage::Ping {} => {
            send_event(tx, &ServerEvent::Pong {});
        }
    }
}

/// Subscribe to a batch of channels. Each channel is authorized against the
/// membership collaborator; a denied channel is skipped and logged, never
/// fatal to the rest of the batch. The ack lists only the accepted channels
/// so membership of the others is not leaked.
async fn handle_subscribe(
    state: &AppState,
    user_id: &str,
    channel_ids: Vec<String>,
    tx: &ConnectionSender,
) {
    let mut accepted = Vec::new();

    for channel_id in channel_ids {
        match membership::is_channel_member(&state.db, user_id, &channel_id).await {
            Ok(true) => {
                state.subscriptions.subscribe(user_id, &channel_id);
                accepted.push(channel_id);
            }
            Ok(false) => {
                tracing::info!(
                    user_id = %user_id,
                    channel_id = %channel_id,
                    "Subscribe denied: not a channel member"
                );
            }
            Err(e) => {
                tracing::warn!(
                    user_id = %user_id,
                    channel_id = %channel_id,
                    error = %e,
                    "Membership lookup failed, skipping channel"
                );
            }
        }
    }

    tracing::debug!(
        user_id = %user_id,
        accepted = accepted.len(),
        "Subscribe batch processed"
    );
    send_event(
        tx,
        &ServerEvent::Subscribed {
            channel_ids: accepted,
        },
    );
}

/// Explicit presence override from a connected client. Only `online`,
/// `away`, and `busy` may be set; `offline` is derived from the connection
/// count and cannot be requested.
fn handle_update_presence(
    state: &AppState,
    user_id: &str,
    status: PresenceStatus,
    tx: &ConnectionSender,
) {
    if status == PresenceStatus::Offline {
        send_error(tx, "Cannot set presence to offline");
        return;
    }
    presence::set_user_presence(state, user_id, status);
}

/// Encode and enqueue an event on this connection's outbound queue.
pub fn send_event(tx: &ConnectionSender, event: &ServerEvent) {
    match serde_json::to_string(event) {
        Ok(json) => {
            let _ = tx.send(Message::Text(json.into()));
        }
        Err(e) => {
            tracing::error!(kind = event.kind(), error = %e, "Failed to encode event");
        }
    }
}

fn send_error(tx: &ConnectionSender, message: &str) {
    send_event(
        tx,
        &ServerEvent::Error {
            message: message.to_string(),
        },
    );
}
