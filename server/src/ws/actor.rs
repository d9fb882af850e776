use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use relay_protocol::ServerEvent;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};

use crate::error::FanoutError;
use crate::state::AppState;
use crate::ws::protocol;

/// Close code for a connection refused because the user is at the
/// concurrent-connection cap.
const CLOSE_CAPACITY_EXCEEDED: u16 = 4005;

/// Run the actor-per-connection pattern for an authenticated WebSocket.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, drains the connection's outbound queue in
///   order; each flush is bounded by the configured send timeout
/// - Reader task: processes incoming envelopes, dispatches to handlers
///
/// The mpsc channel allows any part of the system to push events to this
/// client by cloning the sender; the broadcaster is the only producer that
/// does so for chat events.
pub async fn run_connection(socket: WebSocket, state: AppState, user_id: String) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    // Register this connection; a user past the cap is refused with an
    // explicit close code, leaving their existing connections untouched.
    let registered = match state.registry.register(&user_id, tx.clone()) {
        Ok(registered) => registered,
        Err(e @ FanoutError::CapacityExceeded { .. }) => {
            tracing::warn!(user_id = %user_id, error = %e, "Connection refused");
            let _ = ws_sender
                .send(Message::Close(Some(CloseFrame {
                    code: CLOSE_CAPACITY_EXCEEDED,
                    reason: "Too many concurrent connections".into(),
                })))
                .await;
            return;
        }
        Err(e) => {
            tracing::error!(user_id = %user_id, error = %e, "Registration failed");
            return;
        }
    };
    let connection_id = registered.handle.id;

    // Auth/registration ack, always the first frame the client sees.
    protocol::send_event(
        &tx,
        &ServerEvent::Connected {
            user_id: user_id.clone(),
            connection_id: connection_id.to_string(),
        },
    );

    // Only the 0→1 transition broadcasts presence; a second tab is silent.
    if registered.first_for_user {
        let status = state.presence.user_online(&user_id);
        state.broadcaster.broadcast_to_all(&ServerEvent::UserPresence {
            user_id: user_id.clone(),
            status,
        });
    }

    // Send the current presence snapshot to the newly connected client.
    for (peer_id, entry) in state.presence.snapshot() {
        protocol::send_event(
            &tx,
            &ServerEvent::UserPresence {
                user_id: peer_id,
                status: entry.status,
            },
        );
    }

    tracing::info!(
        user_id = %user_id,
        connection_id = %connection_id,
        "WebSocket actor started"
    );

    // Writer task: drains the outbound queue into the socket sink.
    let writer_handle = tokio::spawn(writer_task(ws_sender, rx, state.send_timeout));

    // Ping task: periodic pings, close on missed pong.
    let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<()>();
    let ping_tx = tx.clone();
    let ping_interval = state.ping_interval;
    let pong_timeout = state.pong_timeout;
    let ping_handle = tokio::spawn(async move {
        let mut ping_timer = interval(ping_interval);
        // Skip the first immediate tick
        ping_timer.tick().await;

        loop {
            ping_timer.tick().await;

            if ping_tx.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
                // Writer task has died — connection is gone
                break;
            }

            match timeout(pong_timeout, pong_rx.recv()).await {
                Ok(Some(())) => {}
                _ => {
                    tracing::warn!("Pong timeout, closing connection");
                    let _ = ping_tx.send(Message::Close(Some(CloseFrame {
                        code: 1001,
                        reason: "Pong timeout".into(),
                    })));
                    break;
                }
            }
        }
    });

    // Reader loop: process incoming WebSocket messages.
    loop {
        match ws_receiver.next().await {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    protocol::handle_text_message(&text, &tx, &state, &user_id).await;
                }
                Message::Binary(_) => {
                    tracing::debug!(
                        user_id = %user_id,
                        "Received binary frame (expected JSON text), ignoring"
                    );
                }
                Message::Pong(_) => {
                    let _ = pong_tx.send(());
                }
                Message::Ping(data) => {
                    let _ = tx.send(Message::Pong(data));
                }
                Message::Close(frame) => {
                    tracing::info!(
                        user_id = %user_id,
                        reason = ?frame,
                        "Client initiated close"
                    );
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(
                    user_id = %user_id,
                    error = %e,
                    "WebSocket receive error"
                );
                break;
            }
            None => {
                tracing::info!(user_id = %user_id, "WebSocket stream ended");
                break;
            }
        }
    }

    // Cleanup: stop the writer and ping tasks, then remove the connection
    // from the indices. Unregister is idempotent — the broadcaster may have
    // already reaped this connection after a delivery failure.
    writer_handle.abort();
    ping_handle.abort();

    if let Some(disconnect) = state.registry.unregister(connection_id) {
        state.broadcaster.handle_disconnect(disconnect);
    }

    tracing::info!(
        user_id = %user_id,
        connection_id = %connection_id,
        "WebSocket actor stopped"
    );
}

/// Writer task: receives frames from the outbound queue and forwards them to
/// the WebSocket sink in order. A flush that exceeds `send_timeout` means
/// the consumer is too slow to keep; the task exits, which tears the
/// connection down without stalling anyone else.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
    send_timeout: Duration,
) {
    while let Some(msg) = rx.recv().await {
        match timeout(send_timeout, ws_sender.send(msg)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => break, // socket is broken
            Err(_) => {
                tracing::warn!("Outbound flush timed out, dropping connection");
                break;
            }
        }
    }
}
