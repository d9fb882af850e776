use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use serde::Deserialize;

use crate::auth::jwt;
use crate::state::AppState;
use crate::ws::actor;

/// Query parameters for WebSocket connection.
/// Auth is via query param ?token=JWT — browsers cannot set headers on a
/// WebSocket upgrade.
#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    pub token: Option<String>,
}

/// WebSocket close codes:
/// 4001 = token expired
/// 4002 = token invalid or missing
const CLOSE_TOKEN_EXPIRED: u16 = 4001;
const CLOSE_TOKEN_INVALID: u16 = 4002;

/// GET /ws?token=JWT
/// WebSocket upgrade endpoint. Authenticates via query parameter.
/// On auth failure, upgrades then immediately closes with the appropriate
/// close code — the connection is never registered.
/// On success, spawns an actor for the connection.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsAuthQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let claims = params
        .token
        .as_deref()
        .ok_or(jwt::TokenError::Missing)
        .and_then(|token| jwt::validate_access_token(&state.jwt_secret, token));

    match claims {
        Ok(claims) => {
            tracing::info!(user_id = %claims.sub, "WebSocket connection authenticated");
            ws.on_upgrade(move |socket| actor::run_connection(socket, state, claims.sub))
        }
        Err(err) => {
            let (close_code, reason) = match err {
                jwt::TokenError::Expired => (CLOSE_TOKEN_EXPIRED, "Token expired"),
                _ => (CLOSE_TOKEN_INVALID, "Token invalid"),
            };

            tracing::warn!(
                close_code = close_code,
                reason = reason,
                "WebSocket auth failed"
            );

            ws.on_upgrade(move |socket| refuse(socket, close_code, reason))
        }
    }
}

/// Close an unauthenticated socket with an explicit code.
async fn refuse(mut socket: WebSocket, code: u16, reason: &'static str) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })))
        .await;
}
