//! Typing indicator relay.
//!
//! Typing state is ephemeral: it skips persistence entirely and goes
//! straight through the fanout path to the channel's subscribers. The server
//! relays every value it receives — no deduplication, no server-side TTL.
//! Consumers treat a `typing: true` that is not refreshed within a few
//! seconds as stale.

use relay_protocol::ServerEvent;

use crate::state::AppState;

pub fn relay_typing(state: &AppState, user_id: &str, channel_id: &str, typing: bool) {
    tracing::trace!(
        user_id = %user_id,
        channel_id = %channel_id,
        typing,
        "Relaying typing indicator"
    );
    state.broadcaster.broadcast_to_channel(
        channel_id,
        &ServerEvent::UserTyping {
            channel_id: channel_id.to_string(),
            user_id: user_id.to_string(),
            typing,
        },
    );
}
