//! Wire protocol for the Relay WebSocket channel.
//!
//! Every frame in both directions is a JSON envelope of the shape
//! `{"type": string, "data": object}`, modeled here as adjacently-tagged
//! serde enums. The server and client crates share these types so the two
//! sides cannot drift apart.

use serde::{Deserialize, Serialize};

/// User presence status.
///
/// `online` and `offline` are derived from the user's live-connection count;
/// `away` and `busy` are explicit, ephemeral overrides set by a connected
/// client and cleared when the user's last connection closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Away,
    Busy,
    Offline,
}

impl PresenceStatus {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "online" => Some(Self::Online),
            "away" => Some(Self::Away),
            "busy" => Some(Self::Busy),
            "offline" => Some(Self::Offline),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Away => "away",
            Self::Busy => "busy",
            Self::Offline => "offline",
        }
    }
}

impl std::fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client → server messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Subscribe to a batch of channels. Unauthorized channels are silently
    /// skipped server-side; the `subscribed` ack lists only the accepted ones.
    Subscribe { channel_ids: Vec<String> },
    /// Unsubscribe from a batch of channels. Idempotent.
    Unsubscribe { channel_ids: Vec<String> },
    /// Typing indicator. Relayed as-is to channel subscribers; the server
    /// neither deduplicates repeated `true` values nor expires stale ones.
    Typing { channel_id: String, typing: bool },
    /// Create a message in a channel. The server persists it durably before
    /// fanning out the resulting `new_message` event.
    SendMessage {
        channel_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply_to: Option<String>,
    },
    /// Explicit presence override (`online`, `away`, or `busy`).
    UpdatePresence { status: PresenceStatus },
    /// Application-level keepalive; answered with `pong`.
    Ping {},
}

/// Server → client events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Sent once after the connection is authenticated and registered.
    Connected {
        user_id: String,
        connection_id: String,
    },
    /// Ack for a `subscribe` batch, listing only the accepted channels.
    Subscribed { channel_ids: Vec<String> },
    /// A durably-committed message. Some producers emit this under the
    /// `message_sent` name; both spellings decode to the same event.
    #[serde(rename = "new_message", alias = "message_sent")]
    NewMessage {
        id: String,
        channel_id: String,
        user_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply_to: Option<String>,
        created_at: String,
    },
    MessageUpdated {
        id: String,
        channel_id: String,
        content: String,
        updated_at: String,
    },
    MessageDeleted { id: String, channel_id: String },
    UserTyping {
        channel_id: String,
        user_id: String,
        typing: bool,
    },
    UserPresence {
        user_id: String,
        status: PresenceStatus,
    },
    Pong {},
    /// Per-connection error report; never fatal to other connections.
    Error { message: String },
}

impl ServerEvent {
    /// The wire-level event name, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Subscribed { .. } => "subscribed",
            Self::NewMessage { .. } => "new_message",
            Self::MessageUpdated { .. } => "message_updated",
            Self::MessageDeleted { .. } => "message_deleted",
            Self::UserTyping { .. } => "user_typing",
            Self::UserPresence { .. } => "user_presence",
            Self::Pong {} => "pong",
            Self::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_message_envelope_shape() {
        let msg = ClientMessage::Typing {
            channel_id: "general".into(),
            typing: true,
        };
        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "typing");
        assert_eq!(json["data"]["channel_id"], "general");
        assert_eq!(json["data"]["typing"], true);
    }

    #[test]
    fn send_message_omits_absent_reply_to() {
        let msg = ClientMessage::SendMessage {
            channel_id: "general".into(),
            content: "hello".into(),
            reply_to: None,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("reply_to"));
    }

    #[test]
    fn message_sent_alias_decodes_as_new_message() {
        let raw = r#"{"type":"message_sent","data":{
            "id":"m1","channel_id":"c1","user_id":"u1",
            "content":"hi","created_at":"2026-01-01T00:00:00Z"}}"#;
        let event: ServerEvent = serde_json::from_str(raw).unwrap();
        assert!(matches!(event, ServerEvent::NewMessage { .. }));
        assert_eq!(event.kind(), "new_message");
    }

    #[test]
    fn unknown_type_is_rejected() {
        let raw = r#"{"type":"warp_drive","data":{}}"#;
        assert!(serde_json::from_str::<ClientMessage>(raw).is_err());
    }

    #[test]
    fn presence_status_round_trip() {
        for s in ["online", "away", "busy", "offline"] {
            let status = PresenceStatus::from_str(s).unwrap();
            assert_eq!(status.as_str(), s);
        }
        assert!(PresenceStatus::from_str("dnd").is_none());
    }
}
