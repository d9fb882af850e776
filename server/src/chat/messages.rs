//! Message events: persist-then-fanout.
//!
//! The fanout layer never broadcasts an event that has not been durably
//! committed upstream. `handle_send` writes the row first and only hands the
//! committed message to the broadcaster; edits and deletes arrive from the
//! data layer through the `broadcast_message_*` entry points after their own
//! commits.

use chrono::Utc;
use relay_protocol::ServerEvent;
use uuid::Uuid;

use crate::db::DbPool;
use crate::error::FanoutError;
use crate::state::AppState;

/// A message row as committed by the persistence layer.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub id: String,
    pub channel_id: String,
    pub user_id: String,
    pub content: String,
    pub reply_to: Option<String>,
    pub created_at: String,
}

impl StoredMessage {
    pub fn into_event(self) -> ServerEvent {
        ServerEvent::NewMessage {
            id: self.id,
            channel_id: self.channel_id,
            user_id: self.user_id,
            content: self.content,
            reply_to: self.reply_to,
            created_at: self.created_at,
        }
    }
}

/// Durably create a message row.
pub async fn create_message(
    db: &DbPool,
    user_id: &str,
    channel_id: &str,
    content: &str,
    reply_to: Option<String>,
) -> Result<StoredMessage, FanoutError> {
    let message = StoredMessage {
        id: Uuid::now_v7().to_string(),
        channel_id: channel_id.to_string(),
        user_id: user_id.to_string(),
        content: content.to_string(),
        reply_to,
        created_at: Utc::now().to_rfc3339(),
    };

    let db = db.clone();
    let row = message.clone();
    tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| FanoutError::DbLock)?;
        conn.execute(
            "INSERT INTO messages (id, channel_id, user_id, content, reply_to, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                row.id,
                row.channel_id,
                row.user_id,
                row.content,
                row.reply_to,
                row.created_at
            ],
        )?;
        Ok::<_, FanoutError>(())
    })
    .await??;

    Ok(message)
}

/// Handle an inbound `send_message`: authorize, persist, then fan out.
pub async fn handle_send(
    state: &AppState,
    user_id: &str,
    channel_id: &str,
    content: &str,
    reply_to: Option<String>,
) -> Result<(), FanoutError> {
    if !super::membership::is_channel_member(&state.db, user_id, channel_id).await? {
        return Err(FanoutError::AuthorizationDenied {
            user_id: user_id.to_string(),
            channel_id: channel_id.to_string(),
        });
    }

    let message = create_message(&state.db, user_id, channel_id, content, reply_to).await?;
    tracing::debug!(
        user_id = %user_id,
        channel_id = %channel_id,
        message_id = %message.id,
        "Message committed, fanning out"
    );
    state
        .broadcaster
        .broadcast_to_channel(channel_id, &message.into_event());
    Ok(())
}

/// Called by the data layer after an edit commits.
pub fn broadcast_message_updated(state: &AppState, id: &str, channel_id: &str, content: &str) {
    state.broadcaster.broadcast_to_channel(
        channel_id,
        &ServerEvent::MessageUpdated {
            id: id.to_string(),
            channel_id: channel_id.to_string(),
            content: content.to_string(),
            updated_at: Utc::now().to_rfc3339(),
        },
    );
}

/// Called by the data layer after a delete commits.
pub fn broadcast_message_deleted(state: &AppState, id: &str, channel_id: &str) {
    state.broadcaster.broadcast_to_channel(
        channel_id,
        &ServerEvent::MessageDeleted {
            id: id.to_string(),
            channel_id: channel_id.to_string(),
        },
    );
}
