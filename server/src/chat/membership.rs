//! Channel membership: the authorization collaborator for subscribes, and
//! the membership-change notifier that stops delivery when a user is
//! removed from a channel.

use crate::db::DbPool;
use crate::error::FanoutError;
use crate::state::AppState;

/// Whether a user may read a channel. Consulted on every subscribe — the
/// result is never cached, so a revocation takes effect on the next batch.
pub async fn is_channel_member(
    db: &DbPool,
    user_id: &str,
    channel_id: &str,
) -> Result<bool, FanoutError> {
    let db = db.clone();
    let user_id = user_id.to_string();
    let channel_id = channel_id.to_string();

    tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| FanoutError::DbLock)?;
        let member: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM channel_members WHERE channel_id = ?1 AND user_id = ?2)",
            rusqlite::params![channel_id, user_id],
            |row| row.get(0),
        )?;
        Ok::<_, FanoutError>(member)
    })
    .await?
}

/// Add a user to a channel. Idempotent.
pub async fn add_member(db: &DbPool, user_id: &str, channel_id: &str) -> Result<(), FanoutError> {
    let db = db.clone();
    let user_id = user_id.to_string();
    let channel_id = channel_id.to_string();

    tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| FanoutError::DbLock)?;
        conn.execute(
            "INSERT OR IGNORE INTO channel_members (channel_id, user_id, joined_at)
             VALUES (?1, ?2, ?3)",
            rusqlite::params![channel_id, user_id, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok::<_, FanoutError>(())
    })
    .await?
}

/// Membership-change notifier: remove a user from a channel and immediately
/// drop their live subscription so no further events are delivered.
pub async fn remove_member(
    state: &AppState,
    user_id: &str,
    channel_id: &str,
) -> Result<(), FanoutError> {
    let db = state.db.clone();
    {
        let user_id = user_id.to_string();
        let channel_id = channel_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = db.lock().map_err(|_| FanoutError::DbLock)?;
            conn.execute(
                "DELETE FROM channel_members WHERE channel_id = ?1 AND user_id = ?2",
                rusqlite::params![channel_id, user_id],
            )?;
            Ok::<_, FanoutError>(())
        })
        .await??;
    }

    state.subscriptions.unsubscribe(user_id, channel_id);
    tracing::info!(
        user_id = %user_id,
        channel_id = %channel_id,
        "Membership revoked, subscription dropped"
    );
    Ok(())
}
