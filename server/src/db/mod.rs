pub mod migrations;
pub mod models;

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::FanoutError;
use self::models::{Channel, User};

/// Type alias for the shared database connection.
/// rusqlite is synchronous — we wrap in Arc<Mutex> for thread safety
/// with tokio::task::spawn_blocking for DB operations.
pub type DbPool = Arc<Mutex<Connection>>;

/// Initialize the SQLite database: create data directory if needed,
/// open (or create) the database file, enable WAL mode, and run migrations.
pub fn init_db(data_dir: &str) -> Result<DbPool, Box<dyn std::error::Error>> {
    // Ensure data directory exists
    std::fs::create_dir_all(data_dir)?;

    let db_path = Path::new(data_dir).join("relay.db");
    let mut conn = Connection::open(&db_path)?;

    // Enable WAL mode for better concurrent read performance
    conn.pragma_update(None, "journal_mode", "WAL")?;
    // Enable foreign key enforcement
    conn.pragma_update(None, "foreign_keys", "ON")?;

    // Run migrations
    let migrations = migrations::migrations();
    migrations.to_latest(&mut conn)?;

    tracing::info!("Database initialized at {}", db_path.display());

    Ok(Arc::new(Mutex::new(conn)))
}

/// Create a user row. The account-management API proper is owned by the
/// CRUD layer; this helper exists for seeding and tests.
pub async fn create_user(db: &DbPool, username: &str, display_name: &str) -> Result<User, FanoutError> {
    let user = User {
        id: uuid::Uuid::now_v7().to_string(),
        username: username.to_string(),
        display_name: display_name.to_string(),
        created_at: chrono::Utc::now().to_rfc3339(),
    };

    let db = db.clone();
    let row = user.clone();
    tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| FanoutError::DbLock)?;
        conn.execute(
            "INSERT INTO users (id, username, display_name, created_at) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![row.id, row.username, row.display_name, row.created_at],
        )?;
        Ok::<_, FanoutError>(())
    })
    .await??;

    Ok(user)
}

/// Create a channel row. See `create_user`.
pub async fn create_channel(db: &DbPool, name: &str) -> Result<Channel, FanoutError> {
    let channel = Channel {
        id: uuid::Uuid::now_v7().to_string(),
        name: name.to_string(),
        created_at: chrono::Utc::now().to_rfc3339(),
    };

    let db = db.clone();
    let row = channel.clone();
    tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| FanoutError::DbLock)?;
        conn.execute(
            "INSERT INTO channels (id, name, created_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![row.id, row.name, row.created_at],
        )?;
        Ok::<_, FanoutError>(())
    })
    .await??;

    Ok(channel)
}
