use serde::Serialize;

/// A registered account. Account CRUD lives in the data-access layer; the
/// fanout subsystem only needs the id.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub display_name: String,
    pub created_at: String,
}

/// A named topic users subscribe to for event delivery.
#[derive(Debug, Clone, Serialize)]
pub struct Channel {
    pub id: String,
    pub name: String,
    pub created_at: String,
}
