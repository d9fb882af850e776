use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    /// `connect()` was called with no auth token configured. Surfaced to
    /// the caller immediately — retrying without a token cannot succeed.
    #[error("no credential available; connect requires an auth token")]
    NoCredential,

    /// The capped reconnect backoff ran out. Terminal: no further attempts
    /// are made until the caller explicitly reconnects.
    #[error("reconnect attempts exhausted after {attempts} retries")]
    ReconnectExhausted { attempts: u32 },

    /// The offline send buffer is at its configured limit; the new send is
    /// rejected rather than silently dropping older queued messages.
    #[error("outbound queue is full ({limit} messages)")]
    QueueFull { limit: usize },

    #[error("transport error: {0}")]
    Transport(String),

    /// The session was closed locally; a fresh `connect()` is required.
    #[error("connection closed")]
    Closed,
}
