//! Relay chat client.
//!
//! The connect/authenticate/subscribe/reconnect protocol is an explicit
//! finite state machine ([`state::SessionMachine`]) with a single transition
//! function, so the retry/backoff/give-up contract is testable without a
//! network. [`session::ChatClient`] drives that machine over a pluggable
//! [`transport::Connector`]; the production transport speaks WebSocket via
//! tokio-tungstenite.

pub mod backoff;
pub mod error;
pub mod session;
pub mod state;
pub mod transport;

pub use backoff::BackoffPolicy;
pub use error::ClientError;
pub use session::{ChatClient, ClientConfig};
pub use state::SessionState;
pub use transport::WsConnector;
