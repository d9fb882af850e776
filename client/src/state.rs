//! Client session state machine.
//!
//! One pure transition function owns the whole connect/authenticate/
//! subscribe/reconnect contract:
//!
//! ```text
//! Disconnected → Connecting → Authenticating → Subscribing → Active
//!                    ↑                                         │
//!                    └──────────── Reconnecting ←──────────────┘
//!                                (abnormal close)
//! ```
//!
//! A normal/local close from `Active` is terminal; any other closure
//! schedules a retry under the backoff policy until the attempt cap is
//! reached, at which point `ReconnectExhausted` is surfaced and no further
//! attempts are made. The machine performs no I/O — it only emits
//! [`Effect`]s for the driver to execute — so every transition is testable
//! without a real network.

use std::time::Duration;

use crate::backoff::BackoffPolicy;
use crate::error::ClientError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Authenticating,
    Subscribing,
    Active,
    Reconnecting,
}

/// Inputs to the transition function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Caller asked to connect. No-op while a connection attempt or live
    /// session is already in flight (prevents duplicate sockets).
    ConnectRequested,
    /// The transport-level connection is up; awaiting the server's auth ack.
    TransportOpened,
    /// The server acknowledged authentication (`connected` event).
    AuthAcked,
    /// The server acknowledged the subscription batch.
    SubscribeAcked,
    /// The connection went away. `local` marks an explicit user-initiated
    /// close, which is terminal; anything else triggers reconnection.
    ConnectionClosed { local: bool },
    /// The scheduled backoff delay elapsed.
    BackoffElapsed,
}

/// Outputs of the transition function, executed by the driver.
#[derive(Debug)]
pub enum Effect {
    OpenTransport,
    /// Re-issue `subscribe` for the full desired channel set — the client,
    /// not the server, is the source of truth for what it listens to.
    SendSubscriptions,
    /// The session is active: flush the offline queue in submission order
    /// before accepting new sends.
    FlushQueue,
    ScheduleReconnect { delay: Duration },
    /// Terminal failure, surfaced to the caller.
    Fail(ClientError),
}

pub struct SessionMachine {
    state: SessionState,
    backoff: BackoffPolicy,
    /// Consecutive failed attempts since the last healthy session.
    attempts: u32,
    has_credential: bool,
}

impl SessionMachine {
    pub fn new(backoff: BackoffPolicy, has_credential: bool) -> Self {
        Self {
            state: SessionState::Disconnected,
            backoff,
            attempts: 0,
            has_credential,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The single transition function.
    pub fn handle(&mut self, event: SessionEvent) -> Vec<Effect> {
        use SessionEvent::*;
        use SessionState::*;

        match (self.state, event) {
            (Disconnected, ConnectRequested) => {
                if !self.has_credential {
                    return vec![Effect::Fail(ClientError::NoCredential)];
                }
                self.attempts = 0;
                self.state = Connecting;
                vec![Effect::OpenTransport]
            }
            // Already connecting or connected — never open a second socket.
            (_, ConnectRequested) => vec![],

            (Connecting, TransportOpened) => {
                self.state = Authenticating;
                vec![]
            }
            (Authenticating, AuthAcked) => {
                self.state = Subscribing;
                vec![Effect::SendSubscriptions]
            }
            (Subscribing, SubscribeAcked) => {
                self.state = Active;
                self.attempts = 0;
                vec![Effect::FlushQueue]
            }

            (Disconnected, ConnectionClosed { .. }) => vec![],
            // No transport is open while waiting out the backoff; a stray
            // close report must not double-count an attempt.
            (Reconnecting, ConnectionClosed { .. }) => vec![],
            (_, ConnectionClosed { local: true }) => {
                self.state = Disconnected;
                vec![]
            }
            (_, ConnectionClosed { local: false }) => self.schedule_retry(),

            (Reconnecting, BackoffElapsed) => {
                self.state = Connecting;
                vec![Effect::OpenTransport]
            }

            // Stale event for this state (e.g. an ack arriving after a
            // close was already processed).
            _ => vec![],
        }
    }

    fn schedule_retry(&mut self) -> Vec<Effect> {
        match self.backoff.delay(self.attempts) {
            Some(delay) => {
                self.attempts += 1;
                self.state = SessionState::Reconnecting;
                vec![Effect::ScheduleReconnect { delay }]
            }
            None => {
                self.state = SessionState::Disconnected;
                vec![Effect::Fail(ClientError::ReconnectExhausted {
                    attempts: self.attempts,
                })]
            }
        }
    }
}
