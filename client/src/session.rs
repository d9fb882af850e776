//! The client session driver: executes the state machine's effects over a
//! transport, owns the desired-channel set and the offline send queue.

use std::collections::{BTreeSet, VecDeque};

use relay_protocol::{ClientMessage, PresenceStatus, ServerEvent};

use crate::backoff::BackoffPolicy;
use crate::error::ClientError;
use crate::state::{Effect, SessionEvent, SessionMachine, SessionState};
use crate::transport::{Connection, Connector};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket endpoint, e.g. `ws://host:8000/ws`.
    pub url: String,
    /// Bearer credential, appended as `?token=` at connect time. `None`
    /// makes `connect()` fail fast with `NoCredential`.
    pub token: Option<String>,
    pub backoff: BackoffPolicy,
    /// Cap on sends buffered while not Active; overflow rejects the new
    /// send rather than dropping older ones.
    pub queue_limit: usize,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            url: url.into(),
            token,
            backoff: BackoffPolicy::default(),
            queue_limit: 256,
        }
    }
}

pub struct ChatClient<C: Connector> {
    config: ClientConfig,
    connector: C,
    machine: SessionMachine,
    conn: Option<C::Conn>,
    /// Channels this client wants events for. Re-subscribed in full on
    /// every (re)connect: subscriptions are not durable server-side.
    desired: BTreeSet<String>,
    /// Sends issued while not Active, flushed FIFO on reaching Active.
    queue: VecDeque<ClientMessage>,
    /// Events received mid-handshake, surfaced through `next_event`.
    pending: VecDeque<ServerEvent>,
}

impl<C: Connector> ChatClient<C> {
    pub fn new(config: ClientConfig, connector: C) -> Self {
        let machine = SessionMachine::new(config.backoff.clone(), config.token.is_some());
        Self {
            config,
            connector,
            machine,
            conn: None,
            desired: BTreeSet::new(),
            queue: VecDeque::new(),
            pending: VecDeque::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.machine.state()
    }

    /// Connect and complete the handshake (authenticate, subscribe, flush
    /// the offline queue). No-op when already connecting or connected.
    /// Fails fast with `NoCredential` when no token is configured, and with
    /// `ReconnectExhausted` when the capped backoff runs out.
    pub async fn connect(&mut self) -> Result<(), ClientError> {
        self.drive(Some(SessionEvent::ConnectRequested)).await
    }

    /// Explicit local close. Terminal: no reconnection is attempted until
    /// the caller calls `connect()` again.
    pub async fn disconnect(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            conn.close().await;
        }
        self.machine
            .handle(SessionEvent::ConnectionClosed { local: true });
    }

    /// Register interest in channels. Takes effect immediately when Active
    /// and is replayed on every reconnect.
    pub async fn subscribe(&mut self, channel_ids: Vec<String>) -> Result<(), ClientError> {
        for channel in &channel_ids {
            self.desired.insert(channel.clone());
        }
        if self.machine.state() == SessionState::Active {
            self.submit(ClientMessage::Subscribe { channel_ids }).await?;
        }
        Ok(())
    }

    pub async fn unsubscribe(&mut self, channel_ids: Vec<String>) -> Result<(), ClientError> {
        for channel in &channel_ids {
            self.desired.remove(channel);
        }
        if self.machine.state() == SessionState::Active {
            self.submit(ClientMessage::Unsubscribe { channel_ids })
                .await?;
        }
        Ok(())
    }

    pub async fn send_message(
        &mut self,
        channel_id: impl Into<String>,
        content: impl Into<String>,
        reply_to: Option<String>,
    ) -> Result<(), ClientError> {
        self.submit(ClientMessage::SendMessage {
            channel_id: channel_id.into(),
            content: content.into(),
            reply_to,
        })
        .await
    }

    pub async fn set_typing(
        &mut self,
        channel_id: impl Into<String>,
        typing: bool,
    ) -> Result<(), ClientError> {
        self.submit(ClientMessage::Typing {
            channel_id: channel_id.into(),
            typing,
        })
        .await
    }

    pub async fn update_presence(&mut self, status: PresenceStatus) -> Result<(), ClientError> {
        self.submit(ClientMessage::UpdatePresence { status }).await
    }

    /// Next server event. While waiting, lost connections are re-established
    /// transparently (with backoff); the caller only sees an error when the
    /// session is terminally down.
    pub async fn next_event(&mut self) -> Result<ServerEvent, ClientError> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(event);
            }
            match self.machine.state() {
                SessionState::Active => {
                    if self.conn.is_some() {
                        match self.recv_raw().await {
                            Some(event) => return Ok(event),
                            None => self.conn = None,
                        }
                    } else {
                        self.drive(Some(SessionEvent::ConnectionClosed { local: false }))
                            .await?;
                    }
                }
                SessionState::Disconnected => return Err(ClientError::Closed),
                // Mid-handshake (shouldn't normally be observable): finish it.
                _ => self.drive(None).await?,
            }
        }
    }

    /// Buffer or transmit a client message depending on session state.
    /// While not Active, sends are queued FIFO and flushed on activation,
    /// preserving the causal order of user actions issued while offline.
    async fn submit(&mut self, message: ClientMessage) -> Result<(), ClientError> {
        if self.machine.state() == SessionState::Active {
            if let Some(conn) = self.conn.as_mut() {
                match conn.send(&message).await {
                    Ok(()) => return Ok(()),
                    Err(e) => {
                        tracing::warn!(error = %e, "Send failed; buffering for reconnect");
                        self.conn = None;
                    }
                }
            }
        }
        self.buffer(message)
    }

    fn buffer(&mut self, message: ClientMessage) -> Result<(), ClientError> {
        if self.queue.len() >= self.config.queue_limit {
            return Err(ClientError::QueueFull {
                limit: self.config.queue_limit,
            });
        }
        self.queue.push_back(message);
        Ok(())
    }

    fn connect_url(&self) -> Result<String, ClientError> {
        let token = self.config.token.as_deref().ok_or(ClientError::NoCredential)?;
        Ok(format!("{}?token={}", self.config.url, token))
    }

    async fn recv_raw(&mut self) -> Option<ServerEvent> {
        self.conn.as_mut()?.recv().await
    }

    /// Run the state machine until it settles in Active or Disconnected,
    /// executing effects and feeding transport outcomes back in as events.
    async fn drive(&mut self, initial: Option<SessionEvent>) -> Result<(), ClientError> {
        let mut events: VecDeque<SessionEvent> = initial.into_iter().collect();

        loop {
            let event = match events.pop_front() {
                Some(event) => event,
                // No queued event: either we are done, or the handshake is
                // waiting on a server ack.
                None => match self.machine.state() {
                    SessionState::Active | SessionState::Disconnected => return Ok(()),
                    SessionState::Authenticating | SessionState::Subscribing => {
                        match self.recv_raw().await {
                            Some(ServerEvent::Connected { user_id, .. })
                                if self.machine.state() == SessionState::Authenticating =>
                            {
                                tracing::debug!(user_id = %user_id, "Authenticated");
                                SessionEvent::AuthAcked
                            }
                            Some(ServerEvent::Subscribed { channel_ids })
                                if self.machine.state() == SessionState::Subscribing =>
                            {
                                tracing::debug!(
                                    accepted = channel_ids.len(),
                                    "Subscriptions acknowledged"
                                );
                                SessionEvent::SubscribeAcked
                            }
                            Some(other) => {
                                self.pending.push_back(other);
                                continue;
                            }
                            None => {
                                self.conn = None;
                                SessionEvent::ConnectionClosed { local: false }
                            }
                        }
                    }
                    // Connecting/Reconnecting always leave a queued event.
                    _ => return Ok(()),
                },
            };

            for effect in self.machine.handle(event) {
                match effect {
                    Effect::OpenTransport => {
                        let url = self.connect_url()?;
                        match self.connector.connect(&url).await {
                            Ok(conn) => {
                                self.conn = Some(conn);
                                events.push_back(SessionEvent::TransportOpened);
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "Connect attempt failed");
                                events.push_back(SessionEvent::ConnectionClosed { local: false });
                            }
                        }
                    }
                    Effect::SendSubscriptions => {
                        let message = ClientMessage::Subscribe {
                            channel_ids: self.desired.iter().cloned().collect(),
                        };
                        if let Some(conn) = self.conn.as_mut() {
                            if let Err(e) = conn.send(&message).await {
                                tracing::warn!(error = %e, "Failed to send subscriptions");
                                self.conn = None;
                                events.push_back(SessionEvent::ConnectionClosed { local: false });
                            }
                        }
                    }
                    Effect::FlushQueue => {
                        while let Some(message) = self.queue.pop_front() {
                            let sent = match self.conn.as_mut() {
                                Some(conn) => conn.send(&message).await,
                                None => Err(ClientError::Closed),
                            };
                            if let Err(e) = sent {
                                tracing::warn!(error = %e, "Flush interrupted; re-buffering");
                                self.queue.push_front(message);
                                self.conn = None;
                                events.push_back(SessionEvent::ConnectionClosed { local: false });
                                break;
                            }
                        }
                    }
                    Effect::ScheduleReconnect { delay } => {
                        tracing::info!(delay_ms = delay.as_millis() as u64, "Reconnecting");
                        tokio::time::sleep(delay).await;
                        events.push_back(SessionEvent::BackoffElapsed);
                    }
                    Effect::Fail(error) => return Err(error),
                }
            }
        }
    }
}
