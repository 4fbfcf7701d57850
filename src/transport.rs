//! Duplex connection to the package service.
//!
//! The realtime client only talks to the [`Transport`] trait, and learns
//! about the connection through a stream of [`TransportEvent`]s. The
//! production implementation is [`WsConnection`], a WebSocket manager that
//! queues data messages while offline and reconnects with linear backoff.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::connect_async;

use crate::config;
use crate::protocol::{InboundMessage, OutboundMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    StateChanged(ConnectionState),
    Message(InboundMessage),
}

/// Outbound half of a realtime connection.
///
/// `send` never blocks and never fails loudly: realtime sync is best-effort,
/// and delivery problems surface as connection state changes instead.
pub trait Transport: Send + Sync {
    fn send(&self, message: OutboundMessage);
    fn state(&self) -> ConnectionState;
}

// ---------------------------------------------------------------------------
// ReconnectPolicy
// ---------------------------------------------------------------------------

/// Bounded, linearly increasing retry schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: config::MAX_RECONNECT_ATTEMPTS,
            base_delay: config::RECONNECT_BASE_DELAY,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (1-based), or `None` once the cap
    /// has been reached.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        Some(self.base_delay * attempt)
    }
}

// ---------------------------------------------------------------------------
// WsConnection
// ---------------------------------------------------------------------------

enum Command {
    Send(OutboundMessage),
    Close,
    Reconnect,
}

enum SessionEnd {
    Clean,
    Unclean,
    Shutdown,
}

/// WebSocket connection manager.
///
/// Owns a background task that connects, forwards outbound messages, parses
/// inbound frames and reconnects after unclean closes. A clean close, from
/// either side, stops reconnection until [`reconnect`](Self::reconnect).
///
/// Room membership messages are not queued while offline: membership belongs
/// to a session, and the client rejoins when it sees
/// [`ConnectionState::Connected`]. Data messages for a room are held until the
/// current session has joined that room, then sent in order; held messages
/// for any other room are dropped at that point.
pub struct WsConnection {
    commands: mpsc::UnboundedSender<Command>,
    state: Arc<Mutex<ConnectionState>>,
}

impl WsConnection {
    /// Start connecting to `url` on the current Tokio runtime.
    ///
    /// Returns the connection handle and the event stream the realtime
    /// client consumes.
    pub fn open(
        url: &str,
        policy: ReconnectPolicy,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<TransportEvent>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(ConnectionState::Disconnected));

        let driver = Driver {
            url: url.to_string(),
            policy,
            commands: command_rx,
            events: event_tx,
            state: Arc::clone(&state),
            queue: VecDeque::new(),
        };
        tokio::spawn(driver.run());

        (
            Arc::new(Self {
                commands: command_tx,
                state,
            }),
            event_rx,
        )
    }

    /// Close the connection cleanly. No automatic reconnection follows.
    pub fn close(&self) {
        let _ = self.commands.send(Command::Close);
    }

    /// Connect again after a clean close or exhausted retries.
    pub fn reconnect(&self) {
        let _ = self.commands.send(Command::Reconnect);
    }
}

impl Transport for WsConnection {
    fn send(&self, message: OutboundMessage) {
        if self.commands.send(Command::Send(message)).is_err() {
            log::warn!("Realtime connection task has stopped; dropping message");
        }
    }

    fn state(&self) -> ConnectionState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(ConnectionState::Disconnected)
    }
}

struct Driver {
    url: String,
    policy: ReconnectPolicy,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<TransportEvent>,
    state: Arc<Mutex<ConnectionState>>,
    queue: VecDeque<OutboundMessage>,
}

impl Driver {
    async fn run(mut self) {
        let mut attempt: u32 = 0;
        loop {
            self.set_state(ConnectionState::Connecting);
            log::info!("Connecting to {}", self.url);

            let end = match connect_async(self.url.as_str()).await {
                Ok((stream, _)) => {
                    attempt = 0;
                    self.set_state(ConnectionState::Connected);
                    log::info!("Realtime connection established");
                    self.session(stream).await
                }
                Err(e) => {
                    log::warn!("Realtime connection failed: {e}");
                    SessionEnd::Unclean
                }
            };
            self.set_state(ConnectionState::Disconnected);

            let keep_going = match end {
                SessionEnd::Shutdown => return,
                SessionEnd::Clean => {
                    log::info!("Realtime connection closed");
                    self.idle().await
                }
                SessionEnd::Unclean => {
                    attempt += 1;
                    match self.policy.delay_for(attempt) {
                        Some(delay) => {
                            log::info!(
                                "Reconnecting in {}ms (attempt {attempt}/{})",
                                delay.as_millis(),
                                self.policy.max_attempts
                            );
                            self.backoff(delay).await
                        }
                        None => {
                            log::warn!(
                                "Giving up after {} reconnect attempts",
                                self.policy.max_attempts
                            );
                            self.idle().await
                        }
                    }
                }
            };
            if !keep_going {
                return;
            }
            if attempt > self.policy.max_attempts {
                attempt = 0;
            }
        }
    }

    async fn session<S>(&mut self, stream: S) -> SessionEnd
    where
        S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
            + futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
            + Unpin,
    {
        let (mut write, mut read) = stream.split();
        let mut joined: Option<String> = None;

        loop {
            tokio::select! {
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => match InboundMessage::parse(text.as_str()) {
                        Ok(message) => self.emit(TransportEvent::Message(message)),
                        Err(e) => log::debug!("Dropping unrecognised frame: {e}"),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        let clean = frame.as_ref().map_or(true, |f| f.code == CloseCode::Normal);
                        return if clean { SessionEnd::Clean } else { SessionEnd::Unclean };
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        log::warn!("Realtime read error: {e}");
                        return SessionEnd::Unclean;
                    }
                    None => return SessionEnd::Unclean,
                },
                command = self.commands.recv() => match command {
                    Some(Command::Send(message)) => {
                        let room_ready = match &message {
                            OutboundMessage::JoinPackage { .. }
                            | OutboundMessage::LeavePackage { .. } => true,
                            data => joined.as_deref() == Some(data.package_id()),
                        };
                        if !room_ready {
                            self.queue.push_back(message);
                            continue;
                        }
                        if let Err(end) = send_frame(&mut write, &message).await {
                            self.enqueue(message);
                            return end;
                        }
                        match message {
                            OutboundMessage::JoinPackage { package_id } => {
                                if let Err(end) = self.flush_room(&mut write, &package_id).await {
                                    return end;
                                }
                                joined = Some(package_id);
                            }
                            OutboundMessage::LeavePackage { .. } => joined = None,
                            _ => {}
                        }
                    }
                    Some(Command::Close) => {
                        let _ = write.send(Message::Close(None)).await;
                        return SessionEnd::Clean;
                    }
                    Some(Command::Reconnect) => {}
                    None => {
                        let _ = write.send(Message::Close(None)).await;
                        return SessionEnd::Shutdown;
                    }
                },
            }
        }
    }

    /// Send the held messages for `package_id` right after joining it.
    async fn flush_room<W>(&mut self, write: &mut W, package_id: &str) -> Result<(), SessionEnd>
    where
        W: futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
    {
        let mut held = std::mem::take(&mut self.queue).into_iter();
        while let Some(message) = held.next() {
            if message.package_id() != package_id {
                log::debug!(
                    "Dropping held message for package {} after joining {package_id}",
                    message.package_id()
                );
                continue;
            }
            if let Err(end) = send_frame(write, &message).await {
                self.queue.push_back(message);
                self.queue.extend(held);
                return Err(end);
            }
        }
        Ok(())
    }

    /// Wait for an explicit reconnect, queueing messages meanwhile.
    /// Returns `false` when every handle has been dropped.
    async fn idle(&mut self) -> bool {
        loop {
            match self.commands.recv().await {
                Some(Command::Send(message)) => self.enqueue(message),
                Some(Command::Reconnect) => return true,
                Some(Command::Close) => {}
                None => return false,
            }
        }
    }

    /// Sleep before the next retry. A `close()` during the wait cancels the
    /// retry, a `reconnect()` cuts it short.
    async fn backoff(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                command = self.commands.recv() => match command {
                    Some(Command::Send(message)) => self.enqueue(message),
                    Some(Command::Reconnect) => return true,
                    Some(Command::Close) => return self.idle().await,
                    None => return false,
                },
            }
        }
    }

    fn enqueue(&mut self, message: OutboundMessage) {
        match message {
            OutboundMessage::JoinPackage { .. } | OutboundMessage::LeavePackage { .. } => {
                log::debug!("Not queueing room membership message while offline");
            }
            other => self.queue.push_back(other),
        }
    }

    fn set_state(&self, state: ConnectionState) {
        if let Ok(mut current) = self.state.lock() {
            if *current == state {
                return;
            }
            *current = state;
        }
        self.emit(TransportEvent::StateChanged(state));
    }

    fn emit(&self, event: TransportEvent) {
        // Nobody listening is not an error; the client may have shut down.
        let _ = self.events.send(event);
    }
}

async fn send_frame<W>(write: &mut W, message: &OutboundMessage) -> Result<(), SessionEnd>
where
    W: futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let json = match message.to_json() {
        Ok(json) => json,
        Err(e) => {
            log::warn!("Could not encode outbound message: {e}");
            return Ok(());
        }
    };
    write.send(Message::Text(json.into())).await.map_err(|e| {
        log::warn!("Realtime write error: {e}");
        SessionEnd::Unclean
    })
}
