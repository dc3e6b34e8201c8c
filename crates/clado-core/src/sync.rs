//! Wire protocol and WebSocket client for collaboration.
//!
//! Messages are JSON objects tagged by `type`:
//!
//! ```json
//! { "type": "join", "board_id": "…", "token": "…", "peer_id": 42 }
//! { "type": "delta", "delta": { "origin": 42, "ops": [ … ] } }
//! { "type": "presence", "update": { "cursor": { "state": "at", "x": 1.0, "y": 2.0 } } }
//! ```

use crate::crdt::{Delta, MergeReport, PeerId};
use crate::directory::BoardId;
use crate::presence::{PresenceRecord, PresenceUpdate};
use serde::{Deserialize, Serialize};

/// Messages sent to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Open a session on a board.
    Join {
        board_id: BoardId,
        token: String,
        peer_id: PeerId,
    },
    /// Leave the current board.
    Leave,
    /// Local changes to merge and relay.
    Delta { delta: Delta },
    /// Partial update of the sender's presence.
    Presence { update: PresenceUpdate },
    /// Persist the board now.
    Save,
}

/// Messages received from the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Session granted.
    Joined {
        board_id: BoardId,
        /// The joiner's own presence record, as the server issued it.
        presence: PresenceRecord,
        /// Full state of the board replica.
        snapshot: Delta,
        /// Presence of everyone already connected.
        peers: Vec<PresenceRecord>,
    },
    /// Session refused. The server closes the connection afterwards.
    Denied { reason: String },
    PeerJoined { presence: PresenceRecord },
    PeerLeft { peer_id: PeerId },
    /// Changes made by another peer.
    Delta { delta: Delta },
    /// Full presence record of another peer.
    Presence { presence: PresenceRecord },
    /// The board was persisted.
    Saved { board_id: BoardId },
    Error { message: String },
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Events produced by the collaboration manager as it processes server
/// messages and transport changes.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Session established and replica seeded.
    JoinedBoard { board_id: BoardId, peer_count: usize },
    /// Session refused; the board context has been torn down.
    Denied { reason: String },
    PeerJoined { peer_id: PeerId },
    PeerLeft { peer_id: PeerId },
    /// A remote delta was merged.
    DeltaMerged { origin: PeerId, report: MergeReport },
    PresenceChanged { peer_id: PeerId },
    Saved { board_id: BoardId },
    /// Transport dropped. Local edits keep queueing and are replayed once the
    /// socket reconnects and the board is joined again.
    ConnectionLost,
    Error { message: String },
}

/// Raw events from the WebSocket transport.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent {
    Connected,
    Disconnected,
    Message(ServerMessage),
    Error { message: String },
}

mod native_client {
    use super::*;
    use std::sync::mpsc::{Receiver, Sender, TryRecvError, channel};
    use std::thread::{self, JoinHandle};
    use std::time::{Duration, Instant};
    use tungstenite::{Message, connect};
    use url::Url;

    /// Delay before the first reconnect attempt.
    pub const RECONNECT_BASE_DELAY: Duration = Duration::from_millis(500);

    /// Upper bound on the delay between reconnect attempts.
    pub const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

    /// When to retry after the connection drops without being asked to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ReconnectPolicy {
        pub base_delay: Duration,
        pub max_delay: Duration,
        /// Attempts before giving up. `None` retries forever.
        pub max_attempts: Option<u32>,
    }

    impl Default for ReconnectPolicy {
        fn default() -> Self {
            Self {
                base_delay: RECONNECT_BASE_DELAY,
                max_delay: MAX_RECONNECT_DELAY,
                max_attempts: None,
            }
        }
    }

    impl ReconnectPolicy {
        /// Never reconnect.
        pub fn never() -> Self {
            Self {
                max_attempts: Some(0),
                ..Self::default()
            }
        }

        /// Exponential backoff delay before attempt number `attempt` (from 0).
        pub fn delay(&self, attempt: u32) -> Duration {
            self.base_delay
                .saturating_mul(1 << attempt.min(6))
                .min(self.max_delay)
        }
    }

    /// Commands sent to the WebSocket thread.
    enum WsCommand {
        Send(String),
        Close,
    }

    /// WebSocket client for native platforms.
    ///
    /// Uses a background thread for non-blocking operation. A connection that
    /// drops on its own is re-established from [`NativeWebSocket::poll_events`]
    /// following the [`ReconnectPolicy`].
    pub struct NativeWebSocket {
        state: ConnectionState,
        events: Vec<SocketEvent>,
        /// Channel to send commands to the WebSocket thread.
        cmd_tx: Option<Sender<WsCommand>>,
        /// Channel to receive events from the WebSocket thread.
        event_rx: Option<Receiver<SocketEvent>>,
        /// Handle to the WebSocket thread.
        _thread: Option<JoinHandle<()>>,
        /// Server to return to after a drop. Cleared by `disconnect`.
        url: Option<String>,
        policy: ReconnectPolicy,
        /// Reconnect attempts since the last successful connect.
        attempts: u32,
        retry_at: Option<Instant>,
    }

    impl NativeWebSocket {
        /// Create a new disconnected WebSocket client.
        pub fn new() -> Self {
            Self {
                state: ConnectionState::Disconnected,
                events: Vec::new(),
                cmd_tx: None,
                event_rx: None,
                _thread: None,
                url: None,
                policy: ReconnectPolicy::default(),
                attempts: 0,
                retry_at: None,
            }
        }

        pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
            self.policy = policy;
            self
        }

        /// Connect to a WebSocket server.
        pub fn connect(&mut self, url: &str) -> Result<(), String> {
            if self.cmd_tx.is_some() {
                return Err("Already connected".to_string());
            }

            let parsed_url = Url::parse(url).map_err(|e| format!("Invalid URL: {}", e))?;
            if parsed_url.scheme() != "ws" && parsed_url.scheme() != "wss" {
                return Err(format!("Invalid WebSocket URL scheme: {}", parsed_url.scheme()));
            }

            self.url = Some(url.to_string());
            self.attempts = 0;
            self.retry_at = None;
            self.spawn(url.to_string());
            Ok(())
        }

        fn spawn(&mut self, url: String) {
            self.state = ConnectionState::Connecting;

            let (cmd_tx, cmd_rx) = channel::<WsCommand>();
            let (event_tx, event_rx) = channel::<SocketEvent>();

            let handle = thread::spawn(move || run_socket(&url, cmd_rx, event_tx));

            self.cmd_tx = Some(cmd_tx);
            self.event_rx = Some(event_rx);
            self._thread = Some(handle);
        }

        /// Disconnect from the server. No reconnect follows.
        pub fn disconnect(&mut self) {
            if let Some(tx) = self.cmd_tx.take() {
                let _ = tx.send(WsCommand::Close);
            }
            self.event_rx = None;
            self._thread = None;
            self.url = None;
            self.retry_at = None;
            self.state = ConnectionState::Disconnected;
        }

        /// Send a text message.
        pub fn send(&self, msg: &str) -> Result<(), String> {
            if let Some(ref tx) = self.cmd_tx {
                tx.send(WsCommand::Send(msg.to_string()))
                    .map_err(|e| format!("Send failed: {}", e))
            } else {
                Err("Not connected".to_string())
            }
        }

        /// Poll for pending events (non-blocking). Starts a due reconnect.
        pub fn poll_events(&mut self) -> Vec<SocketEvent> {
            if self.retry_at.is_some_and(|at| Instant::now() >= at) {
                self.retry_at = None;
                if let Some(url) = self.url.clone() {
                    log::info!("Reconnecting to {} (attempt {})", url, self.attempts);
                    self.spawn(url);
                }
            }

            let mut closed = false;
            if let Some(ref rx) = self.event_rx {
                while let Ok(event) = rx.try_recv() {
                    match &event {
                        SocketEvent::Connected => {
                            self.state = ConnectionState::Connected;
                            self.attempts = 0;
                        }
                        SocketEvent::Disconnected => {
                            self.state = ConnectionState::Disconnected;
                            closed = true;
                        }
                        SocketEvent::Error { .. } => {
                            self.state = ConnectionState::Error;
                            closed = true;
                        }
                        SocketEvent::Message(_) => {}
                    }
                    self.events.push(event);
                }
            }
            if closed {
                // The thread has exited; allow a fresh `connect`.
                self.cmd_tx = None;
                self.event_rx = None;
                self._thread = None;
                self.schedule_reconnect();
            }

            std::mem::take(&mut self.events)
        }

        fn schedule_reconnect(&mut self) {
            let Some(url) = &self.url else {
                return;
            };
            if self.policy.max_attempts.is_some_and(|max| self.attempts >= max) {
                log::warn!("Giving up on {} after {} reconnect attempts", url, self.attempts);
                self.url = None;
                return;
            }
            let delay = self.policy.delay(self.attempts);
            self.attempts += 1;
            self.retry_at = Some(Instant::now() + delay);
            log::info!("Connection to {} lost, retrying in {:?}", url, delay);
        }

        /// Whether a reconnect is scheduled.
        pub fn is_reconnecting(&self) -> bool {
            self.retry_at.is_some()
        }

        /// Get current connection state.
        pub fn state(&self) -> ConnectionState {
            self.state
        }

        /// Check if connected.
        pub fn is_connected(&self) -> bool {
            self.state == ConnectionState::Connected
        }
    }

    impl Default for NativeWebSocket {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Drop for NativeWebSocket {
        fn drop(&mut self) {
            self.disconnect();
        }
    }

    /// Body of the WebSocket thread.
    fn run_socket(url: &str, cmd_rx: Receiver<WsCommand>, event_tx: Sender<SocketEvent>) {
        log::info!("WebSocket thread: connecting to {}", url);

        let (mut socket, response) = match connect(url) {
            Ok(connected) => connected,
            Err(e) => {
                log::error!("WebSocket connection failed: {}", e);
                let _ = event_tx.send(SocketEvent::Error {
                    message: format!("Connection failed: {}", e),
                });
                return;
            }
        };

        log::info!("WebSocket connected, status: {}", response.status());
        let _ = event_tx.send(SocketEvent::Connected);

        // Short read timeout keeps the loop responsive to outgoing commands.
        if let tungstenite::stream::MaybeTlsStream::Plain(tcp) = socket.get_mut() {
            let _ = tcp.set_read_timeout(Some(Duration::from_millis(50)));
            let _ = tcp.set_write_timeout(Some(Duration::from_secs(5)));
        } else {
            log::debug!("TLS or other stream - using default timeout handling");
        }

        loop {
            match cmd_rx.try_recv() {
                Ok(WsCommand::Send(msg)) => {
                    log::debug!("WebSocket sending {} bytes", msg.len());
                    if let Err(e) = socket.send(Message::Text(msg.into())) {
                        log::error!("WebSocket send error: {}", e);
                        break;
                    }
                }
                Ok(WsCommand::Close) => {
                    log::info!("WebSocket close requested");
                    let _ = socket.close(None);
                    break;
                }
                Err(TryRecvError::Disconnected) => {
                    log::info!("WebSocket command channel disconnected");
                    break;
                }
                Err(TryRecvError::Empty) => {}
            }

            match socket.read() {
                Ok(Message::Text(txt)) => match serde_json::from_str::<ServerMessage>(&txt) {
                    Ok(msg) => {
                        let _ = event_tx.send(SocketEvent::Message(msg));
                    }
                    Err(e) => log::warn!("Failed to parse server message: {}", e),
                },
                Ok(Message::Ping(data)) => {
                    let _ = socket.send(Message::Pong(data));
                }
                Ok(Message::Close(_)) => {
                    log::info!("WebSocket received close frame");
                    break;
                }
                Ok(_) => {}
                Err(tungstenite::Error::Io(ref e))
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => {
                    log::error!("WebSocket read error: {}", e);
                    break;
                }
            }
        }

        log::info!("WebSocket thread exiting");
        let _ = event_tx.send(SocketEvent::Disconnected);
    }
}

pub use native_client::{MAX_RECONNECT_DELAY, NativeWebSocket, RECONNECT_BASE_DELAY, ReconnectPolicy};
