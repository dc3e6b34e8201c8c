//! Collaboration management for real-time multi-user editing.
//!
//! [`CollaborationManager`] is the mutation channel of a client: every edit
//! goes through [`CollaborationManager::mutate`], is applied to the local
//! replica immediately and queued for the relay. Incoming server messages are
//! fed back through [`CollaborationManager::handle_message`].

use crate::crdt::{DocumentStore, PeerId, random_peer_id};
use crate::directory::BoardId;
use crate::history::{History, HistoryEntry};
use crate::layer::{Edge, Layer, LayerId};
use crate::mutation::{Mutation, MutationError, plan};
use crate::presence::{PresenceMap, PresenceRecord, PresenceUpdate};
use crate::sync::{
    ClientMessage, ConnectionState, NativeWebSocket, ServerMessage, SocketEvent, SyncEvent,
};

/// Board the client is working on.
#[derive(Debug, Clone)]
struct BoardContext {
    board_id: BoardId,
    token: String,
    /// Whether the server has granted the session.
    joined: bool,
}

/// Manages the local replica, its history and presence, and the message
/// queue to the relay server.
pub struct CollaborationManager {
    store: DocumentStore,
    history: History,
    presence: PresenceMap,
    /// Presence changes not yet applied to a granted record.
    presence_draft: PresenceUpdate,
    context: Option<BoardContext>,
    connection: ConnectionState,
    /// Pending outgoing messages (JSON strings).
    outgoing: Vec<String>,
}

impl CollaborationManager {
    /// Create a new collaboration manager with a random peer id.
    pub fn new() -> Self {
        Self::with_peer(random_peer_id())
    }

    pub fn with_peer(peer: PeerId) -> Self {
        Self {
            store: DocumentStore::with_peer(peer),
            history: History::new(),
            presence: PresenceMap::new(),
            presence_draft: PresenceUpdate::default(),
            context: None,
            connection: ConnectionState::Disconnected,
            outgoing: Vec::new(),
        }
    }

    pub fn peer_id(&self) -> PeerId {
        self.store.peer_id()
    }

    /// Read access to the local replica.
    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    /// Live layers in paint order.
    pub fn layers(&self) -> Vec<(LayerId, Layer)> {
        self.store.list()
    }

    pub fn edges(&self) -> Vec<Edge> {
        self.store.edges()
    }

    pub fn board_id(&self) -> Option<BoardId> {
        self.context.as_ref().map(|c| c.board_id)
    }

    /// Whether the server has granted a session on the current board.
    pub fn is_joined(&self) -> bool {
        self.context.as_ref().is_some_and(|c| c.joined)
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection
    }

    // --- Mutation channel ---

    /// Apply a mutation locally, queue it for broadcast and record it for undo.
    ///
    /// Mutations of missing layers are accepted and change nothing.
    pub fn mutate(&mut self, mutation: Mutation) -> Result<(), MutationError> {
        self.require_context()?;

        if let Mutation::Select { ids } = mutation {
            return self.update_presence(PresenceUpdate::selection(ids));
        }

        let plan = plan(&self.store, &mutation);
        if plan.is_empty() {
            return Ok(());
        }
        self.store.apply_local(plan.changes.clone());
        self.history.record(HistoryEntry::new(plan.changes, plan.inverse));
        Ok(())
    }

    /// Revert the newest local mutation. Returns false when there is nothing
    /// to undo.
    pub fn undo(&mut self) -> Result<bool, MutationError> {
        self.require_context()?;
        match self.history.undo() {
            Some(changes) => {
                self.store.apply_local(changes);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Re-apply the newest undone mutation. Returns false when there is
    /// nothing to redo.
    pub fn redo(&mut self) -> Result<bool, MutationError> {
        self.require_context()?;
        match self.history.redo() {
            Some(changes) => {
                self.store.apply_local(changes);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn can_undo(&self) -> bool {
        self.context.is_some() && self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.context.is_some() && self.history.can_redo()
    }

    /// Fold the following mutations into one undo step (a drag, say).
    pub fn begin_gesture(&mut self) {
        self.history.begin_group();
    }

    pub fn end_gesture(&mut self) {
        self.history.end_group();
    }

    fn require_context(&self) -> Result<(), MutationError> {
        if self.context.is_some() {
            Ok(())
        } else {
            Err(MutationError::Context)
        }
    }

    // --- Presence ---

    /// Merge `update` into the local presence and queue a broadcast.
    pub fn update_presence(&mut self, update: PresenceUpdate) -> Result<(), MutationError> {
        self.require_context()?;
        if update.is_empty() {
            return Ok(());
        }
        if self.presence.update_local(&update).is_some() && self.is_joined() {
            self.queue(&ClientMessage::Presence { update });
        } else {
            self.presence_draft.merge(&update);
        }
        Ok(())
    }

    /// Presence of every other connected peer.
    pub fn others_presence(&self) -> Vec<PresenceRecord> {
        self.presence.others()
    }

    /// The local presence record, once the server has issued it.
    pub fn local_presence(&self) -> Option<&PresenceRecord> {
        self.presence.local()
    }

    /// Current local selection.
    pub fn selection(&self) -> Vec<LayerId> {
        match (&self.presence_draft.selection, self.presence.local()) {
            (Some(draft), _) => draft.clone(),
            (None, Some(local)) => local.selection.clone(),
            (None, None) => Vec::new(),
        }
    }

    // --- Room management ---

    /// Open a board. Any previous board is left and the replica starts empty.
    pub fn enter_room(&mut self, board_id: BoardId, token: impl Into<String>) {
        if self.context.is_some() {
            self.leave_room();
        }
        self.context = Some(BoardContext {
            board_id,
            token: token.into(),
            joined: false,
        });
        if self.connection == ConnectionState::Connected {
            self.queue_join();
        }
    }

    /// Leave the current board and drop its local state.
    pub fn leave_room(&mut self) {
        if self.is_joined() {
            self.queue(&ClientMessage::Leave);
        }
        self.context = None;
        self.reset_board();
    }

    /// Ask the server to persist the board now.
    pub fn request_save(&mut self) {
        if self.is_joined() {
            self.queue(&ClientMessage::Save);
        }
    }

    fn reset_board(&mut self) {
        self.store = DocumentStore::with_peer(self.peer_id());
        self.history.clear();
        self.presence.clear();
        self.presence_draft = PresenceUpdate::default();
    }

    fn queue_join(&mut self) {
        if let Some(context) = &self.context {
            let msg = ClientMessage::Join {
                board_id: context.board_id,
                token: context.token.clone(),
                peer_id: self.peer_id(),
            };
            self.queue(&msg);
        }
    }

    fn queue(&mut self, msg: &ClientMessage) {
        match serde_json::to_string(msg) {
            Ok(json) => self.outgoing.push(json),
            Err(e) => log::error!("Failed to encode client message: {}", e),
        }
    }

    /// Take pending outgoing messages (drains the queue).
    ///
    /// Local deltas are only released while a session is granted; until then
    /// they stay in the replica's outbox.
    pub fn take_outgoing(&mut self) -> Vec<String> {
        if self.is_joined() {
            for delta in self.store.take_outgoing() {
                self.queue(&ClientMessage::Delta { delta });
            }
        }
        std::mem::take(&mut self.outgoing)
    }

    /// Check if there are pending outgoing messages.
    pub fn has_outgoing(&self) -> bool {
        !self.outgoing.is_empty() || (self.is_joined() && self.store.has_outgoing())
    }

    // --- Transport ---

    /// The transport is up. Re-joins the current board, if any.
    pub fn connected(&mut self) {
        self.connection = ConnectionState::Connected;
        self.queue_join();
    }

    /// The transport dropped. Remote presence is discarded; local edits keep
    /// accumulating and are replayed after the next join, which follows
    /// automatically once the socket reconnects.
    pub fn connection_lost(&mut self) -> SyncEvent {
        self.connection = ConnectionState::Disconnected;
        if let Some(context) = &mut self.context {
            context.joined = false;
        }
        self.presence.clear_others();
        // Queued messages were addressed to the old connection.
        self.outgoing.clear();
        SyncEvent::ConnectionLost
    }

    /// Feed a transport event.
    pub fn handle_socket_event(&mut self, event: SocketEvent) -> Option<SyncEvent> {
        match event {
            SocketEvent::Connected => {
                self.connected();
                None
            }
            SocketEvent::Disconnected => Some(self.connection_lost()),
            SocketEvent::Error { message } => {
                let lost = self.connection_lost();
                log::warn!("collaboration transport error: {}", message);
                self.connection = ConnectionState::Error;
                Some(lost)
            }
            SocketEvent::Message(msg) => self.handle_server_message(msg),
        }
    }

    /// Poll `socket`, process what arrived and flush outgoing messages.
    ///
    /// Polling also drives the socket's reconnect schedule, so calling this
    /// regularly is all a host needs to recover from a dropped connection.
    pub fn pump(&mut self, socket: &mut NativeWebSocket) -> Vec<SyncEvent> {
        let events: Vec<SyncEvent> = socket
            .poll_events()
            .into_iter()
            .filter_map(|event| self.handle_socket_event(event))
            .collect();

        if socket.is_connected() {
            for msg in self.take_outgoing() {
                if let Err(e) = socket.send(&msg) {
                    log::warn!("Dropping outgoing message: {}", e);
                }
            }
        }
        events
    }

    // --- Incoming Message Handling ---

    /// Handle an incoming server message encoded as JSON.
    pub fn handle_message(&mut self, json: &str) -> Option<SyncEvent> {
        match serde_json::from_str::<ServerMessage>(json) {
            Ok(msg) => self.handle_server_message(msg),
            Err(e) => {
                log::warn!("Ignoring malformed server message: {}", e);
                None
            }
        }
    }

    /// Handle an incoming server message.
    /// Returns a SyncEvent describing what happened.
    pub fn handle_server_message(&mut self, msg: ServerMessage) -> Option<SyncEvent> {
        match msg {
            ServerMessage::Joined {
                board_id,
                presence,
                snapshot,
                peers,
            } => {
                let context = self.context.as_mut().filter(|c| c.board_id == board_id)?;
                context.joined = true;

                self.store.apply_remote(&snapshot);
                // The server may have missed local edits made before this
                // session; send everything and drop the now redundant outbox.
                let full = self.store.export();
                self.store.clear_outgoing();
                if !full.is_empty() {
                    self.queue(&ClientMessage::Delta { delta: full });
                }

                self.presence.clear_others();
                self.presence.set_local(presence);
                let draft = std::mem::take(&mut self.presence_draft);
                if !draft.is_empty() {
                    self.presence.update_local(&draft);
                    self.queue(&ClientMessage::Presence { update: draft });
                }
                let peer_count = peers.len() + 1;
                for record in peers {
                    self.presence.apply_remote(record);
                }

                log::info!("joined board {} with {} peers", board_id, peer_count);
                Some(SyncEvent::JoinedBoard {
                    board_id,
                    peer_count,
                })
            }
            ServerMessage::Denied { reason } => {
                log::warn!("session denied: {}", reason);
                self.context = None;
                self.reset_board();
                Some(SyncEvent::Denied { reason })
            }
            ServerMessage::PeerJoined { presence } => {
                let peer_id = presence.peer;
                self.presence.apply_remote(presence);
                Some(SyncEvent::PeerJoined { peer_id })
            }
            ServerMessage::PeerLeft { peer_id } => {
                self.presence.remove(peer_id);
                Some(SyncEvent::PeerLeft { peer_id })
            }
            ServerMessage::Delta { delta } => {
                if !self.is_joined() || delta.origin == self.peer_id() {
                    return None;
                }
                let report = self.store.apply_remote(&delta);
                Some(SyncEvent::DeltaMerged {
                    origin: delta.origin,
                    report,
                })
            }
            ServerMessage::Presence { presence } => {
                let peer_id = presence.peer;
                self.presence.apply_remote(presence);
                Some(SyncEvent::PresenceChanged { peer_id })
            }
            ServerMessage::Saved { board_id } => Some(SyncEvent::Saved { board_id }),
            ServerMessage::Error { message } => {
                log::warn!("server error: {}", message);
                Some(SyncEvent::Error { message })
            }
        }
    }
}

impl Default for CollaborationManager {
    fn default() -> Self {
        Self::new()
    }
}
