//! WebSocket sessions.
//!
//! Each connection may be in at most one board room. Joining authorizes the
//! token against the board directory; a refused join is answered with
//! `denied` and the socket is closed.

use crate::room::Envelope;
use crate::state::{Admission, AppState, JoinError, SharedRoom};
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use clado_core::crdt::PeerId;
use clado_core::directory::BoardId;
use clado_core::presence::PresenceRecord;
use clado_core::session::open_session;
use clado_core::storage::BoardKey;
use clado_core::sync::{ClientMessage, ServerMessage};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};
use uuid::Uuid;

type Sender = SplitSink<WebSocket, Message>;

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Membership of one connection in a room.
struct Membership {
    board_id: BoardId,
    peer: PeerId,
    room: SharedRoom,
    rx: broadcast::Receiver<Envelope>,
}

/// What the connection loop should do after handling a message.
enum Flow {
    Continue,
    Close,
}

async fn send(sender: &mut Sender, msg: &ServerMessage) -> bool {
    match serde_json::to_string(msg) {
        Ok(json) => sender.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!("Failed to encode server message: {}", e);
            true
        }
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let conn = Uuid::new_v4();
    info!("New connection: {}", conn);

    let (mut sender, mut receiver) = socket.split();
    let mut membership: Option<Membership> = None;

    loop {
        tokio::select! {
            msg = receiver.next() => {
                let flow = match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(text.as_str()) {
                            Ok(client_msg) => {
                                handle_client_message(client_msg, &state, &mut membership, &mut sender).await
                            }
                            Err(e) => {
                                warn!("Invalid message on {}: {}", conn, e);
                                let err = ServerMessage::Error {
                                    message: format!("Invalid message: {}", e),
                                };
                                if send(&mut sender, &err).await { Flow::Continue } else { Flow::Close }
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => Flow::Close,
                    Some(Ok(_)) => Flow::Continue,
                    Some(Err(e)) => {
                        warn!("WebSocket error on {}: {}", conn, e);
                        Flow::Close
                    }
                };
                if matches!(flow, Flow::Close) {
                    break;
                }
            }

            relayed = async {
                match &mut membership {
                    Some(m) => Some(m.rx.recv().await),
                    None => std::future::pending().await,
                }
            } => {
                let Some(m) = membership.as_mut() else { continue };
                match relayed {
                    Some(Ok(envelope)) => {
                        if envelope.from == Some(m.peer) {
                            continue;
                        }
                        if !send(&mut sender, &envelope.msg).await {
                            break;
                        }
                        if matches!(envelope.msg, ServerMessage::Denied { .. }) {
                            info!("Board {} closed under peer {}", m.board_id, m.peer);
                            break;
                        }
                    }
                    Some(Err(RecvError::Lagged(skipped))) => {
                        // Missed deltas are recovered by resending the full replica.
                        warn!("Peer {} lagged by {} messages, resyncing", m.peer, skipped);
                        let delta = m.room.lock().await.store().export();
                        if !send(&mut sender, &ServerMessage::Delta { delta }).await {
                            break;
                        }
                    }
                    Some(Err(RecvError::Closed)) | None => break,
                }
            }
        }
    }

    if let Some(m) = membership.take() {
        leave(&state, m).await;
    }
    let _ = sender.close().await;
    info!("Connection closed: {}", conn);
}

async fn handle_client_message(
    msg: ClientMessage,
    state: &AppState,
    membership: &mut Option<Membership>,
    sender: &mut Sender,
) -> Flow {
    let reply = match msg {
        ClientMessage::Join {
            board_id,
            token,
            peer_id,
        } => {
            if let Some(m) = membership.take() {
                leave(state, m).await;
            }
            return join(state, membership, sender, board_id, &token, peer_id).await;
        }
        ClientMessage::Leave => {
            if let Some(m) = membership.take() {
                leave(state, m).await;
            }
            None
        }
        ClientMessage::Delta { delta } => match membership {
            Some(m) if delta.origin == m.peer => {
                m.room.lock().await.merge(m.peer, delta);
                None
            }
            Some(m) => Some(ServerMessage::Error {
                message: format!("delta origin {} does not match peer {}", delta.origin, m.peer),
            }),
            None => Some(not_joined()),
        },
        ClientMessage::Presence { update } => match membership {
            Some(m) => {
                m.room.lock().await.update_presence(m.peer, &update);
                None
            }
            None => Some(not_joined()),
        },
        ClientMessage::Save => match membership {
            Some(m) => match m.room.lock().await.save().await {
                Ok(()) => Some(ServerMessage::Saved {
                    board_id: m.board_id,
                }),
                Err(e) => {
                    warn!("Saving board {} failed: {}", m.board_id, e);
                    Some(ServerMessage::Error {
                        message: format!("Save failed: {}", e),
                    })
                }
            },
            None => Some(not_joined()),
        },
    };

    match reply {
        Some(reply) => {
            if send(sender, &reply).await {
                Flow::Continue
            } else {
                Flow::Close
            }
        }
        None => Flow::Continue,
    }
}

fn not_joined() -> ServerMessage {
    ServerMessage::Error {
        message: "not joined to a board".to_string(),
    }
}

async fn deny(sender: &mut Sender, reason: String) -> Flow {
    let _ = send(sender, &ServerMessage::Denied { reason }).await;
    Flow::Close
}

async fn join(
    state: &AppState,
    membership: &mut Option<Membership>,
    sender: &mut Sender,
    board_id: BoardId,
    token: &str,
    peer: PeerId,
) -> Flow {
    let grant = match open_session(
        state.identities.as_ref(),
        state.directory.as_ref(),
        token,
        board_id,
        peer,
    ) {
        Ok(grant) => grant,
        Err(e) => {
            info!("Denied join of board {}: {}", board_id, e);
            return deny(sender, e.to_string()).await;
        }
    };

    let key = BoardKey::new(grant.org_id(), board_id);
    let presence = PresenceRecord::from_grant(&grant);
    let Admission { room, rx, joined } = match state.join_room(&key, presence).await {
        Ok(admission) => admission,
        Err(JoinError::Storage(e)) => {
            warn!("Opening board {} failed: {}", key, e);
            let err = ServerMessage::Error {
                message: format!("Board unavailable: {}", e),
            };
            return if send(sender, &err).await { Flow::Continue } else { Flow::Close };
        }
        Err(JoinError::Room(e)) => {
            state.close_if_empty(board_id);
            return deny(sender, e.to_string()).await;
        }
    };

    info!("Peer {} ({}) joined board {}", peer, grant.identity().user_id, board_id);
    *membership = Some(Membership {
        board_id,
        peer,
        room,
        rx,
    });
    if send(sender, &joined).await { Flow::Continue } else { Flow::Close }
}

/// Leave a room, saving and closing it when the last member goes.
async fn leave(state: &AppState, m: Membership) {
    let Membership { board_id, peer, room, .. } = m;
    let empty = {
        let mut room = room.lock().await;
        if room.is_closed() {
            return;
        }
        room.leave(peer);
        if room.is_empty() && room.is_dirty() {
            if let Err(e) = room.save().await {
                warn!("Saving board {} failed: {}", board_id, e);
            }
        }
        room.is_empty()
    };
    info!("Peer {} left board {}", peer, board_id);
    if empty {
        state.close_if_empty(board_id);
    }
}
