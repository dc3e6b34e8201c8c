//! Board rooms: one replica document per open board.

use clado_core::crdt::{Delta, DocumentStore, MergeReport, PeerId};
use clado_core::presence::{PresenceRecord, PresenceUpdate};
use clado_core::snapshot::BoardSnapshot;
use clado_core::storage::{AutoSaveManager, BoardKey, Storage, StorageError, StorageResult};
use clado_core::sync::ServerMessage;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Capacity of each room's broadcast channel.
pub const CHANNEL_CAPACITY: usize = 256;

/// How far past the replica's clock a member's counter may jump.
pub const MAX_CLOCK_LEAP: u64 = 1 << 32;

/// A message relayed to every member of a room except its sender.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Sending member, or `None` for messages from the server itself.
    pub from: Option<PeerId>,
    pub msg: ServerMessage,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoomError {
    #[error("peer id in use")]
    PeerInUse(PeerId),
}

pub struct Room {
    key: BoardKey,
    /// Merged state of everything members have sent.
    store: DocumentStore,
    presences: HashMap<PeerId, PresenceRecord>,
    tx: broadcast::Sender<Envelope>,
    autosave: AutoSaveManager<dyn Storage>,
    /// Set once the board is removed. A closed room is never saved again.
    closed: bool,
}

impl Room {
    /// Open the room for `key`, restoring the replica from storage when a
    /// snapshot exists.
    pub async fn open(storage: Arc<dyn Storage>, key: BoardKey, interval: Duration) -> StorageResult<Self> {
        let mut autosave = AutoSaveManager::new(storage, key.clone()).with_interval(interval);
        let mut store = DocumentStore::new();
        if let Some(snapshot) = autosave.load().await? {
            snapshot.restore(&mut store);
            info!("Loaded board {} ({} layers)", key, store.len());
        }

        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Ok(Self {
            key,
            store,
            presences: HashMap::new(),
            tx,
            autosave,
            closed: false,
        })
    }

    pub fn key(&self) -> &BoardKey {
        &self.key
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    /// Admit a member. Returns its broadcast receiver and the `joined` reply.
    pub fn join(
        &mut self,
        presence: PresenceRecord,
    ) -> Result<(broadcast::Receiver<Envelope>, ServerMessage), RoomError> {
        let peer = presence.peer;
        if self.presences.contains_key(&peer) {
            return Err(RoomError::PeerInUse(peer));
        }

        let rx = self.tx.subscribe();
        let joined = ServerMessage::Joined {
            board_id: self.key.board_id,
            presence: presence.clone(),
            snapshot: self.store.export(),
            peers: self.peers(),
        };
        self.presences.insert(peer, presence.clone());
        self.broadcast(Some(peer), ServerMessage::PeerJoined { presence });
        Ok((rx, joined))
    }

    /// Remove a member and tell the others. Returns false if it was not here.
    pub fn leave(&mut self, peer: PeerId) -> bool {
        if self.presences.remove(&peer).is_none() {
            return false;
        }
        self.broadcast(Some(peer), ServerMessage::PeerLeft { peer_id: peer });
        true
    }

    /// Close the room for good: every member is sent `denied` with `reason`
    /// and nothing is merged or saved afterwards.
    pub fn close(&mut self, reason: &str) {
        self.closed = true;
        self.presences.clear();
        self.broadcast(
            None,
            ServerMessage::Denied {
                reason: reason.to_string(),
            },
        );
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn contains(&self, peer: PeerId) -> bool {
        self.presences.contains_key(&peer)
    }

    pub fn is_empty(&self) -> bool {
        self.presences.is_empty()
    }

    pub fn peer_count(&self) -> usize {
        self.presences.len()
    }

    /// Presence of every member, ordered by peer id.
    pub fn peers(&self) -> Vec<PresenceRecord> {
        let mut peers: Vec<PresenceRecord> = self.presences.values().cloned().collect();
        peers.sort_by_key(|p| p.peer);
        peers
    }

    /// Merge a member's delta into the replica and relay it. Operations with
    /// out-of-range stamps, or counters more than [`MAX_CLOCK_LEAP`] ahead of
    /// the replica, are neither merged nor relayed.
    pub fn merge(&mut self, from: PeerId, mut delta: Delta) -> MergeReport {
        if self.closed {
            return MergeReport::default();
        }
        let horizon = self.store.version().saturating_add(MAX_CLOCK_LEAP);
        let received = delta.ops.len();
        delta
            .ops
            .retain(|op| op.stamp.is_valid() && op.stamp.counter <= horizon);
        let rejected = received - delta.ops.len();
        if rejected > 0 {
            warn!("Board {}: rejected {} ops from {} with runaway stamps", self.key, rejected, from);
        }
        let mut report = self.store.apply_remote(&delta);
        report.dropped += rejected;
        if report.applied > 0 {
            self.autosave.mark_dirty();
        }
        debug!(
            "Board {}: merged {} ops from {} ({} dropped)",
            self.key, report.applied, from, report.dropped
        );
        if !delta.is_empty() {
            self.broadcast(Some(from), ServerMessage::Delta { delta });
        }
        report
    }

    /// Merge a partial presence update and relay the full record.
    pub fn update_presence(&mut self, peer: PeerId, update: &PresenceUpdate) -> Option<PresenceRecord> {
        let record = self.presences.get_mut(&peer)?;
        record.apply(update);
        let record = record.clone();
        self.broadcast(
            Some(peer),
            ServerMessage::Presence {
                presence: record.clone(),
            },
        );
        Some(record)
    }

    pub fn is_dirty(&self) -> bool {
        self.autosave.is_dirty()
    }

    /// Persist the replica now.
    pub async fn save(&mut self) -> StorageResult<()> {
        if self.closed {
            return Err(StorageError::NotFound(self.key.clone()));
        }
        let snapshot = BoardSnapshot::from_store(&self.store);
        self.autosave.save(&snapshot).await
    }

    /// Persist the replica if it changed and the autosave interval elapsed.
    pub async fn maybe_save(&mut self) -> StorageResult<bool> {
        if self.closed || !self.autosave.should_save() {
            return Ok(false);
        }
        let snapshot = BoardSnapshot::from_store(&self.store);
        self.autosave.maybe_save(&snapshot).await
    }

    fn broadcast(&self, from: Option<PeerId>, msg: ServerMessage) {
        // No receivers is fine: the room may have a single member.
        let _ = self.tx.send(Envelope { from, msg });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clado_core::crdt::{Change, MAX_COUNTER, Op, Stamp};
    use clado_core::layer::{FieldValue, Layer, LayerKind, Rgb};
    use clado_core::storage::MemoryStorage;
    use kurbo::Rect;
    use uuid::Uuid;

    fn presence(peer: PeerId) -> PresenceRecord {
        PresenceRecord {
            peer,
            user_id: format!("user-{peer}"),
            name: format!("User {peer}"),
            color: Rgb::black(),
            cursor: None,
            selection: Vec::new(),
        }
    }

    async fn room(storage: Arc<dyn Storage>) -> Room {
        let key = BoardKey::new("org", Uuid::nil());
        Room::open(storage, key, Duration::ZERO).await.unwrap()
    }

    #[tokio::test]
    async fn test_join_rejects_duplicate_peer() {
        let mut room = room(Arc::new(MemoryStorage::new())).await;
        let first = presence(7);
        assert!(room.join(first.clone()).is_ok());
        assert_eq!(room.join(first).unwrap_err(), RoomError::PeerInUse(7));
        assert_eq!(room.peer_count(), 1);
    }

    #[tokio::test]
    async fn test_members_see_each_other() {
        let mut room = room(Arc::new(MemoryStorage::new())).await;
        let (mut rx, _) = room.join(presence(1)).unwrap();
        let (_, joined) = room.join(presence(2)).unwrap();

        match joined {
            ServerMessage::Joined { peers, .. } => {
                assert_eq!(peers.iter().map(|p| p.peer).collect::<Vec<_>>(), vec![1]);
            }
            other => panic!("unexpected reply {other:?}"),
        }
        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.from, Some(2));
        assert!(matches!(envelope.msg, ServerMessage::PeerJoined { .. }));

        assert!(room.leave(2));
        assert!(!room.leave(2));
        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.msg, ServerMessage::PeerLeft { peer_id: 2 });
    }

    #[tokio::test]
    async fn test_merge_marks_dirty_and_persists() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let mut room = room(storage.clone()).await;
        assert!(!room.is_dirty());

        let mut client = DocumentStore::with_peer(5);
        let layer = Layer::new(LayerKind::Note, Rect::new(0.0, 0.0, 100.0, 50.0));
        let delta = client.insert(&layer);
        let report = room.merge(5, delta.clone());
        assert!(report.applied > 0);
        assert!(room.is_dirty());

        // Re-delivery changes nothing.
        room.merge(5, delta);
        assert_eq!(room.store().len(), 1);

        assert!(room.maybe_save().await.unwrap());
        assert!(!room.is_dirty());

        let reopened = Room::open(storage, room.key().clone(), Duration::ZERO).await.unwrap();
        assert_eq!(reopened.store().len(), 1);
        assert_eq!(reopened.store().get(layer.id()).unwrap().bounds(), layer.bounds());
    }

    #[tokio::test]
    async fn test_reopen_keeps_newer_writes_over_stale_rejoin() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let mut room = room(storage.clone()).await;

        let mut alice = DocumentStore::with_peer(1);
        let kept = Layer::new(LayerKind::Note, Rect::new(0.0, 0.0, 100.0, 50.0));
        let doomed = Layer::new(LayerKind::Rectangle, Rect::new(300.0, 0.0, 400.0, 50.0));
        room.merge(1, alice.insert(&kept));
        room.merge(1, alice.insert(&doomed));
        room.merge(1, alice.set(kept.id(), FieldValue::X(20.0)));

        // Bob saw everything so far, then went offline.
        let mut bob = DocumentStore::with_peer(2);
        bob.apply_remote(&room.store().export());

        room.merge(1, alice.set(kept.id(), FieldValue::X(999.0)));
        room.merge(1, alice.delete(doomed.id()));
        room.save().await.unwrap();
        drop(room);

        let mut reopened = Room::open(storage, BoardKey::new("org", Uuid::nil()), Duration::ZERO)
            .await
            .unwrap();
        reopened.merge(2, bob.export());
        assert!(!reopened.store().contains(doomed.id()));
        assert!((reopened.store().get(kept.id()).unwrap().x - 999.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_close_denies_members_and_stops_saving() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let mut room = room(storage.clone()).await;
        let (mut rx, _) = room.join(presence(1)).unwrap();

        let mut client = DocumentStore::with_peer(1);
        room.merge(1, client.insert(&Layer::new(LayerKind::Text, Rect::new(0.0, 0.0, 10.0, 10.0))));
        room.close("board removed");

        let mut denied = false;
        while let Ok(envelope) = rx.try_recv() {
            if let ServerMessage::Denied { reason } = envelope.msg {
                assert_eq!(envelope.from, None);
                assert_eq!(reason, "board removed");
                denied = true;
            }
        }
        assert!(denied);
        assert!(room.is_empty());
        assert!(room.is_closed());

        assert!(!room.maybe_save().await.unwrap());
        assert!(room.save().await.is_err());
        assert!(!storage.exists(room.key()).await.unwrap());
    }

    #[tokio::test]
    async fn test_out_of_range_stamps_not_relayed() {
        let mut room = room(Arc::new(MemoryStorage::new())).await;
        let (mut rx, _) = room.join(presence(1)).unwrap();
        room.join(presence(2)).unwrap();
        while rx.try_recv().is_ok() {}

        let mut client = DocumentStore::with_peer(2);
        let layer = Layer::new(LayerKind::Note, Rect::new(0.0, 0.0, 100.0, 50.0));
        let mut delta = client.insert(&layer);
        delta.ops.push(Op {
            stamp: Stamp::new(u64::MAX, 2),
            change: Change::Delete { id: layer.id() },
        });

        let report = room.merge(2, delta);
        assert_eq!(report.dropped, 1);
        assert!(room.store().contains(layer.id()));
        match rx.try_recv().unwrap().msg {
            ServerMessage::Delta { delta } => assert!(delta.ops.iter().all(|op| op.stamp.is_valid())),
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_runaway_counter_cannot_pin_board() {
        let mut room = room(Arc::new(MemoryStorage::new())).await;
        room.join(presence(1)).unwrap();
        room.join(presence(2)).unwrap();

        let mut alice = DocumentStore::with_peer(1);
        let layer = Layer::new(LayerKind::Note, Rect::new(0.0, 0.0, 100.0, 50.0));
        room.merge(1, alice.insert(&layer));

        let pin = Delta {
            origin: 2,
            ops: vec![Op {
                stamp: Stamp::new(MAX_COUNTER, 2),
                change: Change::Delete { id: layer.id() },
            }],
        };
        let report = room.merge(2, pin);
        assert_eq!(report.dropped, 1);
        assert!(room.store().contains(layer.id()));
        assert!(room.store().version() < MAX_CLOCK_LEAP);

        // Honest writes after the rejected one still land.
        let moved = alice.set(layer.id(), FieldValue::X(20.0));
        assert_eq!(room.merge(1, moved).applied, 1);
    }
}
