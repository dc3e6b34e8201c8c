//! Shared application state.

use crate::config::ServerConfig;
use crate::room::{Envelope, Room, RoomError};
use clado_core::directory::{
    BoardDirectory, BoardId, DIRECTORY_FILE, DirectoryError, FileDirectory,
};
use clado_core::presence::PresenceRecord;
use clado_core::session::{IdentityProvider, SessionError, StaticIdentityProvider};
use clado_core::storage::{
    BoardKey, FileStorage, Storage, StorageError, StorageResult, create_default_storage,
};
use clado_core::sync::ServerMessage;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, broadcast};
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a member could not be admitted to a room.
#[derive(Debug, Error)]
pub enum JoinError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Room(#[from] RoomError),
}

pub type SharedRoom = Arc<Mutex<Room>>;

/// A member admitted to a room.
pub struct Admission {
    pub room: SharedRoom,
    pub rx: broadcast::Receiver<Envelope>,
    /// The `joined` reply for the new member.
    pub joined: ServerMessage,
}

impl std::fmt::Debug for Admission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Admission")
            .field("joined", &self.joined)
            .finish_non_exhaustive()
    }
}

pub struct AppState {
    /// Open boards.
    pub rooms: DashMap<BoardId, SharedRoom>,
    pub storage: Arc<dyn Storage>,
    pub identities: Arc<dyn IdentityProvider>,
    pub directory: Arc<dyn BoardDirectory>,
    pub autosave_interval: Duration,
}

impl AppState {
    pub fn new(
        storage: Arc<dyn Storage>,
        identities: Arc<dyn IdentityProvider>,
        directory: Arc<dyn BoardDirectory>,
    ) -> Self {
        Self {
            rooms: DashMap::new(),
            storage,
            identities,
            directory,
            autosave_interval: ServerConfig::default().autosave_interval,
        }
    }

    pub fn with_autosave_interval(mut self, interval: Duration) -> Self {
        self.autosave_interval = interval;
        self
    }

    /// Build the state described by `config`.
    pub fn from_config(config: &ServerConfig) -> Result<Self, ServerError> {
        let storage = match &config.data_dir {
            Some(dir) => Arc::new(FileStorage::new(dir.clone())?),
            None => create_default_storage()?,
        };
        info!("Storing boards under {}", storage.base_path().display());

        let identities = match &config.identities {
            Some(path) => {
                let provider = StaticIdentityProvider::load(path)?;
                info!("Loaded {} identities from {}", provider.len(), path.display());
                provider
            }
            None => {
                warn!("No identities configured; every session will be denied");
                StaticIdentityProvider::new()
            }
        };

        let directory = FileDirectory::open(storage.base_path().join(DIRECTORY_FILE))?;
        info!("Loaded {} boards from {}", directory.len(), directory.path().display());

        Ok(Self::new(storage, Arc::new(identities), Arc::new(directory))
            .with_autosave_interval(config.autosave_interval))
    }

    /// The open room for `key`, loading it from storage first if needed.
    pub async fn room(&self, key: &BoardKey) -> StorageResult<SharedRoom> {
        if let Some(room) = self.rooms.get(&key.board_id) {
            return Ok(room.clone());
        }

        let room = Room::open(self.storage.clone(), key.clone(), self.autosave_interval).await?;
        // Another connection may have opened the room while this one loaded.
        let room = self
            .rooms
            .entry(key.board_id)
            .or_insert_with(|| Arc::new(Mutex::new(room)))
            .clone();
        Ok(room)
    }

    /// Admit `presence` to the room for `key`, opening the room if needed.
    ///
    /// The join happens under the room lock and only once the room is known
    /// to still be the open one, so a concurrent close cannot orphan it.
    pub async fn join_room(&self, key: &BoardKey, presence: PresenceRecord) -> Result<Admission, JoinError> {
        loop {
            let room = self.room(key).await?;
            let mut guard = room.lock().await;
            let current = self
                .rooms
                .get(&key.board_id)
                .is_some_and(|open| Arc::ptr_eq(open.value(), &room));
            if !current || guard.is_closed() {
                continue;
            }
            let (rx, joined) = guard.join(presence)?;
            drop(guard);
            return Ok(Admission { room, rx, joined });
        }
    }

    /// Close the room for `board_id` and deny its members. Returns false if
    /// the board was not open.
    pub async fn evict(&self, board_id: BoardId, reason: &str) -> bool {
        let Some((_, room)) = self.rooms.remove(&board_id) else {
            return false;
        };
        room.lock().await.close(reason);
        info!("Evicted board {}: {}", board_id, reason);
        true
    }

    /// Drop the room for `board_id` if nobody is in it.
    pub fn close_if_empty(&self, board_id: BoardId) -> bool {
        let removed = self
            .rooms
            .remove_if(&board_id, |_, room| {
                room.try_lock().map(|room| room.is_empty()).unwrap_or(false)
            })
            .is_some();
        if removed {
            info!("Closed board {}", board_id);
        }
        removed
    }

    /// Persist every open room that is due for an autosave.
    pub async fn autosave(&self) {
        let rooms: Vec<SharedRoom> = self.rooms.iter().map(|entry| entry.value().clone()).collect();
        for room in rooms {
            let mut room = room.lock().await;
            if let Err(e) = room.maybe_save().await {
                warn!("Autosave of board {} failed: {}", room.key(), e);
            }
        }
    }

    /// Persist every open room that has unsaved changes.
    pub async fn save_all(&self) {
        let rooms: Vec<SharedRoom> = self.rooms.iter().map(|entry| entry.value().clone()).collect();
        for room in rooms {
            let mut room = room.lock().await;
            if !room.is_dirty() {
                continue;
            }
            if let Err(e) = room.save().await {
                warn!("Saving board {} failed: {}", room.key(), e);
            }
        }
    }
}

/// Run the autosave loop until the process exits.
pub async fn autosave_task(state: Arc<AppState>) {
    let period = state.autosave_interval.clamp(Duration::from_millis(100), Duration::from_secs(1));
    let mut ticker = tokio::time::interval(period);
    loop {
        ticker.tick().await;
        state.autosave().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clado_core::crdt::DocumentStore;
    use clado_core::directory::MemoryDirectory;
    use clado_core::layer::{Layer, LayerKind, Rgb};
    use clado_core::storage::MemoryStorage;
    use kurbo::Point;
    use uuid::Uuid;

    fn state(storage: Arc<MemoryStorage>) -> AppState {
        AppState::new(
            storage,
            Arc::new(StaticIdentityProvider::new()),
            Arc::new(MemoryDirectory::new()),
        )
        .with_autosave_interval(Duration::ZERO)
    }

    #[tokio::test]
    async fn test_room_is_shared_and_autosaved() {
        let storage = Arc::new(MemoryStorage::new());
        let state = state(storage.clone());
        let key = BoardKey::new("acme", Uuid::new_v4());

        let room = state.room(&key).await.unwrap();
        let again = state.room(&key).await.unwrap();
        assert!(Arc::ptr_eq(&room, &again));

        {
            let mut room = room.lock().await;
            room.join(PresenceRecord {
                peer: 1,
                user_id: "alice".to_string(),
                name: "alice".to_string(),
                color: Rgb::black(),
                cursor: None,
                selection: Vec::new(),
            })
            .unwrap();
            let mut client = DocumentStore::with_peer(1);
            let delta = client.insert(&Layer::placed(LayerKind::Node, Point::new(10.0, 10.0)));
            room.merge(1, delta);
        }
        // Occupied rooms stay open.
        assert!(!state.close_if_empty(key.board_id));

        state.autosave().await;
        assert!(storage.exists(&key).await.unwrap());
        assert!(!room.lock().await.is_dirty());

        room.lock().await.leave(1);
        assert!(state.close_if_empty(key.board_id));
        assert!(state.rooms.is_empty());
    }

    fn presence(peer: u64) -> PresenceRecord {
        PresenceRecord {
            peer,
            user_id: format!("user-{peer}"),
            name: format!("User {peer}"),
            color: Rgb::black(),
            cursor: None,
            selection: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_join_after_close_opens_fresh_room() {
        let storage = Arc::new(MemoryStorage::new());
        let state = state(storage);
        let key = BoardKey::new("acme", Uuid::new_v4());

        // A connection looked the room up, then the room closed before it joined.
        let stale = state.room(&key).await.unwrap();
        assert!(state.close_if_empty(key.board_id));

        let admission = state.join_room(&key, presence(1)).await.unwrap();
        assert!(!Arc::ptr_eq(&admission.room, &stale));
        let open = state.rooms.get(&key.board_id).unwrap().clone();
        assert!(Arc::ptr_eq(&admission.room, &open));
        assert_eq!(open.lock().await.peer_count(), 1);
        assert!(stale.lock().await.is_empty());

        let err = state.join_room(&key, presence(1)).await.unwrap_err();
        assert!(matches!(err, JoinError::Room(RoomError::PeerInUse(1))));
    }

    #[tokio::test]
    async fn test_evict_closes_room() {
        let storage = Arc::new(MemoryStorage::new());
        let state = state(storage);
        let key = BoardKey::new("acme", Uuid::new_v4());
        let admission = state.join_room(&key, presence(1)).await.unwrap();

        assert!(state.evict(key.board_id, "board removed").await);
        assert!(state.rooms.is_empty());
        assert!(admission.room.lock().await.is_closed());
        assert!(!state.evict(key.board_id, "board removed").await);
    }

    #[test]
    fn test_from_config_persists_directory() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            data_dir: Some(dir.path().to_path_buf()),
            ..ServerConfig::default()
        };
        let author = clado_core::session::Identity {
            user_id: "alice".to_string(),
            org_id: "acme".to_string(),
            name: "Alice".to_string(),
        };

        let board = {
            let state = AppState::from_config(&config).unwrap();
            state.directory.create(&author, "Roadmap").unwrap()
        };
        let state = AppState::from_config(&config).unwrap();
        assert_eq!(state.directory.get(board.id).unwrap(), board);
    }
}
