//! In-memory storage implementation.

use super::{BoardKey, BoxFuture, Storage, StorageError, StorageResult};
use crate::directory::BoardId;
use crate::snapshot::BoardSnapshot;
use std::collections::HashMap;
use std::future::ready;
use std::sync::RwLock;

/// In-memory storage for testing and ephemeral use.
#[derive(Default)]
pub struct MemoryStorage {
    boards: RwLock<HashMap<BoardKey, BoardSnapshot>>,
}

impl MemoryStorage {
    /// Create a new empty memory storage.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_error(e: impl std::fmt::Display) -> StorageError {
        StorageError::Other(format!("Lock error: {}", e))
    }
}

impl Storage for MemoryStorage {
    fn save(&self, key: &BoardKey, snapshot: &BoardSnapshot) -> BoxFuture<'_, StorageResult<()>> {
        let result = self
            .boards
            .write()
            .map_err(Self::lock_error)
            .map(|mut boards| {
                boards.insert(key.clone(), snapshot.clone());
            });
        Box::pin(ready(result))
    }

    fn load(&self, key: &BoardKey) -> BoxFuture<'_, StorageResult<BoardSnapshot>> {
        let result = self.boards.read().map_err(Self::lock_error).and_then(|boards| {
            boards
                .get(key)
                .cloned()
                .ok_or_else(|| StorageError::NotFound(key.clone()))
        });
        Box::pin(ready(result))
    }

    fn delete(&self, key: &BoardKey) -> BoxFuture<'_, StorageResult<()>> {
        let result = self
            .boards
            .write()
            .map_err(Self::lock_error)
            .map(|mut boards| {
                boards.remove(key);
            });
        Box::pin(ready(result))
    }

    fn list(&self, org_id: &str) -> BoxFuture<'_, StorageResult<Vec<BoardId>>> {
        let result = self.boards.read().map_err(Self::lock_error).map(|boards| {
            let mut ids: Vec<BoardId> = boards
                .keys()
                .filter(|k| k.org_id == org_id)
                .map(|k| k.board_id)
                .collect();
            ids.sort();
            ids
        });
        Box::pin(ready(result))
    }

    fn exists(&self, key: &BoardKey) -> BoxFuture<'_, StorageResult<bool>> {
        let result = self
            .boards
            .read()
            .map_err(Self::lock_error)
            .map(|boards| boards.contains_key(key));
        Box::pin(ready(result))
    }
}
