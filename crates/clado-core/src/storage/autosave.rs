//! Auto-save: periodic persistence of a board's snapshot.

use crate::snapshot::BoardSnapshot;
use crate::storage::{BoardKey, FileStorage, Storage, StorageResult};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default auto-save interval in seconds.
pub const DEFAULT_AUTOSAVE_INTERVAL_SECS: u64 = 30;

/// Tracks unsaved changes of one board and saves them on a fixed cadence.
pub struct AutoSaveManager<S: Storage + ?Sized> {
    /// Storage backend.
    storage: Arc<S>,
    /// Board being tracked.
    key: BoardKey,
    /// Auto-save interval.
    interval: Duration,
    /// Last save timestamp.
    last_save: Option<Instant>,
    /// Whether the board has unsaved changes.
    dirty: bool,
}

impl<S: Storage + ?Sized> AutoSaveManager<S> {
    /// Create a new auto-save manager for `key`.
    pub fn new(storage: Arc<S>, key: BoardKey) -> Self {
        Self {
            storage,
            key,
            interval: Duration::from_secs(DEFAULT_AUTOSAVE_INTERVAL_SECS),
            last_save: None,
            dirty: false,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the auto-save interval.
    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn key(&self) -> &BoardKey {
        &self.key
    }

    /// Mark the board as having unsaved changes.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Check if the board is dirty and the interval has elapsed.
    pub fn should_save(&self) -> bool {
        if !self.dirty {
            return false;
        }

        match self.last_save {
            Some(last) => last.elapsed() >= self.interval,
            None => true,
        }
    }

    /// Save if needed (dirty + interval elapsed).
    /// Returns true if a save was performed.
    pub async fn maybe_save(&mut self, snapshot: &BoardSnapshot) -> StorageResult<bool> {
        if !self.should_save() {
            return Ok(false);
        }

        self.save(snapshot).await?;
        Ok(true)
    }

    /// Save immediately.
    pub async fn save(&mut self, snapshot: &BoardSnapshot) -> StorageResult<()> {
        self.storage.save(&self.key, snapshot).await?;
        self.last_save = Some(Instant::now());
        self.dirty = false;
        log::debug!("saved board {} ({} nodes)", self.key, snapshot.nodes.len());
        Ok(())
    }

    /// Load the tracked board. A missing board loads as `None`.
    pub async fn load(&mut self) -> StorageResult<Option<BoardSnapshot>> {
        if !self.storage.exists(&self.key).await? {
            return Ok(None);
        }
        let snapshot = self.storage.load(&self.key).await?;
        self.dirty = false;
        self.last_save = Some(Instant::now());
        Ok(Some(snapshot))
    }

    /// Get a reference to the storage backend.
    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }
}

/// Create file storage in the default data directory.
pub fn create_default_storage() -> StorageResult<Arc<FileStorage>> {
    Ok(Arc::new(FileStorage::default_location()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStorage, block_on};
    use uuid::Uuid;

    fn manager() -> AutoSaveManager<MemoryStorage> {
        AutoSaveManager::new(
            Arc::new(MemoryStorage::new()),
            BoardKey::new("org", Uuid::new_v4()),
        )
    }

    #[test]
    fn test_autosave_manager_creation() {
        let manager = manager();
        assert!(!manager.is_dirty());
        assert!(!manager.should_save());
        assert_eq!(manager.interval(), Duration::from_secs(DEFAULT_AUTOSAVE_INTERVAL_SECS));
    }

    #[test]
    fn test_autosave_dirty_flag() {
        let mut manager = manager();
        manager.mark_dirty();
        assert!(manager.is_dirty());
        // Never saved, so a dirty board saves right away.
        assert!(manager.should_save());
    }

    #[test]
    fn test_autosave_respects_interval() {
        let mut manager = manager();
        manager.mark_dirty();
        assert!(block_on(manager.maybe_save(&BoardSnapshot::default())).unwrap());
        assert!(!manager.is_dirty());

        manager.mark_dirty();
        assert!(!manager.should_save());
        assert!(!block_on(manager.maybe_save(&BoardSnapshot::default())).unwrap());

        manager.set_interval(Duration::ZERO);
        assert!(manager.should_save());
    }

    #[test]
    fn test_autosave_load() {
        let mut manager = manager();
        assert_eq!(block_on(manager.load()).unwrap(), None);

        manager.mark_dirty();
        block_on(manager.save(&BoardSnapshot::default())).unwrap();

        let mut again = AutoSaveManager::new(manager.storage().clone(), manager.key().clone());
        assert_eq!(block_on(again.load()).unwrap(), Some(BoardSnapshot::default()));
    }

    #[test]
    fn test_dyn_storage() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let mut manager = AutoSaveManager::new(storage, BoardKey::new("org", Uuid::new_v4()));
        manager.mark_dirty();
        block_on(manager.save(&BoardSnapshot::default())).unwrap();
        assert!(!manager.is_dirty());
    }
}
