//! File-based storage implementation.

use super::{BoardKey, BoxFuture, Storage, StorageError, StorageResult};
use crate::directory::BoardId;
use crate::snapshot::BoardSnapshot;
use std::fs;
use std::future::ready;
use std::path::PathBuf;

/// File-based storage.
///
/// Stores each board as `<base>/<org>/<board>.json`.
pub struct FileStorage {
    /// Base directory for board storage.
    base_path: PathBuf,
}

impl FileStorage {
    /// Create a new file storage with the given base directory.
    ///
    /// Creates the directory if it doesn't exist.
    pub fn new(base_path: PathBuf) -> StorageResult<Self> {
        if !base_path.exists() {
            fs::create_dir_all(&base_path).map_err(|e| {
                StorageError::Io(format!("Failed to create storage directory: {}", e))
            })?;
        }
        Ok(Self { base_path })
    }

    /// Create file storage in the default location.
    ///
    /// On Unix: `~/.local/share/clado/boards/`
    /// On Windows: `%LOCALAPPDATA%\clado\boards\`
    pub fn default_location() -> StorageResult<Self> {
        let base = dirs::data_local_dir()
            .or_else(dirs::home_dir)
            .ok_or_else(|| StorageError::Io("Could not determine home directory".to_string()))?;

        Self::new(base.join("clado").join("boards"))
    }

    /// Directory holding an organization's boards.
    fn org_dir(&self, org_id: &str) -> PathBuf {
        // Org ids come from the identity provider; keep them filename-safe.
        let safe: String = org_id
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.base_path.join(safe)
    }

    fn board_path(&self, key: &BoardKey) -> PathBuf {
        self.org_dir(&key.org_id).join(format!("{}.json", key.board_id))
    }

    /// Get the base path.
    pub fn base_path(&self) -> &PathBuf {
        &self.base_path
    }

    fn write(&self, key: &BoardKey, snapshot: &BoardSnapshot) -> StorageResult<()> {
        let json = snapshot
            .to_json()
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        let dir = self.org_dir(&key.org_id);
        fs::create_dir_all(&dir)
            .map_err(|e| StorageError::Io(format!("Failed to create {}: {}", dir.display(), e)))?;

        // Write to a sibling file first so readers never see a partial snapshot.
        let path = self.board_path(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)
            .map_err(|e| StorageError::Io(format!("Failed to write {}: {}", tmp.display(), e)))?;
        fs::rename(&tmp, &path)
            .map_err(|e| StorageError::Io(format!("Failed to write {}: {}", path.display(), e)))
    }

    fn read(&self, key: &BoardKey) -> StorageResult<BoardSnapshot> {
        let path = self.board_path(key);
        if !path.exists() {
            return Err(StorageError::NotFound(key.clone()));
        }

        let json = fs::read_to_string(&path)
            .map_err(|e| StorageError::Io(format!("Failed to read {}: {}", path.display(), e)))?;

        BoardSnapshot::from_json(&json).map_err(|e| {
            StorageError::Serialization(format!("Failed to parse {}: {}", path.display(), e))
        })
    }

    fn remove(&self, key: &BoardKey) -> StorageResult<()> {
        let path = self.board_path(key);
        if path.exists() {
            fs::remove_file(&path).map_err(|e| {
                StorageError::Io(format!("Failed to delete {}: {}", path.display(), e))
            })?;
        }
        Ok(())
    }

    fn scan(&self, org_id: &str) -> StorageResult<Vec<BoardId>> {
        let dir = self.org_dir(org_id);
        if !dir.exists() {
            return Ok(vec![]);
        }

        let entries = fs::read_dir(&dir)
            .map_err(|e| StorageError::Io(format!("Failed to read directory: {}", e)))?;

        let mut ids: Vec<BoardId> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|e| e == "json"))
            .filter_map(|path| path.file_stem()?.to_str()?.parse().ok())
            .collect();
        ids.sort();
        Ok(ids)
    }
}

impl Storage for FileStorage {
    fn save(&self, key: &BoardKey, snapshot: &BoardSnapshot) -> BoxFuture<'_, StorageResult<()>> {
        Box::pin(ready(self.write(key, snapshot)))
    }

    fn load(&self, key: &BoardKey) -> BoxFuture<'_, StorageResult<BoardSnapshot>> {
        Box::pin(ready(self.read(key)))
    }

    fn delete(&self, key: &BoardKey) -> BoxFuture<'_, StorageResult<()>> {
        Box::pin(ready(self.remove(key)))
    }

    fn list(&self, org_id: &str) -> BoxFuture<'_, StorageResult<Vec<BoardId>>> {
        Box::pin(ready(self.scan(org_id)))
    }

    fn exists(&self, key: &BoardKey) -> BoxFuture<'_, StorageResult<bool>> {
        Box::pin(ready(Ok(self.board_path(key).exists())))
    }
}
