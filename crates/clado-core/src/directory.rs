//! Board directory: the list of boards an organization can open.
//!
//! Boards are scoped to an organization. Listing supports a title substring
//! search and a per-user favourites filter; results are newest first.
//!
//! [`MemoryDirectory`] keeps records in memory only. [`FileDirectory`] also
//! writes them to a JSON file so they survive a restart.

use crate::session::Identity;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier for a board.
pub type BoardId = Uuid;

/// Longest title a board may carry.
pub const MAX_TITLE_LEN: usize = 60;

/// Number of placeholder thumbnails boards are assigned from.
const PLACEHOLDER_COUNT: u128 = 10;

/// Directory errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("Board not found: {0}")]
    NotFound(BoardId),
    #[error("Invalid title: {0}")]
    InvalidTitle(String),
    #[error("Board {0} belongs to another organization")]
    Forbidden(BoardId),
    #[error("Directory error: {0}")]
    Other(String),
}

pub type DirectoryResult<T> = Result<T, DirectoryError>;

/// Metadata of one board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardRecord {
    pub id: BoardId,
    pub title: String,
    pub org_id: String,
    pub author_id: String,
    pub author_name: String,
    pub image_url: String,
    /// Creation time in milliseconds since the Unix epoch.
    pub created: u64,
}

/// Filter for [`BoardDirectory::list`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardQuery {
    pub org_id: String,
    /// Case-insensitive title substring.
    #[serde(default)]
    pub search: Option<String>,
    /// Only boards this user marked as favourite.
    #[serde(default)]
    pub favourites_of: Option<String>,
}

impl BoardQuery {
    pub fn org(org_id: impl Into<String>) -> Self {
        Self {
            org_id: org_id.into(),
            ..Default::default()
        }
    }

    pub fn search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    pub fn favourites_of(mut self, user_id: impl Into<String>) -> Self {
        self.favourites_of = Some(user_id.into());
        self
    }
}

/// A listed board with the caller's favourite flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardListing {
    #[serde(flatten)]
    pub board: BoardRecord,
    pub is_favourite: bool,
}

/// Trait for board directory backends.
pub trait BoardDirectory: Send + Sync {
    /// Create a board owned by `author`'s organization.
    fn create(&self, author: &Identity, title: &str) -> DirectoryResult<BoardRecord>;

    fn get(&self, id: BoardId) -> DirectoryResult<BoardRecord>;

    /// Rename a board of the caller's organization.
    fn rename(&self, caller: &Identity, id: BoardId, title: &str) -> DirectoryResult<BoardRecord>;

    /// Remove a board of the caller's organization, and every favourite of it.
    fn remove(&self, caller: &Identity, id: BoardId) -> DirectoryResult<()>;

    /// Boards matching `query`, newest first. `viewer` decides the favourite flag.
    fn list(&self, viewer: &str, query: &BoardQuery) -> DirectoryResult<Vec<BoardListing>>;

    fn favourite(&self, caller: &Identity, id: BoardId) -> DirectoryResult<()>;

    fn unfavourite(&self, caller: &Identity, id: BoardId) -> DirectoryResult<()>;
}

fn validate_title(title: &str) -> DirectoryResult<String> {
    let title = title.trim();
    if title.is_empty() {
        return Err(DirectoryError::InvalidTitle("title is empty".to_string()));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(DirectoryError::InvalidTitle(format!(
            "title is longer than {MAX_TITLE_LEN} characters"
        )));
    }
    Ok(title.to_string())
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[derive(Debug, Default)]
struct DirectoryState {
    boards: HashMap<BoardId, BoardRecord>,
    /// (user id, board id) pairs.
    favourites: HashSet<(String, BoardId)>,
    /// Creation counter, breaks ties between boards created in the same millisecond.
    sequence: HashMap<BoardId, u64>,
    next_sequence: u64,
}

impl DirectoryState {
    fn owned(&self, caller: &Identity, id: BoardId) -> DirectoryResult<&BoardRecord> {
        let board = self.boards.get(&id).ok_or(DirectoryError::NotFound(id))?;
        if board.org_id != caller.org_id {
            return Err(DirectoryError::Forbidden(id));
        }
        Ok(board)
    }
}

/// On-disk form of a directory.
#[derive(Debug, Default, Serialize, Deserialize)]
struct DirectoryFile {
    /// Boards in creation order.
    #[serde(default)]
    boards: Vec<BoardRecord>,
    /// (user id, board id) pairs.
    #[serde(default)]
    favourites: Vec<(String, BoardId)>,
}

/// In-memory board directory.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    state: RwLock<DirectoryState>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an existing record (used to seed directories from configuration).
    pub fn insert(&self, board: BoardRecord) -> DirectoryResult<()> {
        let mut state = self.write()?;
        let seq = state.next_sequence;
        state.next_sequence += 1;
        state.sequence.insert(board.id, seq);
        state.boards.insert(board.id, board);
        Ok(())
    }

    /// Number of boards across every organization.
    pub fn len(&self) -> usize {
        self.read().map(|state| state.boards.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn export(&self) -> DirectoryResult<DirectoryFile> {
        let state = self.read()?;
        let mut boards: Vec<&BoardRecord> = state.boards.values().collect();
        boards.sort_by_key(|b| state.sequence.get(&b.id).copied().unwrap_or_default());
        let mut favourites: Vec<(String, BoardId)> = state.favourites.iter().cloned().collect();
        favourites.sort();
        Ok(DirectoryFile {
            boards: boards.into_iter().cloned().collect(),
            favourites,
        })
    }

    fn import(file: DirectoryFile) -> DirectoryResult<Self> {
        let directory = Self::new();
        for board in file.boards {
            directory.insert(board)?;
        }
        {
            let mut state = directory.write()?;
            for (user, board) in file.favourites {
                if state.boards.contains_key(&board) {
                    state.favourites.insert((user, board));
                }
            }
        }
        Ok(directory)
    }

    fn read(&self) -> DirectoryResult<std::sync::RwLockReadGuard<'_, DirectoryState>> {
        self.state
            .read()
            .map_err(|e| DirectoryError::Other(format!("Lock error: {}", e)))
    }

    fn write(&self) -> DirectoryResult<std::sync::RwLockWriteGuard<'_, DirectoryState>> {
        self.state
            .write()
            .map_err(|e| DirectoryError::Other(format!("Lock error: {}", e)))
    }
}

impl BoardDirectory for MemoryDirectory {
    fn create(&self, author: &Identity, title: &str) -> DirectoryResult<BoardRecord> {
        let title = validate_title(title)?;
        let id = Uuid::new_v4();
        let placeholder = id.as_u128() % PLACEHOLDER_COUNT + 1;
        let board = BoardRecord {
            id,
            title,
            org_id: author.org_id.clone(),
            author_id: author.user_id.clone(),
            author_name: author.name.clone(),
            image_url: format!("/placeholders/{placeholder}.svg"),
            created: now_millis(),
        };
        self.insert(board.clone())?;
        log::info!("created board {} in org {}", board.id, board.org_id);
        Ok(board)
    }

    fn get(&self, id: BoardId) -> DirectoryResult<BoardRecord> {
        self.read()?
            .boards
            .get(&id)
            .cloned()
            .ok_or(DirectoryError::NotFound(id))
    }

    fn rename(&self, caller: &Identity, id: BoardId, title: &str) -> DirectoryResult<BoardRecord> {
        let title = validate_title(title)?;
        let mut state = self.write()?;
        state.owned(caller, id)?;
        let board = state.boards.get_mut(&id).ok_or(DirectoryError::NotFound(id))?;
        board.title = title;
        Ok(board.clone())
    }

    fn remove(&self, caller: &Identity, id: BoardId) -> DirectoryResult<()> {
        let mut state = self.write()?;
        state.owned(caller, id)?;
        state.boards.remove(&id);
        state.sequence.remove(&id);
        state.favourites.retain(|(_, board)| *board != id);
        log::info!("removed board {}", id);
        Ok(())
    }

    fn list(&self, viewer: &str, query: &BoardQuery) -> DirectoryResult<Vec<BoardListing>> {
        let state = self.read()?;
        let search = query
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);

        let mut boards: Vec<&BoardRecord> = state
            .boards
            .values()
            .filter(|b| b.org_id == query.org_id)
            .filter(|b| match &search {
                Some(needle) => b.title.to_lowercase().contains(needle),
                None => true,
            })
            .filter(|b| match &query.favourites_of {
                Some(user) => state.favourites.contains(&(user.clone(), b.id)),
                None => true,
            })
            .collect();

        boards.sort_by(|a, b| {
            let seq = |id: &BoardId| state.sequence.get(id).copied().unwrap_or_default();
            b.created
                .cmp(&a.created)
                .then_with(|| seq(&b.id).cmp(&seq(&a.id)))
        });

        Ok(boards
            .into_iter()
            .map(|board| BoardListing {
                is_favourite: state.favourites.contains(&(viewer.to_string(), board.id)),
                board: board.clone(),
            })
            .collect())
    }

    fn favourite(&self, caller: &Identity, id: BoardId) -> DirectoryResult<()> {
        let mut state = self.write()?;
        state.owned(caller, id)?;
        state.favourites.insert((caller.user_id.clone(), id));
        Ok(())
    }

    fn unfavourite(&self, caller: &Identity, id: BoardId) -> DirectoryResult<()> {
        let mut state = self.write()?;
        state.owned(caller, id)?;
        state.favourites.remove(&(caller.user_id.clone(), id));
        Ok(())
    }
}

/// Default file name of a persisted directory, relative to the data directory.
pub const DIRECTORY_FILE: &str = "directory.json";

/// Board directory persisted as one JSON file.
///
/// Every change rewrites the whole file.
pub struct FileDirectory {
    inner: MemoryDirectory,
    path: PathBuf,
    /// Held across a change and the write that follows it.
    writing: Mutex<()>,
}

impl FileDirectory {
    /// Open the directory stored at `path`. A missing file opens empty.
    pub fn open(path: impl Into<PathBuf>) -> DirectoryResult<Self> {
        let path = path.into();
        let inner = if path.exists() {
            let json = fs::read_to_string(&path).map_err(|e| {
                DirectoryError::Other(format!("Failed to read {}: {}", path.display(), e))
            })?;
            let file: DirectoryFile = serde_json::from_str(&json).map_err(|e| {
                DirectoryError::Other(format!("Failed to parse {}: {}", path.display(), e))
            })?;
            MemoryDirectory::import(file)?
        } else {
            MemoryDirectory::new()
        };
        Ok(Self {
            inner,
            path,
            writing: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    fn persist(&self) -> DirectoryResult<()> {
        let json = serde_json::to_string_pretty(&self.inner.export()?)
            .map_err(|e| DirectoryError::Other(format!("Failed to encode directory: {}", e)))?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                DirectoryError::Other(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)
            .map_err(|e| DirectoryError::Other(format!("Failed to write {}: {}", tmp.display(), e)))?;
        fs::rename(&tmp, &self.path).map_err(|e| {
            DirectoryError::Other(format!("Failed to write {}: {}", self.path.display(), e))
        })
    }

    fn change<T>(&self, apply: impl FnOnce(&MemoryDirectory) -> DirectoryResult<T>) -> DirectoryResult<T> {
        let _writing = self
            .writing
            .lock()
            .map_err(|e| DirectoryError::Other(format!("Lock error: {}", e)))?;
        let result = apply(&self.inner)?;
        self.persist()?;
        Ok(result)
    }
}

impl BoardDirectory for FileDirectory {
    fn create(&self, author: &Identity, title: &str) -> DirectoryResult<BoardRecord> {
        self.change(|d| d.create(author, title))
    }

    fn get(&self, id: BoardId) -> DirectoryResult<BoardRecord> {
        self.inner.get(id)
    }

    fn rename(&self, caller: &Identity, id: BoardId, title: &str) -> DirectoryResult<BoardRecord> {
        self.change(|d| d.rename(caller, id, title))
    }

    fn remove(&self, caller: &Identity, id: BoardId) -> DirectoryResult<()> {
        self.change(|d| d.remove(caller, id))
    }

    fn list(&self, viewer: &str, query: &BoardQuery) -> DirectoryResult<Vec<BoardListing>> {
        self.inner.list(viewer, query)
    }

    fn favourite(&self, caller: &Identity, id: BoardId) -> DirectoryResult<()> {
        self.change(|d| d.favourite(caller, id))
    }

    fn unfavourite(&self, caller: &Identity, id: BoardId) -> DirectoryResult<()> {
        self.change(|d| d.unfavourite(caller, id))
    }
}
