//! Storage abstraction for board persistence.

mod autosave;
mod file;
mod memory;

pub use autosave::{AutoSaveManager, DEFAULT_AUTOSAVE_INTERVAL_SECS, create_default_storage};
pub use file::FileStorage;
pub use memory::MemoryStorage;

use crate::directory::BoardId;
use crate::snapshot::BoardSnapshot;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Board not found: {0}")]
    NotFound(BoardKey),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Storage error: {0}")]
    Other(String),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Boxed future for storage operations.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Address of one persisted board.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BoardKey {
    pub org_id: String,
    pub board_id: BoardId,
}

impl BoardKey {
    pub fn new(org_id: impl Into<String>, board_id: BoardId) -> Self {
        Self {
            org_id: org_id.into(),
            board_id,
        }
    }
}

impl fmt::Display for BoardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.org_id, self.board_id)
    }
}

/// Trait for board storage backends.
///
/// Implementations can keep snapshots in memory or on the filesystem.
pub trait Storage: Send + Sync {
    /// Save a board snapshot, replacing any previous one.
    fn save(&self, key: &BoardKey, snapshot: &BoardSnapshot) -> BoxFuture<'_, StorageResult<()>>;

    /// Load a board snapshot.
    fn load(&self, key: &BoardKey) -> BoxFuture<'_, StorageResult<BoardSnapshot>>;

    /// Delete a board snapshot. Deleting a missing board is not an error.
    fn delete(&self, key: &BoardKey) -> BoxFuture<'_, StorageResult<()>>;

    /// List the boards stored for an organization.
    fn list(&self, org_id: &str) -> BoxFuture<'_, StorageResult<Vec<BoardId>>>;

    /// Check if a board snapshot exists.
    fn exists(&self, key: &BoardKey) -> BoxFuture<'_, StorageResult<bool>>;
}

#[cfg(test)]
pub(crate) fn block_on<F: std::future::Future>(f: F) -> F::Output {
    use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

    fn dummy_raw_waker() -> RawWaker {
        fn no_op(_: *const ()) {}
        fn clone(_: *const ()) -> RawWaker {
            dummy_raw_waker()
        }
        static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, no_op, no_op, no_op);
        RawWaker::new(std::ptr::null(), &VTABLE)
    }

    let waker = unsafe { Waker::from_raw(dummy_raw_waker()) };
    let mut cx = Context::from_waker(&waker);
    let mut f = std::pin::pin!(f);

    loop {
        if let Poll::Ready(result) = f.as_mut().poll(&mut cx) {
            return result;
        }
    }
}
