//! Clado Core Library
//!
//! Replicated board document, local editing model and client side of the
//! Clado collaboration protocol.

pub mod canvas;
pub mod collaboration;
pub mod crdt;
pub mod directory;
pub mod history;
pub mod interaction;
pub mod layer;
pub mod mutation;
pub mod presence;
pub mod session;
pub mod snapshot;
pub mod storage;
pub mod sync;

pub use canvas::Canvas;
pub use collaboration::CollaborationManager;
pub use crdt::{Change, Delta, DocumentStore, MergeReport, Op, PeerId, Stamp};
pub use directory::{
    BoardDirectory, BoardId, BoardListing, BoardQuery, BoardRecord, FileDirectory, MemoryDirectory,
};
pub use history::History;
pub use interaction::{CanvasEvent, CanvasState, PointerTarget, ResizeHandle};
pub use layer::{Edge, EdgeId, Layer, LayerId, LayerKind, Rgb};
pub use mutation::{Mutation, MutationError};
pub use presence::{PresenceMap, PresenceRecord, PresenceUpdate};
pub use session::{Identity, IdentityProvider, SessionError, SessionGrant, StaticIdentityProvider, open_session};
pub use snapshot::BoardSnapshot;
pub use storage::{BoardKey, FileStorage, MemoryStorage, Storage, StorageError};
pub use sync::{ClientMessage, ConnectionState, NativeWebSocket, ServerMessage, SyncEvent};
