//! Conflict-free replicated layer store.
//!
//! The board document is a map from `(layer id, field)` to `(value, stamp)`.
//!
//! # Schema
//!
//! ```text
//! DocumentStore
//! ├── layers: LayerId → { created: (kind, stamp), deleted: stamp, fields: field → (value, stamp) }
//! └── edges:  EdgeId  → { created: (source, target, stamp), deleted: stamp }
//! ```
//!
//! Merge rules:
//! - each field is a last-write-wins register keyed by a Lamport [`Stamp`];
//! - a delete leaves a tombstone that drops every older write to that layer;
//! - a create newer than the tombstone brings the layer back;
//! - a layer keeps the kind of its first create;
//! - paint order is the `rank` field, ties broken by id.

mod clock;
mod op;
mod store;

pub use clock::{LamportClock, MAX_COUNTER, PeerId, Stamp, random_peer_id};
pub use op::{Change, Delta, Op};
pub use store::{DocumentStore, MergeReport};
