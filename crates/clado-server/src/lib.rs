//! Clado collaboration server
//!
//! Hosts one replica document per open board and relays deltas and presence
//! between the clients editing it.
//!
//! ## Protocol
//!
//! JSON messages over `/ws`, tagged by `type` (see [`clado_core::sync`]):
//! ```json
//! { "type": "join", "board_id": "…", "token": "…", "peer_id": 42 }
//! { "type": "delta", "delta": { "origin": 42, "ops": [ … ] } }
//! { "type": "presence", "update": { "cursor": { "state": "hidden" } } }
//! ```
//!
//! The board directory is served over HTTP under `/boards`, authorized with
//! `Authorization: Bearer <token>`.

pub mod config;
pub mod room;
pub mod routes;
pub mod state;
pub mod ws;

pub use config::ServerConfig;
pub use routes::app;
pub use state::{AppState, ServerError, autosave_task};
