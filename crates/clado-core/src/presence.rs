//! Presence: ephemeral per-client state (cursor, selection, colour).
//!
//! Each client is the only writer of its own record. Records are not part of
//! the shared document: they are broadcast at most once, never persisted, and
//! vanish when their peer disconnects.

use crate::crdt::PeerId;
use crate::layer::{LayerId, Rgb};
use crate::session::SessionGrant;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Colours assigned to collaborators, indexed by peer id.
pub const PRESENCE_PALETTE: [Rgb; 5] = [
    Rgb::new(0xdc, 0x26, 0x26),
    Rgb::new(0xd9, 0x77, 0x06),
    Rgb::new(0x05, 0x96, 0x69),
    Rgb::new(0x7c, 0x3a, 0xed),
    Rgb::new(0xdb, 0x27, 0x77),
];

/// Display colour for a peer.
pub fn peer_color(peer: PeerId) -> Rgb {
    PRESENCE_PALETTE[(peer % PRESENCE_PALETTE.len() as u64) as usize]
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CursorPosition {
    pub x: f64,
    pub y: f64,
}

impl From<kurbo::Point> for CursorPosition {
    fn from(p: kurbo::Point) -> Self {
        Self { x: p.x, y: p.y }
    }
}

/// Presence of one collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub peer: PeerId,
    pub user_id: String,
    pub name: String,
    pub color: Rgb,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<CursorPosition>,
    #[serde(default)]
    pub selection: Vec<LayerId>,
}

impl PresenceRecord {
    /// Initial record for the holder of `grant`.
    pub fn from_grant(grant: &SessionGrant) -> Self {
        let identity = grant.identity();
        Self {
            peer: grant.peer(),
            user_id: identity.user_id.clone(),
            name: identity.display_name().to_string(),
            color: peer_color(grant.peer()),
            cursor: None,
            selection: Vec::new(),
        }
    }

    /// Merge the fields present in `update`.
    pub fn apply(&mut self, update: &PresenceUpdate) {
        match update.cursor {
            Some(CursorUpdate::At(position)) => self.cursor = Some(position),
            Some(CursorUpdate::Hidden) => self.cursor = None,
            None => {}
        }
        if let Some(selection) = &update.selection {
            self.selection = selection.clone();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CursorUpdate {
    At(CursorPosition),
    /// Pointer left the canvas.
    Hidden,
}

/// Partial presence change. Absent fields are left as they are.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PresenceUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<CursorUpdate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection: Option<Vec<LayerId>>,
}

impl PresenceUpdate {
    pub fn cursor(position: impl Into<CursorPosition>) -> Self {
        Self {
            cursor: Some(CursorUpdate::At(position.into())),
            selection: None,
        }
    }

    pub fn hide_cursor() -> Self {
        Self {
            cursor: Some(CursorUpdate::Hidden),
            selection: None,
        }
    }

    pub fn selection(ids: Vec<LayerId>) -> Self {
        Self {
            cursor: None,
            selection: Some(ids),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cursor.is_none() && self.selection.is_none()
    }

    /// Fold a later update into this one.
    pub fn merge(&mut self, later: &PresenceUpdate) {
        if later.cursor.is_some() {
            self.cursor = later.cursor;
        }
        if later.selection.is_some() {
            self.selection = later.selection.clone();
        }
    }
}

/// Local record plus the last known records of every other peer.
#[derive(Debug, Clone, Default)]
pub struct PresenceMap {
    local: Option<PresenceRecord>,
    others: HashMap<PeerId, PresenceRecord>,
}

impl PresenceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn local(&self) -> Option<&PresenceRecord> {
        self.local.as_ref()
    }

    /// Install the local record (on join).
    pub fn set_local(&mut self, record: PresenceRecord) {
        self.others.remove(&record.peer);
        self.local = Some(record);
    }

    /// Merge `update` into the local record. Returns the updated record, or
    /// `None` when there is no local record yet.
    pub fn update_local(&mut self, update: &PresenceUpdate) -> Option<&PresenceRecord> {
        let local = self.local.as_mut()?;
        local.apply(update);
        Some(local)
    }

    /// Store a record received from another peer. Records claiming to be the
    /// local peer are ignored.
    pub fn apply_remote(&mut self, record: PresenceRecord) {
        if self.local.as_ref().is_some_and(|l| l.peer == record.peer) {
            return;
        }
        self.others.insert(record.peer, record);
    }

    pub fn remove(&mut self, peer: PeerId) -> Option<PresenceRecord> {
        self.others.remove(&peer)
    }

    /// Drop every remote record (connection lost).
    pub fn clear_others(&mut self) {
        self.others.clear();
    }

    /// Forget everything, including the local record.
    pub fn clear(&mut self) {
        self.local = None;
        self.others.clear();
    }

    /// Records of all peers except the local one, ordered by peer id.
    pub fn others(&self) -> Vec<PresenceRecord> {
        let mut others: Vec<PresenceRecord> = self.others.values().cloned().collect();
        others.sort_by_key(|r| r.peer);
        others
    }

    pub fn get(&self, peer: PeerId) -> Option<&PresenceRecord> {
        self.others.get(&peer)
    }
}
