//! Session authorization.
//!
//! A session grants one identity access to exactly one board. Access is
//! granted only when the board belongs to the identity's organization;
//! every other outcome fails closed.

use crate::crdt::PeerId;
use crate::directory::{BoardDirectory, BoardId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Display name used when an identity carries none.
pub const DEFAULT_DISPLAY_NAME: &str = "Teammate";

/// Session errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("Authorization denied: {0}")]
    AuthorizationDenied(String),
    #[error("Identity configuration error: {0}")]
    Config(String),
}

/// An authenticated user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub org_id: String,
    #[serde(default)]
    pub name: String,
}

impl Identity {
    /// Name shown to other collaborators.
    pub fn display_name(&self) -> &str {
        let name = self.name.trim();
        if name.is_empty() { DEFAULT_DISPLAY_NAME } else { name }
    }
}

/// Resolves bearer tokens to identities.
pub trait IdentityProvider: Send + Sync {
    fn verify(&self, token: &str) -> Option<Identity>;
}

/// Token table held in memory.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentityProvider {
    tokens: HashMap<String, Identity>,
}

impl StaticIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: impl Into<String>, identity: Identity) -> Self {
        self.insert(token, identity);
        self
    }

    pub fn insert(&mut self, token: impl Into<String>, identity: Identity) {
        self.tokens.insert(token.into(), identity);
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Parse a JSON object mapping tokens to identities.
    pub fn from_json(json: &str) -> Result<Self, SessionError> {
        let tokens: HashMap<String, Identity> =
            serde_json::from_str(json).map_err(|e| SessionError::Config(e.to_string()))?;
        Ok(Self { tokens })
    }

    /// Load a token table from a JSON file.
    pub fn load(path: &Path) -> Result<Self, SessionError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| SessionError::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_json(&json)
    }
}

impl IdentityProvider for StaticIdentityProvider {
    fn verify(&self, token: &str) -> Option<Identity> {
        self.tokens.get(token).cloned()
    }
}

/// Proof that an identity may edit one board.
///
/// Only [`open_session`] creates grants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionGrant {
    board_id: BoardId,
    identity: Identity,
    peer: PeerId,
}

impl SessionGrant {
    pub fn board_id(&self) -> BoardId {
        self.board_id
    }

    pub fn org_id(&self) -> &str {
        &self.identity.org_id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Replica id the grant was issued to.
    pub fn peer(&self) -> PeerId {
        self.peer
    }

    #[cfg(test)]
    pub(crate) fn for_test(board_id: BoardId, identity: Identity, peer: PeerId) -> Self {
        Self {
            board_id,
            identity,
            peer,
        }
    }
}

/// Authorize `token` to edit `board_id` as replica `peer`.
pub fn open_session(
    provider: &dyn IdentityProvider,
    directory: &dyn BoardDirectory,
    token: &str,
    board_id: BoardId,
    peer: PeerId,
) -> Result<SessionGrant, SessionError> {
    let identity = provider
        .verify(token)
        .ok_or_else(|| SessionError::AuthorizationDenied("unknown token".to_string()))?;

    let board = directory.get(board_id).map_err(|_| {
        SessionError::AuthorizationDenied(format!("board {board_id} does not exist"))
    })?;

    if board.org_id != identity.org_id {
        log::warn!(
            "denied {} access to board {}: organization mismatch",
            identity.user_id,
            board_id
        );
        return Err(SessionError::AuthorizationDenied(format!(
            "board {board_id} belongs to another organization"
        )));
    }

    Ok(SessionGrant {
        board_id,
        identity,
        peer,
    })
}
