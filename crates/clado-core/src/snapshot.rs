//! Persisted form of a board: its nodes and edges in paint order.

use crate::crdt::{Change, Delta, DocumentStore};
use crate::layer::{EdgeId, Layer, LayerId, LayerKind, Rgb};
use serde::{Deserialize, Serialize};

/// One persisted layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: LayerId,
    pub kind: LayerKind,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub fill: Rgb,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl From<&Layer> for NodeRecord {
    fn from(layer: &Layer) -> Self {
        Self {
            id: layer.id(),
            kind: layer.kind(),
            x: layer.x,
            y: layer.y,
            width: layer.width,
            height: layer.height,
            fill: layer.fill,
            value: layer.value.clone(),
        }
    }
}

impl NodeRecord {
    fn to_layer(&self, rank: f64) -> Layer {
        let mut layer = Layer::reconstruct(self.id, self.kind);
        layer.x = self.x;
        layer.y = self.y;
        layer.width = self.width;
        layer.height = self.height;
        layer.fill = self.fill;
        layer.value = self.value.clone();
        layer.rank = rank;
        layer
    }
}

/// One persisted edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub id: EdgeId,
    pub source: LayerId,
    pub target: LayerId,
}

/// Serializable board contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoardSnapshot {
    /// Layers, back to front.
    #[serde(default)]
    pub nodes: Vec<NodeRecord>,
    #[serde(default)]
    pub edges: Vec<EdgeRecord>,
    /// Full replica state with write stamps and tombstones.
    ///
    /// Restoring from it keeps last-write-wins ordering across reloads, so a
    /// client rejoining with stale state cannot undo newer writes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replica: Option<Delta>,
}

impl BoardSnapshot {
    /// Capture the live state of a store.
    pub fn from_store(store: &DocumentStore) -> Self {
        Self {
            nodes: store.layers().iter().map(NodeRecord::from).collect(),
            edges: store
                .edges()
                .into_iter()
                .map(|e| EdgeRecord {
                    id: e.id(),
                    source: e.source,
                    target: e.target,
                })
                .collect(),
            replica: Some(store.export()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }

    /// Write the snapshot into `store` as one local delta.
    ///
    /// Paint order is carried by position in `nodes`. Edges whose endpoints
    /// are not in the snapshot are skipped.
    pub fn seed(&self, store: &mut DocumentStore) -> Delta {
        let base = store.front_rank();
        let mut changes = Vec::new();
        for (index, node) in self.nodes.iter().enumerate() {
            changes.extend(Change::create_layer(&node.to_layer(base + index as f64)));
        }
        for edge in &self.edges {
            let known = |id: LayerId| self.nodes.iter().any(|n| n.id == id);
            if known(edge.source) && known(edge.target) {
                changes.push(Change::Connect {
                    id: edge.id,
                    source: edge.source,
                    target: edge.target,
                });
            } else {
                log::warn!("skipping dangling edge {} in snapshot", edge.id);
            }
        }
        store.apply_local(changes)
    }

    /// Load the snapshot into `store`.
    ///
    /// Snapshots that carry a replica are merged with their original stamps.
    /// Older snapshots without one are seeded as fresh writes. Nothing is left
    /// in the outbox either way.
    pub fn restore(&self, store: &mut DocumentStore) {
        match &self.replica {
            Some(replica) => {
                store.apply_remote(replica);
            }
            None => {
                self.seed(store);
                store.clear_outgoing();
            }
        }
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
