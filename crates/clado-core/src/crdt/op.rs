//! Change, operation and delta types exchanged between replicas.

use super::clock::{PeerId, Stamp};
use crate::layer::{EdgeId, FieldValue, Layer, LayerId, LayerKind};
use serde::{Deserialize, Serialize};

/// An unstamped edit to the shared document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Change {
    /// Bring a layer into existence. Its fields arrive as `Set` changes.
    Create { id: LayerId, kind: LayerKind },
    /// Write one field of a layer.
    Set { id: LayerId, value: FieldValue },
    /// Remove a layer (leaves a tombstone).
    Delete { id: LayerId },
    /// Connect two layers.
    Connect {
        id: EdgeId,
        source: LayerId,
        target: LayerId,
    },
    /// Remove an edge.
    Disconnect { id: EdgeId },
}

impl Change {
    /// The changes that create `layer` with all of its current field values.
    pub fn create_layer(layer: &Layer) -> Vec<Change> {
        let mut changes = Vec::with_capacity(8);
        changes.push(Change::Create {
            id: layer.id(),
            kind: layer.kind(),
        });
        for value in layer.fields() {
            changes.push(Change::Set {
                id: layer.id(),
                value,
            });
        }
        changes
    }

    /// Id of the layer or edge this change touches.
    pub fn target(&self) -> uuid::Uuid {
        match self {
            Change::Create { id, .. }
            | Change::Set { id, .. }
            | Change::Delete { id }
            | Change::Connect { id, .. }
            | Change::Disconnect { id } => *id,
        }
    }
}

/// A change with the stamp it was committed under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Op {
    pub stamp: Stamp,
    pub change: Change,
}

/// A batch of operations applied atomically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    /// Replica that produced the delta.
    pub origin: PeerId,
    pub ops: Vec<Op>,
}

impl Delta {
    pub fn empty(origin: PeerId) -> Self {
        Self {
            origin,
            ops: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::{LayerField, Rgb};
    use kurbo::Point;

    #[test]
    fn test_create_layer_changes() {
        let layer = Layer::placed(LayerKind::Note, Point::new(0.0, 0.0));
        let changes = Change::create_layer(&layer);
        assert_eq!(changes.len(), 1 + LayerField::ALL.len());
        assert!(matches!(changes[0], Change::Create { kind: LayerKind::Note, .. }));
        assert!(changes.iter().all(|c| c.target() == layer.id()));
    }

    #[test]
    fn test_op_wire_format() {
        let id = uuid::Uuid::nil();
        let op = Op {
            stamp: Stamp::new(3, 7),
            change: Change::Set {
                id,
                value: FieldValue::Fill(Rgb::new(1, 2, 3)),
            },
        };
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["change"]["op"], "set");
        assert_eq!(json["change"]["value"]["field"], "fill");
        assert_eq!(json["change"]["value"]["value"]["r"], 1);
        assert_eq!(json["stamp"]["counter"], 3);

        let back: Op = serde_json::from_value(json).unwrap();
        assert_eq!(back, op);
    }
}
