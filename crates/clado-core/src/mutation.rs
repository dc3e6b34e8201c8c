//! Mutations: serializable commands that edit the shared document.
//!
//! A mutation is planned against the current store, which yields the changes
//! to apply and the changes that would revert them. The collaboration layer
//! applies the forward changes as one local delta and hands both halves to the
//! history.

use crate::crdt::{Change, DocumentStore};
use crate::layer::{EdgeId, FieldValue, Layer, LayerId, Rgb};
use kurbo::{Point, Rect};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Errors raised when issuing a mutation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MutationError {
    #[error("no active board session")]
    Context,
}

/// A command against the shared document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Mutation {
    /// Add a layer on top of the paint order.
    InsertLayer { layer: Layer },
    /// Move layers to absolute top-left positions.
    SetPositions { positions: Vec<(LayerId, Point)> },
    /// Replace the bounds of one layer.
    SetBounds { id: LayerId, bounds: Rect },
    /// Change the fill colour of a set of layers.
    SetFill { ids: Vec<LayerId>, fill: Rgb },
    /// Change the text content of a layer.
    SetValue { id: LayerId, value: Option<String> },
    DeleteLayers { ids: Vec<LayerId> },
    BringToFront { ids: Vec<LayerId> },
    SendToBack { ids: Vec<LayerId> },
    /// Connect two layers with a new edge.
    Connect { source: LayerId, target: LayerId },
    Disconnect { id: EdgeId },
    /// Change the local selection. Routed to presence, never to the document.
    Select { ids: Vec<LayerId> },
}

impl Mutation {
    /// Whether this mutation edits the shared document.
    pub fn touches_document(&self) -> bool {
        !matches!(self, Mutation::Select { .. })
    }
}

/// Forward and inverse changes for one mutation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
    pub changes: Vec<Change>,
    pub inverse: Vec<Change>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    fn set(&mut self, before: &Layer, value: FieldValue) {
        let field = value.field();
        let previous = before.field(field);
        if previous == value {
            return;
        }
        self.changes.push(Change::Set {
            id: before.id(),
            value,
        });
        self.inverse.push(Change::Set {
            id: before.id(),
            value: previous,
        });
    }
}

/// Plan `mutation` against the current state of `store`.
///
/// Layers or edges that are not live are skipped, so mutating a missing layer
/// plans nothing.
pub fn plan(store: &DocumentStore, mutation: &Mutation) -> Plan {
    let mut plan = Plan::default();

    match mutation {
        // Ids already in the store, tombstones included, are never reused.
        Mutation::InsertLayer { layer } if store.is_known(layer.id()) => {}
        Mutation::InsertLayer { layer } => {
            let mut layer = layer.clone();
            layer.rank = store.front_rank();
            plan.changes = Change::create_layer(&layer);
            plan.inverse = vec![Change::Delete { id: layer.id() }];
        }
        Mutation::SetPositions { positions } => {
            for (id, point) in positions {
                if let Some(before) = store.get(*id) {
                    plan.set(&before, FieldValue::X(point.x));
                    plan.set(&before, FieldValue::Y(point.y));
                }
            }
        }
        Mutation::SetBounds { id, bounds } => {
            if let Some(before) = store.get(*id) {
                let bounds = bounds.abs();
                plan.set(&before, FieldValue::X(bounds.x0));
                plan.set(&before, FieldValue::Y(bounds.y0));
                plan.set(&before, FieldValue::Width(bounds.width()));
                plan.set(&before, FieldValue::Height(bounds.height()));
            }
        }
        Mutation::SetFill { ids, fill } => {
            for id in ids {
                if let Some(before) = store.get(*id) {
                    plan.set(&before, FieldValue::Fill(*fill));
                }
            }
        }
        Mutation::SetValue { id, value } => {
            if let Some(before) = store.get(*id) {
                plan.set(&before, FieldValue::Value(value.clone()));
            }
        }
        Mutation::DeleteLayers { ids } => {
            for id in ids {
                let Some(before) = store.get(*id) else {
                    continue;
                };
                plan.changes.push(Change::Delete { id: *id });
                // Re-creating with the same id brings back every field.
                plan.inverse.extend(Change::create_layer(&before));
                for edge in store.edges() {
                    if edge.source == *id || edge.target == *id {
                        plan.inverse.push(Change::Connect {
                            id: edge.id(),
                            source: edge.source,
                            target: edge.target,
                        });
                    }
                }
            }
        }
        Mutation::BringToFront { ids } => {
            let mut rank = store.front_rank();
            for id in store.z_order().into_iter().filter(|id| ids.contains(id)) {
                if let Some(before) = store.get(id) {
                    plan.set(&before, FieldValue::Rank(rank));
                    rank += 1.0;
                }
            }
        }
        Mutation::SendToBack { ids } => {
            let mut rank = store.back_rank();
            for id in store.z_order().into_iter().rev().filter(|id| ids.contains(id)) {
                if let Some(before) = store.get(id) {
                    plan.set(&before, FieldValue::Rank(rank));
                    rank -= 1.0;
                }
            }
        }
        Mutation::Connect { source, target } => {
            if source != target && store.contains(*source) && store.contains(*target) {
                let id = Uuid::new_v4();
                plan.changes.push(Change::Connect {
                    id,
                    source: *source,
                    target: *target,
                });
                plan.inverse.push(Change::Disconnect { id });
            }
        }
        Mutation::Disconnect { id } => {
            if let Some(edge) = store.edge(*id) {
                plan.changes.push(Change::Disconnect { id: *id });
                plan.inverse.push(Change::Connect {
                    id: *id,
                    source: edge.source,
                    target: edge.target,
                });
            }
        }
        Mutation::Select { .. } => {}
    }

    plan
}
