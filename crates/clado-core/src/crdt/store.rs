//! Replicated layer store.

use super::clock::{LamportClock, PeerId, Stamp, random_peer_id};
use super::op::{Change, Delta, Op};
use crate::layer::{Edge, EdgeId, FieldValue, Layer, LayerField, LayerId, LayerKind};
use kurbo::{Point, Rect};
use std::collections::{BTreeMap, HashMap};

/// A field value together with the stamp of the write that produced it.
#[derive(Debug, Clone)]
struct Register {
    value: FieldValue,
    stamp: Stamp,
}

/// Everything the store knows about one layer id, including tombstones.
#[derive(Debug, Clone, Default)]
struct LayerEntry {
    /// Kind and stamp of the newest create.
    created: Option<(LayerKind, Stamp)>,
    /// Stamp of the newest delete.
    deleted: Option<Stamp>,
    fields: BTreeMap<LayerField, Register>,
}

impl LayerEntry {
    fn is_live(&self) -> bool {
        match (self.created, self.deleted) {
            (Some((_, created)), Some(deleted)) => created > deleted,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    fn materialize(&self, id: LayerId) -> Option<Layer> {
        if !self.is_live() {
            return None;
        }
        let (kind, _) = self.created?;
        let mut layer = Layer::reconstruct(id, kind);
        for register in self.fields.values() {
            layer.apply(&register.value);
        }
        Some(layer)
    }
}

#[derive(Debug, Clone, Default)]
struct EdgeEntry {
    /// Endpoints and stamp of the newest connect.
    created: Option<(LayerId, LayerId, Stamp)>,
    deleted: Option<Stamp>,
}

impl EdgeEntry {
    fn is_live(&self) -> bool {
        match (self.created, self.deleted) {
            (Some((_, _, created)), Some(deleted)) => created > deleted,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}

/// Outcome of merging a remote delta.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Operations that changed or confirmed state.
    pub applied: usize,
    /// Operations superseded by a newer write or tombstone, or rejected as
    /// malformed.
    pub dropped: usize,
}

/// The shared document: a field-level last-write-wins map of layers plus a
/// set of edges, both with tombstones.
///
/// Local writes are applied immediately and queued in an outbox; remote
/// deltas are merged with [`DocumentStore::apply_remote`]. Every operation is
/// a value write, so applying a delta more than once is harmless.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    clock: LamportClock,
    layers: HashMap<LayerId, LayerEntry>,
    edges: HashMap<EdgeId, EdgeEntry>,
    /// Local deltas not yet handed to the transport.
    outbox: Vec<Delta>,
}

impl Default for DocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentStore {
    /// Create an empty store with a random peer id.
    pub fn new() -> Self {
        Self::with_peer(random_peer_id())
    }

    /// Create an empty store for a specific peer.
    pub fn with_peer(peer: PeerId) -> Self {
        Self {
            clock: LamportClock::new(peer),
            layers: HashMap::new(),
            edges: HashMap::new(),
            outbox: Vec::new(),
        }
    }

    pub fn peer_id(&self) -> PeerId {
        self.clock.peer()
    }

    /// Highest logical time this replica has seen.
    pub fn version(&self) -> u64 {
        self.clock.current()
    }

    // --- Reads ---

    /// Get a live layer by id.
    pub fn get(&self, id: LayerId) -> Option<Layer> {
        self.layers.get(&id)?.materialize(id)
    }

    pub fn contains(&self, id: LayerId) -> bool {
        self.layers.get(&id).is_some_and(LayerEntry::is_live)
    }

    /// Whether `id` was ever created or deleted here, tombstones included.
    pub fn is_known(&self, id: LayerId) -> bool {
        self.layers.contains_key(&id)
    }

    /// Number of live layers.
    pub fn len(&self) -> usize {
        self.layers.values().filter(|e| e.is_live()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live layers in paint order (back to front).
    pub fn list(&self) -> Vec<(LayerId, Layer)> {
        let mut layers: Vec<(LayerId, Layer)> = self
            .layers
            .iter()
            .filter_map(|(&id, entry)| entry.materialize(id).map(|layer| (id, layer)))
            .collect();
        layers.sort_by(|(a_id, a), (b_id, b)| a.rank.total_cmp(&b.rank).then_with(|| a_id.cmp(b_id)));
        layers
    }

    /// Live layers in paint order, without ids.
    pub fn layers(&self) -> Vec<Layer> {
        self.list().into_iter().map(|(_, layer)| layer).collect()
    }

    /// Live layer ids in paint order.
    pub fn z_order(&self) -> Vec<LayerId> {
        self.list().into_iter().map(|(id, _)| id).collect()
    }

    /// Live edges whose endpoints are both live, ordered by id.
    pub fn edges(&self) -> Vec<Edge> {
        let mut edges: Vec<Edge> = self
            .edges
            .iter()
            .filter(|(_, entry)| entry.is_live())
            .filter_map(|(&id, entry)| {
                let (source, target, _) = entry.created?;
                (self.contains(source) && self.contains(target))
                    .then(|| Edge::reconstruct(id, source, target))
            })
            .collect();
        edges.sort_by_key(|e| e.id);
        edges
    }

    /// Get a live edge by id.
    pub fn edge(&self, id: EdgeId) -> Option<Edge> {
        self.edges().into_iter().find(|e| e.id == id)
    }

    /// Topmost layer under a point.
    pub fn layer_at(&self, point: Point) -> Option<LayerId> {
        self.list()
            .into_iter()
            .rev()
            .find(|(_, layer)| layer.hit_test(point))
            .map(|(id, _)| id)
    }

    /// Layers whose bounds intersect `rect`, in paint order.
    pub fn layers_in_rect(&self, rect: Rect) -> Vec<LayerId> {
        self.list()
            .into_iter()
            .filter(|(_, layer)| rect.intersect(layer.bounds()).area() > 0.0)
            .map(|(id, _)| id)
            .collect()
    }

    /// Rank that places a layer above every live layer.
    pub fn front_rank(&self) -> f64 {
        self.list().last().map_or(0.0, |(_, l)| l.rank + 1.0)
    }

    /// Rank that places a layer below every live layer.
    pub fn back_rank(&self) -> f64 {
        self.list().first().map_or(0.0, |(_, l)| l.rank - 1.0)
    }

    // --- Local writes ---

    /// Insert a layer on top of the paint order.
    pub fn insert(&mut self, layer: &Layer) -> Delta {
        let mut layer = layer.clone();
        layer.rank = self.front_rank();
        self.apply_local(Change::create_layer(&layer))
    }

    /// Write one field of a live layer. Missing layers are ignored.
    pub fn set(&mut self, id: LayerId, value: FieldValue) -> Delta {
        if !self.contains(id) {
            return Delta::empty(self.peer_id());
        }
        self.apply_local(vec![Change::Set { id, value }])
    }

    /// Delete a live layer. Missing layers are ignored.
    pub fn delete(&mut self, id: LayerId) -> Delta {
        if !self.contains(id) {
            return Delta::empty(self.peer_id());
        }
        self.apply_local(vec![Change::Delete { id }])
    }

    /// Connect two live layers.
    pub fn connect(&mut self, source: LayerId, target: LayerId) -> Delta {
        if !self.contains(source) || !self.contains(target) {
            return Delta::empty(self.peer_id());
        }
        let edge = Edge::new(source, target);
        self.apply_local(vec![Change::Connect {
            id: edge.id,
            source,
            target,
        }])
    }

    /// Bring a layer to the front (top of paint order).
    pub fn bring_to_front(&mut self, id: LayerId) -> Delta {
        let rank = self.front_rank();
        self.set(id, FieldValue::Rank(rank))
    }

    /// Send a layer to the back (bottom of paint order).
    pub fn send_to_back(&mut self, id: LayerId) -> Delta {
        let rank = self.back_rank();
        self.set(id, FieldValue::Rank(rank))
    }

    /// Stamp `changes` with a single fresh stamp, apply them and queue the
    /// resulting delta for broadcast.
    pub fn apply_local(&mut self, changes: Vec<Change>) -> Delta {
        if changes.is_empty() {
            return Delta::empty(self.peer_id());
        }
        let stamp = self.clock.tick();
        let ops: Vec<Op> = changes
            .into_iter()
            .map(|change| Op { stamp, change })
            .collect();
        for op in &ops {
            self.apply_op(op);
        }
        let delta = Delta {
            origin: self.peer_id(),
            ops,
        };
        self.outbox.push(delta.clone());
        delta
    }

    // --- Merging ---

    /// Merge a delta produced by another replica.
    pub fn apply_remote(&mut self, delta: &Delta) -> MergeReport {
        let mut report = MergeReport::default();
        for op in &delta.ops {
            if !op.stamp.is_valid() {
                log::warn!("dropping op from {} with out-of-range stamp {:?}", delta.origin, op.stamp);
                report.dropped += 1;
                continue;
            }
            self.clock.observe(op.stamp);
            if self.apply_op(op) {
                report.applied += 1;
            } else {
                report.dropped += 1;
            }
        }
        if report.dropped > 0 {
            log::debug!(
                "merged delta from {}: {} applied, {} superseded",
                delta.origin,
                report.applied,
                report.dropped
            );
        }
        report
    }

    /// Apply one operation. Returns false when a newer write supersedes it
    /// or it would change the kind of an existing layer.
    fn apply_op(&mut self, op: &Op) -> bool {
        match &op.change {
            Change::Create { id, kind } => {
                let entry = self.layers.entry(*id).or_default();
                match entry.created {
                    Some((existing_kind, _)) if existing_kind != *kind => {
                        log::warn!("ignoring create of {} as {:?}, already a {:?}", id, kind, existing_kind);
                        false
                    }
                    Some((_, existing)) if existing > op.stamp => false,
                    _ => {
                        entry.created = Some((*kind, op.stamp));
                        true
                    }
                }
            }
            Change::Set { id, value } => {
                let entry = self.layers.entry(*id).or_default();
                if entry.deleted.is_some_and(|deleted| op.stamp < deleted) {
                    return false;
                }
                let field = value.field();
                match entry.fields.get(&field) {
                    // Equal stamps come from the same delta: the later op wins.
                    Some(register) if register.stamp > op.stamp => false,
                    _ => {
                        entry.fields.insert(
                            field,
                            Register {
                                value: value.clone(),
                                stamp: op.stamp,
                            },
                        );
                        true
                    }
                }
            }
            Change::Delete { id } => {
                let entry = self.layers.entry(*id).or_default();
                match entry.deleted {
                    Some(existing) if existing >= op.stamp => existing == op.stamp,
                    _ => {
                        entry.deleted = Some(op.stamp);
                        entry.fields.retain(|_, register| register.stamp >= op.stamp);
                        true
                    }
                }
            }
            Change::Connect { id, source, target } => {
                let entry = self.edges.entry(*id).or_default();
                match entry.created {
                    Some((_, _, existing)) if existing > op.stamp => false,
                    _ => {
                        entry.created = Some((*source, *target, op.stamp));
                        true
                    }
                }
            }
            Change::Disconnect { id } => {
                let entry = self.edges.entry(*id).or_default();
                match entry.deleted {
                    Some(existing) if existing >= op.stamp => existing == op.stamp,
                    _ => {
                        entry.deleted = Some(op.stamp);
                        true
                    }
                }
            }
        }
    }

    /// Export the complete state, tombstones included, with original stamps.
    ///
    /// Merging an export into any replica is idempotent; it is used to seed
    /// joiners and to replay local state after a reconnect.
    pub fn export(&self) -> Delta {
        let mut ops = Vec::new();

        let mut layer_ids: Vec<&LayerId> = self.layers.keys().collect();
        layer_ids.sort();
        for id in layer_ids {
            let entry = &self.layers[id];
            if let Some((kind, stamp)) = entry.created {
                ops.push(Op {
                    stamp,
                    change: Change::Create { id: *id, kind },
                });
            }
            for register in entry.fields.values() {
                ops.push(Op {
                    stamp: register.stamp,
                    change: Change::Set {
                        id: *id,
                        value: register.value.clone(),
                    },
                });
            }
            if let Some(stamp) = entry.deleted {
                ops.push(Op {
                    stamp,
                    change: Change::Delete { id: *id },
                });
            }
        }

        let mut edge_ids: Vec<&EdgeId> = self.edges.keys().collect();
        edge_ids.sort();
        for id in edge_ids {
            let entry = &self.edges[id];
            if let Some((source, target, stamp)) = entry.created {
                ops.push(Op {
                    stamp,
                    change: Change::Connect {
                        id: *id,
                        source,
                        target,
                    },
                });
            }
            if let Some(stamp) = entry.deleted {
                ops.push(Op {
                    stamp,
                    change: Change::Disconnect { id: *id },
                });
            }
        }

        Delta {
            origin: self.peer_id(),
            ops,
        }
    }

    // --- Outbox ---

    /// Take the queued local deltas (drains the outbox).
    pub fn take_outgoing(&mut self) -> Vec<Delta> {
        std::mem::take(&mut self.outbox)
    }

    pub fn has_outgoing(&self) -> bool {
        !self.outbox.is_empty()
    }

    /// Drop queued deltas, e.g. after a full export has been sent instead.
    pub fn clear_outgoing(&mut self) {
        self.outbox.clear();
    }
}
