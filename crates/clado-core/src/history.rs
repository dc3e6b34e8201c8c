//! Local undo/redo history.
//!
//! History is per client: only mutations committed by this replica are
//! recorded, and undoing one replays its inverse as a fresh mutation that is
//! merged like any other write. There is no global undo order across clients.

use crate::crdt::Change;

/// Maximum number of undo steps to keep.
pub const MAX_UNDO_STEPS: usize = 50;

/// Forward and inverse changes of one committed mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    /// Changes that re-apply the mutation.
    pub redo: Vec<Change>,
    /// Changes that revert the mutation, in application order.
    pub undo: Vec<Change>,
}

impl HistoryEntry {
    pub fn new(redo: Vec<Change>, undo: Vec<Change>) -> Self {
        Self { redo, undo }
    }

    /// Fold a later entry into this one.
    fn absorb(&mut self, later: HistoryEntry) {
        self.redo.extend(later.redo);
        let mut undo = later.undo;
        undo.append(&mut self.undo);
        self.undo = undo;
    }
}

/// Undo and redo stacks.
#[derive(Debug, Clone)]
pub struct History {
    undo_stack: Vec<HistoryEntry>,
    redo_stack: Vec<HistoryEntry>,
    /// Entry being accumulated while a gesture is open.
    open_group: Option<HistoryEntry>,
    /// Nesting depth of `begin_group` calls.
    group_depth: usize,
    max_steps: usize,
}

impl Default for History {
    fn default() -> Self {
        Self::new()
    }
}

impl History {
    pub fn new() -> Self {
        Self::with_max_steps(MAX_UNDO_STEPS)
    }

    pub fn with_max_steps(max_steps: usize) -> Self {
        Self {
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
            open_group: None,
            group_depth: 0,
            max_steps: max_steps.max(1),
        }
    }

    /// Record a committed mutation. Clears the redo stack.
    pub fn record(&mut self, entry: HistoryEntry) {
        self.redo_stack.clear();

        if self.group_depth > 0 {
            match &mut self.open_group {
                Some(group) => group.absorb(entry),
                None => self.open_group = Some(entry),
            }
            return;
        }

        self.push_undo(entry);
    }

    fn push_undo(&mut self, entry: HistoryEntry) {
        self.undo_stack.push(entry);
        if self.undo_stack.len() > self.max_steps {
            self.undo_stack.remove(0);
        }
    }

    /// Start grouping recorded mutations into a single entry.
    pub fn begin_group(&mut self) {
        self.group_depth += 1;
    }

    /// Close the current group. The accumulated entry (if any) becomes one
    /// undo step.
    pub fn end_group(&mut self) {
        if self.group_depth == 0 {
            return;
        }
        self.group_depth -= 1;
        if self.group_depth == 0 {
            if let Some(entry) = self.open_group.take() {
                self.push_undo(entry);
            }
        }
    }

    pub fn is_grouping(&self) -> bool {
        self.group_depth > 0
    }

    /// Pop the newest entry and return the changes that revert it.
    /// The entry moves to the redo stack.
    pub fn undo(&mut self) -> Option<Vec<Change>> {
        self.close_open_group();
        let entry = self.undo_stack.pop()?;
        let changes = entry.undo.clone();
        self.redo_stack.push(entry);
        Some(changes)
    }

    /// Pop the newest undone entry and return the changes that re-apply it.
    /// The entry moves back to the undo stack.
    pub fn redo(&mut self) -> Option<Vec<Change>> {
        self.close_open_group();
        let entry = self.redo_stack.pop()?;
        let changes = entry.redo.clone();
        self.undo_stack.push(entry);
        Some(changes)
    }

    /// Undo and redo never run inside a gesture.
    fn close_open_group(&mut self) {
        if self.group_depth > 0 {
            self.group_depth = 1;
            self.end_group();
        }
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty() || self.open_group.is_some()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_count(&self) -> usize {
        self.undo_stack.len() + usize::from(self.open_group.is_some())
    }

    pub fn redo_count(&self) -> usize {
        self.redo_stack.len()
    }

    /// Clear undo/redo history.
    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.open_group = None;
        self.group_depth = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::FieldValue;
    use uuid::Uuid;

    fn set_x(id: Uuid, x: f64) -> Change {
        Change::Set {
            id,
            value: FieldValue::X(x),
        }
    }

    fn entry(id: Uuid, from: f64, to: f64) -> HistoryEntry {
        HistoryEntry::new(vec![set_x(id, to)], vec![set_x(id, from)])
    }

    #[test]
    fn test_empty_history() {
        let mut history = History::new();
        assert!(!history.can_undo());
        assert!(history.undo().is_none());
        assert!(!history.can_redo());
        assert!(history.redo().is_none());
    }

    #[test]
    fn test_undo_then_redo() {
        let id = Uuid::new_v4();
        let mut history = History::new();
        history.record(entry(id, 0.0, 10.0));

        assert_eq!(history.undo(), Some(vec![set_x(id, 0.0)]));
        assert!(history.can_redo());
        assert_eq!(history.redo(), Some(vec![set_x(id, 10.0)]));
        assert!(!history.can_redo());
        assert_eq!(history.undo_count(), 1);
    }

    #[test]
    fn test_record_clears_redo() {
        let id = Uuid::new_v4();
        let mut history = History::new();
        history.record(entry(id, 0.0, 10.0));
        history.undo();
        assert!(history.can_redo());

        history.record(entry(id, 0.0, 5.0));
        assert!(!history.can_redo());
        assert!(history.redo().is_none());
    }

    #[test]
    fn test_group_folds_entries() {
        let id = Uuid::new_v4();
        let mut history = History::new();
        history.begin_group();
        history.record(entry(id, 0.0, 1.0));
        history.record(entry(id, 1.0, 2.0));
        history.record(entry(id, 2.0, 3.0));
        history.end_group();

        assert_eq!(history.undo_count(), 1);
        // Inverse changes run newest first, so the last write restores the origin.
        let undo = history.undo().unwrap();
        assert_eq!(undo.last(), Some(&set_x(id, 0.0)));
        let redo = history.redo().unwrap();
        assert_eq!(redo.last(), Some(&set_x(id, 3.0)));
    }

    #[test]
    fn test_max_steps() {
        let id = Uuid::new_v4();
        let mut history = History::with_max_steps(3);
        for i in 0..5 {
            history.record(entry(id, i as f64, i as f64 + 1.0));
        }
        assert_eq!(history.undo_count(), 3);
        // Oldest entries were discarded.
        assert_eq!(history.undo(), Some(vec![set_x(id, 4.0)]));
    }

    #[test]
    fn test_undo_closes_open_group() {
        let id = Uuid::new_v4();
        let mut history = History::new();
        history.begin_group();
        history.record(entry(id, 0.0, 1.0));
        assert!(history.can_undo());

        assert_eq!(history.undo(), Some(vec![set_x(id, 0.0)]));
        assert!(!history.is_grouping());
    }
}
