//! Canvas: the editing surface a client UI drives.
//!
//! Holds the collaboration manager and the local interaction state, turns
//! pointer input into mutations and exposes the selection commands that
//! toolbars and keyboard shortcuts need.

use crate::collaboration::CollaborationManager;
use crate::interaction::{
    CanvasAction, CanvasEvent, CanvasState, HANDLE_HIT_TOLERANCE, PointerTarget, TransitionContext,
    hit_test_handles, transition,
};
use crate::layer::{LayerId, LayerKind, Rgb};
use crate::mutation::{Mutation, MutationError};
use kurbo::{Point, Rect};

/// Default visible area, in canvas units.
pub const DEFAULT_VIEWPORT: Rect = Rect::new(0.0, 0.0, 1280.0, 800.0);

pub struct Canvas {
    collab: CollaborationManager,
    state: CanvasState,
    viewport: Rect,
}

impl Canvas {
    pub fn new(collab: CollaborationManager) -> Self {
        Self {
            collab,
            state: CanvasState::Idle,
            viewport: DEFAULT_VIEWPORT,
        }
    }

    pub fn collab(&self) -> &CollaborationManager {
        &self.collab
    }

    pub fn collab_mut(&mut self) -> &mut CollaborationManager {
        &mut self.collab
    }

    pub fn state(&self) -> &CanvasState {
        &self.state
    }

    pub fn viewport(&self) -> Rect {
        self.viewport
    }

    pub fn set_viewport(&mut self, viewport: Rect) {
        self.viewport = viewport;
    }

    /// What lies under `point`: a handle of the single selected layer, then
    /// the topmost layer, then the empty canvas.
    pub fn target_at(&self, point: Point) -> PointerTarget {
        let store = self.collab.store();
        let selection = self.collab.selection();
        if let [id] = selection.as_slice() {
            let handle = store
                .get(*id)
                .and_then(|layer| hit_test_handles(layer.bounds(), point, HANDLE_HIT_TOLERANCE));
            if let Some(handle) = handle {
                return PointerTarget::Handle(*id, handle);
            }
        }
        match store.layer_at(point) {
            Some(id) => PointerTarget::Layer(id),
            None => PointerTarget::Canvas,
        }
    }

    /// Pointer down at `point`, hit-testing for the target.
    pub fn pointer_down(&mut self, point: Point) -> Result<(), MutationError> {
        let target = self.target_at(point);
        self.handle_event(CanvasEvent::PointerDown { point, target })
    }

    /// Feed one input event through the state machine and carry out the
    /// resulting actions.
    ///
    /// A failed mutation leaves the canvas idle with any open gesture closed.
    pub fn handle_event(&mut self, event: CanvasEvent) -> Result<(), MutationError> {
        let selection = self.collab.selection();
        let step = {
            let ctx = TransitionContext {
                store: self.collab.store(),
                selection: &selection,
                viewport: self.viewport,
            };
            transition(&self.state, event, &ctx)
        };

        let mut gesture_open = self.state.is_dragging();
        for action in step.actions {
            let result = match action {
                CanvasAction::Mutate(mutation) => self.collab.mutate(mutation),
                CanvasAction::BeginGesture => {
                    self.collab.begin_gesture();
                    gesture_open = true;
                    Ok(())
                }
                CanvasAction::EndGesture => {
                    self.collab.end_gesture();
                    gesture_open = false;
                    Ok(())
                }
            };
            if let Err(e) = result {
                if gesture_open {
                    self.collab.end_gesture();
                }
                self.state = CanvasState::Idle;
                return Err(e);
            }
        }

        self.state = step.next;
        Ok(())
    }

    /// Start placing a layer of `kind` on the next click.
    pub fn choose_insert(&mut self, kind: LayerKind) -> Result<(), MutationError> {
        self.handle_event(CanvasEvent::ChooseInsert(kind))
    }

    pub fn cancel(&mut self) -> Result<(), MutationError> {
        self.handle_event(CanvasEvent::Cancel)
    }

    pub fn select_all(&mut self) -> Result<(), MutationError> {
        let ids = self.collab.store().z_order();
        self.collab.mutate(Mutation::Select { ids })
    }

    pub fn clear_selection(&mut self) -> Result<(), MutationError> {
        self.collab.mutate(Mutation::Select { ids: Vec::new() })
    }

    /// Delete the selected layers and clear the selection.
    pub fn delete_selected(&mut self) -> Result<(), MutationError> {
        let ids = self.collab.selection();
        if ids.is_empty() {
            return Ok(());
        }
        self.collab.mutate(Mutation::DeleteLayers { ids })?;
        self.clear_selection()
    }

    pub fn fill_selected(&mut self, fill: Rgb) -> Result<(), MutationError> {
        let ids = self.collab.selection();
        self.collab.mutate(Mutation::SetFill { ids, fill })
    }

    pub fn bring_selected_to_front(&mut self) -> Result<(), MutationError> {
        let ids = self.collab.selection();
        self.collab.mutate(Mutation::BringToFront { ids })
    }

    pub fn send_selected_to_back(&mut self) -> Result<(), MutationError> {
        let ids = self.collab.selection();
        self.collab.mutate(Mutation::SendToBack { ids })
    }

    /// Replace the text of a layer.
    pub fn set_value(&mut self, id: LayerId, value: Option<String>) -> Result<(), MutationError> {
        self.collab.mutate(Mutation::SetValue { id, value })
    }

    /// Undo the last step. An active drag or resize is ended first, so it
    /// becomes the step that is undone.
    pub fn undo(&mut self) -> Result<bool, MutationError> {
        self.end_drag()?;
        self.collab.undo()
    }

    pub fn redo(&mut self) -> Result<bool, MutationError> {
        self.end_drag()?;
        self.collab.redo()
    }

    fn end_drag(&mut self) -> Result<(), MutationError> {
        if self.state.is_dragging() {
            self.cancel()?;
        }
        Ok(())
    }
}

impl Default for Canvas {
    fn default() -> Self {
        Self::new(CollaborationManager::new())
    }
}
