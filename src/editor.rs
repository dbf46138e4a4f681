//! Pointer-driven editing of entity boxes drawn over the page image.
//!
//! The editor works purely in view space. Each rendered box gets a
//! [`BoxId`] in an arena that maps it to its drawn parts and to the index
//! of its record in the page's coordinate list. Geometry is converted back
//! to model space only when a drag is released.

use std::collections::HashMap;
use tracing::{debug, warn};

use crate::canvas::{BoxCanvas, ItemHandle, RectStyle};
use crate::config::EditorConfig;
use crate::error::{AnnotatorError, AnnotatorResult};
use crate::geometry::{CoordinateMapper, ImageSize, ViewPoint, ViewRect, ViewState};
use crate::model::{BoxRecord, ModelRect};

/// Identifier of one rendered box, valid until the next render
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoxId(u32);

/// Drawn parts of one box, moved and deleted as a group
#[derive(Debug, Clone, Copy)]
pub struct BoxVisual {
    pub rect: ItemHandle,
    pub label: ItemHandle,
    pub plate: ItemHandle,
    pub handle: ItemHandle,
    pub bounds: ViewRect,
}

impl BoxVisual {
    pub fn items(&self) -> [ItemHandle; 4] {
        [self.rect, self.label, self.plate, self.handle]
    }
}

/// Where a press landed on a box
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DragAction {
    Move,
    Resize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EditorState {
    Idle,
    Pressed {
        target: BoxId,
        action: DragAction,
        origin: ViewPoint,
        start: ViewRect,
    },
    DraggingMove {
        target: BoxId,
        origin: ViewPoint,
        start: ViewRect,
    },
    DraggingResize {
        target: BoxId,
        origin: ViewPoint,
        start: ViewRect,
    },
}

/// A finished drag, ready to be persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxEdit {
    pub index: usize,
    pub coords: ModelRect,
}

/// Rendered boxes in draw order plus the id -> record index table
#[derive(Debug, Default)]
struct BoxArena {
    order: Vec<BoxId>,
    visuals: HashMap<BoxId, BoxVisual>,
    index_of: HashMap<BoxId, usize>,
    next_id: u32,
}

impl BoxArena {
    fn insert(&mut self, visual: BoxVisual, index: usize) -> BoxId {
        let id = BoxId(self.next_id);
        self.next_id += 1;
        self.order.push(id);
        self.visuals.insert(id, visual);
        self.index_of.insert(id, index);
        id
    }

    fn drain(&mut self) -> Vec<BoxVisual> {
        self.order.clear();
        self.index_of.clear();
        self.visuals.drain().map(|(_, v)| v).collect()
    }

    fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

pub struct BoxEditor {
    arena: BoxArena,
    state: EditorState,
    handle_size: f64,
    min_box_size: f64,
    label_padding: f64,
    stale: bool,
}

impl BoxEditor {
    pub fn new(config: &EditorConfig) -> Self {
        Self {
            arena: BoxArena::default(),
            state: EditorState::Idle,
            handle_size: config.handle_size,
            min_box_size: config.min_box_size,
            label_padding: config.label_padding,
            stale: false,
        }
    }

    pub fn state(&self) -> EditorState {
        self.state
    }

    /// True after a deletion until the next render
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn box_count(&self) -> usize {
        self.arena.order.len()
    }

    pub fn box_ids(&self) -> Vec<BoxId> {
        self.arena.order.clone()
    }

    pub fn visual(&self, id: BoxId) -> Option<&BoxVisual> {
        self.arena.visuals.get(&id)
    }

    pub fn index_of(&self, id: BoxId) -> Option<usize> {
        self.arena.index_of.get(&id).copied()
    }

    /// Remove every drawn box from `canvas`
    pub fn clear<C: BoxCanvas>(&mut self, canvas: &mut C) {
        for visual in self.arena.drain() {
            for item in visual.items() {
                canvas.remove(item);
            }
        }
        self.state = EditorState::Idle;
        self.stale = false;
    }

    /// Draw `boxes` over the image, replacing anything drawn before. Box
    /// ids issued by earlier renders become invalid.
    pub fn render<C: BoxCanvas>(
        &mut self,
        canvas: &mut C,
        boxes: &[BoxRecord],
        image: ImageSize,
        view: &ViewState,
    ) {
        self.clear(canvas);

        for (index, record) in boxes.iter().enumerate() {
            let bounds = CoordinateMapper::model_rect_to_view(&record.coords, image, view);

            let rect = canvas.add_rect(bounds, RectStyle::Fill(record.category));
            let label = canvas.add_label(bounds.x1, bounds.y1 - self.label_padding, &record.name);
            let text = canvas.bounds(label).unwrap_or(ViewRect::new(
                bounds.x1,
                bounds.y1 - self.label_padding,
                bounds.x1,
                bounds.y1 - self.label_padding,
            ));
            let pad = self.label_padding;
            let plate = canvas.add_rect(
                ViewRect::new(text.x1 - pad, text.y1 - pad, text.x2 + pad, text.y2 + pad),
                RectStyle::Plate(record.category),
            );
            canvas.raise(label);
            let handle = canvas.add_rect(self.handle_rect(&bounds), RectStyle::Handle);

            self.arena.insert(
                BoxVisual {
                    rect,
                    label,
                    plate,
                    handle,
                    bounds,
                },
                index,
            );
        }
        debug!(boxes = boxes.len(), "Rendered entity boxes");
    }

    fn handle_rect(&self, bounds: &ViewRect) -> ViewRect {
        ViewRect::square_around(bounds.x2, bounds.y2, self.handle_size)
    }

    /// Topmost box under `point`, and whether the resize handle was hit
    pub fn hit_test(&self, point: ViewPoint) -> Option<(BoxId, DragAction)> {
        self.arena.order.iter().rev().find_map(|id| {
            let visual = self.arena.visuals.get(id)?;
            if self.handle_rect(&visual.bounds).contains(point) {
                Some((*id, DragAction::Resize))
            } else if visual.bounds.contains(point) {
                Some((*id, DragAction::Move))
            } else {
                None
            }
        })
    }

    /// Pointer pressed. Returns true when a box was grabbed.
    pub fn press(&mut self, point: ViewPoint) -> bool {
        if self.stale || !matches!(self.state, EditorState::Idle) {
            return false;
        }
        match self.hit_test(point) {
            Some((target, action)) => {
                let start = self.arena.visuals[&target].bounds;
                self.state = EditorState::Pressed {
                    target,
                    action,
                    origin: point,
                    start,
                };
                true
            }
            None => false,
        }
    }

    /// Pointer moved while pressed
    pub fn motion<C: BoxCanvas>(&mut self, canvas: &mut C, point: ViewPoint) {
        self.state = match self.state {
            EditorState::Idle => return,
            EditorState::Pressed {
                target,
                action: DragAction::Move,
                origin,
                start,
            }
            | EditorState::DraggingMove {
                target,
                origin,
                start,
            } => EditorState::DraggingMove {
                target,
                origin,
                start,
            },
            EditorState::Pressed {
                target,
                action: DragAction::Resize,
                origin,
                start,
            }
            | EditorState::DraggingResize {
                target,
                origin,
                start,
            } => EditorState::DraggingResize {
                target,
                origin,
                start,
            },
        };

        let dx = point.x - self.origin().x;
        let dy = point.y - self.origin().y;
        match self.state {
            EditorState::DraggingMove { target, start, .. } => {
                self.place(canvas, target, start.translate(dx, dy), true);
            }
            EditorState::DraggingResize { target, start, .. } => {
                let x2 = (start.x2 + dx).max(start.x1 + self.min_box_size);
                let y2 = (start.y2 + dy).max(start.y1 + self.min_box_size);
                self.place(canvas, target, ViewRect::new(start.x1, start.y1, x2, y2), false);
            }
            _ => {}
        }
    }

    fn origin(&self) -> ViewPoint {
        match self.state {
            EditorState::Pressed { origin, .. }
            | EditorState::DraggingMove { origin, .. }
            | EditorState::DraggingResize { origin, .. } => origin,
            EditorState::Idle => ViewPoint::new(0.0, 0.0),
        }
    }

    /// Bring the drawn parts of `target` to `bounds`. The label and its
    /// plate follow only when the top-left corner moves.
    fn place<C: BoxCanvas>(&mut self, canvas: &mut C, target: BoxId, bounds: ViewRect, with_label: bool) {
        let handle_rect = self.handle_rect(&bounds);
        let Some(visual) = self.arena.visuals.get_mut(&target) else {
            return;
        };
        if with_label {
            let dx = bounds.x1 - visual.bounds.x1;
            let dy = bounds.y1 - visual.bounds.y1;
            canvas.move_item(visual.label, dx, dy);
            canvas.move_item(visual.plate, dx, dy);
        }
        canvas.set_rect(visual.rect, bounds);
        canvas.set_rect(visual.handle, handle_rect);
        visual.bounds = bounds;
    }

    /// Pointer released. A finished drag yields the edited box in model
    /// space; a press without motion yields nothing.
    pub fn release(&mut self, image: ImageSize, view: &ViewState) -> Option<BoxEdit> {
        let state = std::mem::replace(&mut self.state, EditorState::Idle);
        let target = match state {
            EditorState::DraggingMove { target, .. } | EditorState::DraggingResize { target, .. } => target,
            _ => return None,
        };
        let visual = self.arena.visuals.get(&target)?;
        let index = self.index_of(target)?;
        let coords = CoordinateMapper::view_rect_to_model(&visual.bounds, image, view);
        debug!(index, ?coords, "Box edit released");
        Some(BoxEdit { index, coords })
    }

    /// Abort a drag, putting the box back where it started
    pub fn cancel<C: BoxCanvas>(&mut self, canvas: &mut C) {
        let state = std::mem::replace(&mut self.state, EditorState::Idle);
        match state {
            EditorState::DraggingMove { target, start, .. } => {
                self.place(canvas, target, start, true);
            }
            EditorState::DraggingResize { target, start, .. } => {
                self.place(canvas, target, start, false);
            }
            _ => {}
        }
    }

    /// Modified click: resolve the record index of the box under `point`
    /// for deletion. The editor refuses further interaction until the page
    /// is rendered again with the shortened list.
    pub fn delete_at(&mut self, point: ViewPoint) -> Option<usize> {
        if self.stale {
            return None;
        }
        let (id, _) = self.hit_test(point)?;
        self.delete(id).ok()
    }

    /// Resolve the record index of `id` for deletion
    pub fn delete(&mut self, id: BoxId) -> AnnotatorResult<usize> {
        if self.stale {
            return Err(AnnotatorError::StaleEdit);
        }
        let index = self.index_of(id).ok_or_else(|| {
            warn!(?id, "Delete requested for a box that is not rendered");
            AnnotatorError::StaleEdit
        })?;
        self.state = EditorState::Idle;
        self.stale = true;
        Ok(index)
    }

    pub fn has_boxes(&self) -> bool {
        !self.arena.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::{Scene, SceneItem};
    use crate::config::AnnotatorConfig;
    use crate::model::Category;

    fn editor() -> BoxEditor {
        BoxEditor::new(&AnnotatorConfig::default().editor)
    }

    fn radom() -> BoxRecord {
        BoxRecord {
            name: "Radom".to_string(),
            category: Category::Location,
            coords: ModelRect::new(100, 200, 300, 400).unwrap(),
        }
    }

    fn setup() -> (BoxEditor, Scene, ImageSize, ViewState) {
        let mut editor = editor();
        let mut scene = Scene::default();
        let image = ImageSize::new(2000, 1000);
        let view = ViewState::new(10.0, 20.0, 0.5);
        editor.render(&mut scene, &[radom()], image, &view);
        (editor, scene, image, view)
    }

    #[test]
    fn test_render_groups_parts() {
        let (editor, scene, _, _) = setup();
        assert_eq!(editor.box_count(), 1);
        assert_eq!(scene.len(), 4);

        let id = editor.box_ids()[0];
        let visual = editor.visual(id).unwrap();
        assert_eq!(visual.bounds, ViewRect::new(210.0, 70.0, 410.0, 170.0));

        let label = scene.bounds(visual.label).unwrap();
        assert_eq!(label.y2, 68.0);
        assert_eq!(label.x1, 210.0);
        let plate = scene.bounds(visual.plate).unwrap();
        assert!(plate.x1 < label.x1 && plate.x2 > label.x2);

        // label is drawn above its plate
        let order: Vec<_> = scene.items().map(|(h, _)| h).collect();
        let label_pos = order.iter().position(|h| *h == visual.label).unwrap();
        let plate_pos = order.iter().position(|h| *h == visual.plate).unwrap();
        assert!(label_pos > plate_pos);
    }

    #[test]
    fn test_press_outside_stays_idle() {
        let (mut editor, _, _, _) = setup();
        assert!(!editor.press(ViewPoint::new(5.0, 5.0)));
        assert_eq!(editor.state(), EditorState::Idle);
    }

    #[test]
    fn test_resize_keeps_top_left_and_label() {
        let (mut editor, mut scene, image, view) = setup();
        let id = editor.box_ids()[0];
        let label_before = scene.bounds(editor.visual(id).unwrap().label).unwrap();

        assert!(editor.press(ViewPoint::new(410.0, 170.0)));
        assert!(matches!(
            editor.state(),
            EditorState::Pressed { action: DragAction::Resize, .. }
        ));
        editor.motion(&mut scene, ViewPoint::new(430.0, 180.0));
        assert!(matches!(editor.state(), EditorState::DraggingResize { .. }));
        editor.motion(&mut scene, ViewPoint::new(460.0, 200.0));

        let edit = editor.release(image, &view).unwrap();
        assert_eq!(edit.index, 0);
        assert_eq!(edit.coords, ModelRect::new(100, 200, 360, 450).unwrap());
        assert_eq!(editor.state(), EditorState::Idle);

        let visual = editor.visual(id).unwrap();
        assert_eq!(scene.bounds(visual.label).unwrap(), label_before);
        assert_eq!(scene.bounds(visual.rect).unwrap(), ViewRect::new(210.0, 70.0, 460.0, 200.0));
    }

    #[test]
    fn test_resize_respects_minimum_size() {
        let (mut editor, mut scene, _, _) = setup();
        editor.press(ViewPoint::new(410.0, 170.0));
        editor.motion(&mut scene, ViewPoint::new(0.0, 0.0));

        let visual = editor.visual(editor.box_ids()[0]).unwrap();
        assert_eq!(visual.bounds, ViewRect::new(210.0, 70.0, 220.0, 80.0));
    }

    #[test]
    fn test_move_translates_whole_group() {
        let (mut editor, mut scene, image, view) = setup();
        let id = editor.box_ids()[0];
        let label_before = scene.bounds(editor.visual(id).unwrap().label).unwrap();

        assert!(editor.press(ViewPoint::new(300.0, 100.0)));
        editor.motion(&mut scene, ViewPoint::new(310.0, 105.0));
        editor.motion(&mut scene, ViewPoint::new(350.0, 120.0));

        let visual = *editor.visual(id).unwrap();
        assert_eq!(visual.bounds, ViewRect::new(260.0, 90.0, 460.0, 190.0));
        assert_eq!(
            scene.bounds(visual.label).unwrap(),
            label_before.translate(50.0, 20.0)
        );
        assert_eq!(
            scene.bounds(visual.handle).unwrap(),
            ViewRect::square_around(460.0, 190.0, 10.0)
        );

        let edit = editor.release(image, &view).unwrap();
        assert_eq!(edit.coords, ModelRect::new(140, 250, 340, 450).unwrap());
    }

    #[test]
    fn test_click_without_motion_commits_nothing() {
        let (mut editor, _, image, view) = setup();
        assert!(editor.press(ViewPoint::new(300.0, 100.0)));
        assert_eq!(editor.release(image, &view), None);
        assert_eq!(editor.state(), EditorState::Idle);
    }

    #[test]
    fn test_cancel_restores_box() {
        let (mut editor, mut scene, _, _) = setup();
        let id = editor.box_ids()[0];
        editor.press(ViewPoint::new(300.0, 100.0));
        editor.motion(&mut scene, ViewPoint::new(400.0, 400.0));
        editor.cancel(&mut scene);

        let visual = editor.visual(id).unwrap();
        assert_eq!(visual.bounds, ViewRect::new(210.0, 70.0, 410.0, 170.0));
        assert_eq!(scene.bounds(visual.rect).unwrap(), visual.bounds);
    }

    #[test]
    fn test_delete_marks_editor_stale_until_render() {
        let mut editor = editor();
        let mut scene = Scene::default();
        let image = ImageSize::new(1000, 1000);
        let view = ViewState::default();
        let mut boxes = vec![radom(), radom(), radom()];
        boxes[1].coords = ModelRect::new(500, 500, 600, 600).unwrap();
        boxes[2].coords = ModelRect::new(700, 700, 800, 800).unwrap();
        editor.render(&mut scene, &boxes, image, &view);

        assert_eq!(editor.delete_at(ViewPoint::new(550.0, 550.0)), Some(1));
        assert!(editor.is_stale());
        assert!(!editor.press(ViewPoint::new(750.0, 750.0)));
        assert_eq!(editor.delete_at(ViewPoint::new(750.0, 750.0)), None);

        boxes.remove(1);
        editor.render(&mut scene, &boxes, image, &view);
        assert!(!editor.is_stale());
        assert_eq!(scene.len(), 8);
        let (id, _) = editor.hit_test(ViewPoint::new(750.0, 750.0)).unwrap();
        assert_eq!(editor.index_of(id), Some(1));
    }

    #[test]
    fn test_ids_from_previous_render_are_rejected() {
        let (mut editor, mut scene, image, view) = setup();
        let old = editor.box_ids()[0];
        editor.render(&mut scene, &[radom()], image, &view);
        assert!(matches!(editor.delete(old), Err(AnnotatorError::StaleEdit)));

        let labels = scene
            .items()
            .filter(|(_, item)| matches!(item, SceneItem::Label { .. }))
            .count();
        assert_eq!(labels, 1);
    }
}
