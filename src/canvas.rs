//! Drawing surface the box editor renders onto.
//!
//! [`BoxCanvas`] is the seam to a concrete UI toolkit. [`Scene`] is a
//! retained in-memory implementation with fixed-pitch text metrics, used
//! by headless front ends and the CLI.

use std::collections::BTreeMap;

use crate::geometry::ViewRect;
use crate::model::Category;

/// Opaque identifier of one drawn item
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ItemHandle(pub u64);

/// Visual role of a rectangle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RectStyle {
    /// Translucent box fill in the category color
    Fill(Category),
    /// Background behind a label
    Plate(Category),
    /// Resize handle at the bottom-right corner
    Handle,
}

pub trait BoxCanvas {
    fn add_rect(&mut self, rect: ViewRect, style: RectStyle) -> ItemHandle;

    /// Text whose bottom-left corner sits at `(x, y)`
    fn add_label(&mut self, x: f64, y: f64, text: &str) -> ItemHandle;

    /// Current extent of an item; labels report their measured text extent
    fn bounds(&self, item: ItemHandle) -> Option<ViewRect>;

    fn set_rect(&mut self, item: ItemHandle, rect: ViewRect);

    fn move_item(&mut self, item: ItemHandle, dx: f64, dy: f64);

    /// Draw `item` above every other item
    fn raise(&mut self, item: ItemHandle);

    fn remove(&mut self, item: ItemHandle);

    /// Font size for labels added from now on
    fn set_font_size(&mut self, _size: u32) {}
}

#[derive(Debug, Clone, PartialEq)]
pub enum SceneItem {
    Rect { rect: ViewRect, style: RectStyle },
    Label { rect: ViewRect, text: String },
}

impl SceneItem {
    pub fn rect(&self) -> ViewRect {
        match self {
            SceneItem::Rect { rect, .. } | SceneItem::Label { rect, .. } => *rect,
        }
    }
}

/// Retained scene graph with z-order
#[derive(Debug, Clone)]
pub struct Scene {
    items: BTreeMap<ItemHandle, SceneItem>,
    order: Vec<ItemHandle>,
    next: u64,
    char_width: f64,
    line_height: f64,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new(7.0, 12.0)
    }
}

impl Scene {
    pub fn new(char_width: f64, line_height: f64) -> Self {
        Self {
            items: BTreeMap::new(),
            order: Vec::new(),
            next: 1,
            char_width,
            line_height,
        }
    }

    /// Metrics of a proportional font at `size` points
    pub fn for_font_size(size: u32) -> Self {
        let mut scene = Self::default();
        scene.set_font_size(size);
        scene
    }

    pub fn item(&self, handle: ItemHandle) -> Option<&SceneItem> {
        self.items.get(&handle)
    }

    /// Items bottom to top
    pub fn items(&self) -> impl Iterator<Item = (ItemHandle, &SceneItem)> {
        self.order
            .iter()
            .filter_map(move |h| self.items.get(h).map(|item| (*h, item)))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.order.clear();
    }

    fn insert(&mut self, item: SceneItem) -> ItemHandle {
        let handle = ItemHandle(self.next);
        self.next += 1;
        self.items.insert(handle, item);
        self.order.push(handle);
        handle
    }
}

impl BoxCanvas for Scene {
    fn add_rect(&mut self, rect: ViewRect, style: RectStyle) -> ItemHandle {
        self.insert(SceneItem::Rect { rect, style })
    }

    fn add_label(&mut self, x: f64, y: f64, text: &str) -> ItemHandle {
        let width = self.char_width * text.chars().count() as f64;
        let rect = ViewRect::new(x, y - self.line_height, x + width, y);
        self.insert(SceneItem::Label {
            rect,
            text: text.to_string(),
        })
    }

    fn bounds(&self, item: ItemHandle) -> Option<ViewRect> {
        self.items.get(&item).map(SceneItem::rect)
    }

    fn set_rect(&mut self, item: ItemHandle, new_rect: ViewRect) {
        if let Some(SceneItem::Rect { rect, .. } | SceneItem::Label { rect, .. }) =
            self.items.get_mut(&item)
        {
            *rect = new_rect;
        }
    }

    fn move_item(&mut self, item: ItemHandle, dx: f64, dy: f64) {
        if let Some(SceneItem::Rect { rect, .. } | SceneItem::Label { rect, .. }) =
            self.items.get_mut(&item)
        {
            *rect = rect.translate(dx, dy);
        }
    }

    fn raise(&mut self, item: ItemHandle) {
        if let Some(pos) = self.order.iter().position(|h| *h == item) {
            let handle = self.order.remove(pos);
            self.order.push(handle);
        }
    }

    fn remove(&mut self, item: ItemHandle) {
        self.items.remove(&item);
        self.order.retain(|h| *h != item);
    }

    fn set_font_size(&mut self, size: u32) {
        let size = f64::from(size);
        self.char_width = (size * 0.6).round();
        self.line_height = size;
    }
}
