//! Coordinate mapping between model space, image pixels and the view.
//!
//! Model space is `[0, 1000]` on both axes regardless of image size.
//! Pixel space is the source image. View space is the panned and zoomed
//! canvas. The mapper keeps no state of its own: the view state and image
//! size are passed in on every call.

use crate::model::{ModelRect, MODEL_SCALE};

pub const MIN_SCALE: f64 = 0.05;
pub const MAX_SCALE: f64 = 10.0;

/// Point in view (canvas) space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewPoint {
    pub x: f64,
    pub y: f64,
}

impl ViewPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned rectangle in view space, `(x1, y1)` top-left
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewRect {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl ViewRect {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }

    pub fn contains(&self, point: ViewPoint) -> bool {
        point.x >= self.x1 && point.x <= self.x2 && point.y >= self.y1 && point.y <= self.y2
    }

    pub fn translate(&self, dx: f64, dy: f64) -> Self {
        Self::new(self.x1 + dx, self.y1 + dy, self.x2 + dx, self.y2 + dy)
    }

    /// Square of side `size` centered on `(x, y)`
    pub fn square_around(x: f64, y: f64, size: f64) -> Self {
        let half = size / 2.0;
        Self::new(x - half, y - half, x + half, y + half)
    }
}

/// Source image size in pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageSize {
    pub width: f64,
    pub height: f64,
}

impl ImageSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: f64::from(width),
            height: f64::from(height),
        }
    }
}

/// Current pan offset and zoom of the canvas. Owned by the interactive
/// thread and reset whenever a page is loaded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewState {
    pub pan_x: f64,
    pub pan_y: f64,
    scale: f64,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            pan_x: 0.0,
            pan_y: 0.0,
            scale: 1.0,
        }
    }
}

impl ViewState {
    pub fn new(pan_x: f64, pan_y: f64, scale: f64) -> Self {
        Self {
            pan_x,
            pan_y,
            scale: clamp_scale(scale),
        }
    }

    /// Initial view of a freshly loaded page: no pan, and images wider
    /// than `max_width` scaled down to fit it.
    pub fn fit(image: ImageSize, max_width: f64) -> Self {
        let scale = if image.width > max_width && image.width > 0.0 {
            max_width / image.width
        } else {
            1.0
        };
        Self::new(0.0, 0.0, scale)
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn set_scale(&mut self, scale: f64) {
        self.scale = clamp_scale(scale);
    }

    /// Multiply the scale by `factor`, clamped to the allowed range
    pub fn zoom(&mut self, factor: f64) {
        self.set_scale(self.scale * factor);
    }

    pub fn pan_by(&mut self, dx: f64, dy: f64) {
        self.pan_x += dx;
        self.pan_y += dy;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

fn clamp_scale(scale: f64) -> f64 {
    if scale.is_nan() {
        1.0
    } else {
        scale.clamp(MIN_SCALE, MAX_SCALE)
    }
}

/// Stateless service composing model <-> pixel <-> view transforms
pub struct CoordinateMapper;

impl CoordinateMapper {
    pub fn model_to_pixel(model_x: f64, model_y: f64, image: ImageSize) -> (f64, f64) {
        let scale = f64::from(MODEL_SCALE);
        (model_x * image.width / scale, model_y * image.height / scale)
    }

    pub fn pixel_to_model(pixel_x: f64, pixel_y: f64, image: ImageSize) -> (f64, f64) {
        let scale = f64::from(MODEL_SCALE);
        (pixel_x * scale / image.width, pixel_y * scale / image.height)
    }

    pub fn pixel_to_view(pixel_x: f64, pixel_y: f64, view: &ViewState) -> ViewPoint {
        ViewPoint::new(
            pixel_x * view.scale + view.pan_x,
            pixel_y * view.scale + view.pan_y,
        )
    }

    pub fn view_to_pixel(point: ViewPoint, view: &ViewState) -> (f64, f64) {
        (
            (point.x - view.pan_x) / view.scale,
            (point.y - view.pan_y) / view.scale,
        )
    }

    pub fn model_to_view(model_x: f64, model_y: f64, image: ImageSize, view: &ViewState) -> ViewPoint {
        let (px, py) = Self::model_to_pixel(model_x, model_y, image);
        Self::pixel_to_view(px, py, view)
    }

    /// Real-valued inverse of [`CoordinateMapper::model_to_view`]
    pub fn view_to_model(point: ViewPoint, image: ImageSize, view: &ViewState) -> (f64, f64) {
        let (px, py) = Self::view_to_pixel(point, view);
        Self::pixel_to_model(px, py, image)
    }

    /// Rendered rectangle of a persisted box
    pub fn model_rect_to_view(rect: &ModelRect, image: ImageSize, view: &ViewState) -> ViewRect {
        let top_left = Self::model_to_view(f64::from(rect.x_min), f64::from(rect.y_min), image, view);
        let bottom_right =
            Self::model_to_view(f64::from(rect.x_max), f64::from(rect.y_max), image, view);
        ViewRect::new(top_left.x, top_left.y, bottom_right.x, bottom_right.y)
    }

    /// Persistable model rectangle of an edited view rectangle, rounded to
    /// integers and clamped into the model range
    pub fn view_rect_to_model(rect: &ViewRect, image: ImageSize, view: &ViewState) -> ModelRect {
        let (x_min, y_min) = Self::view_to_model(ViewPoint::new(rect.x1, rect.y1), image, view);
        let (x_max, y_max) = Self::view_to_model(ViewPoint::new(rect.x2, rect.y2), image, view);
        ModelRect::from_f64_clamped(y_min, x_min, y_max, x_max)
    }
}
