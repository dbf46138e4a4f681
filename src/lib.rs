// Public module exports for the binary and front ends
pub mod batch;
pub mod cache;
pub mod canvas;
pub mod checksum;
pub mod cli;
pub mod collaborators;
pub mod config;
pub mod editor;
pub mod error;
pub mod geometry;
pub mod logging;
pub mod model;
pub mod page;
pub mod session;

pub use cache::{CacheEntry, CacheUpdate, PageCacheStore};
pub use config::AnnotatorConfig;
pub use error::{AnnotatorError, AnnotatorResult};
pub use geometry::{CoordinateMapper, ImageSize, ViewPoint, ViewRect, ViewState};
pub use model::{BoxRecord, Category, EntitySet, ModelRect};
pub use page::{Page, PageSet};
pub use session::{Collaborators, Session, SessionEvent};
