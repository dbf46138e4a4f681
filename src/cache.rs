//! Per-page sidecar records holding cached entities, box geometry and the
//! speech checksum.
//!
//! Writes are read-modify-write merges: fields absent from a
//! [`CacheUpdate`] keep their stored value. Loading never fails; a missing
//! or malformed record reads as an empty entry.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

use crate::checksum::{self, TextDigest};
use crate::error::{AnnotatorError, AnnotatorResult};
use crate::model::{BoxRecord, EntitySet, ModelRect};
use crate::page::Page;

/// Persisted sidecar record of one page
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<TextDigest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entities: Option<EntitySet>,
    /// `None` until boxes were located; an empty list is a located page
    /// whose boxes were all deleted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Vec<BoxRecord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tts_checksum: Option<TextDigest>,
}

impl CacheEntry {
    /// Cached entities, if they were extracted from exactly `text`
    pub fn entities_for(&self, text: &str) -> Option<&EntitySet> {
        self.entities_matching(&checksum::digest(text))
    }

    pub fn entities_matching(&self, live: &TextDigest) -> Option<&EntitySet> {
        if checksum::matches(self.checksum.as_ref(), live) {
            self.entities.as_ref()
        } else {
            None
        }
    }

    /// Cached boxes, if they were located for exactly `text`
    pub fn boxes_for(&self, text: &str) -> Option<&[BoxRecord]> {
        self.boxes_matching(&checksum::digest(text))
    }

    pub fn boxes_matching(&self, live: &TextDigest) -> Option<&[BoxRecord]> {
        if checksum::matches(self.checksum.as_ref(), live) {
            self.coordinates.as_deref()
        } else {
            None
        }
    }

    /// Whether synthesized speech was produced from exactly `text`
    pub fn audio_current(&self, text: &str) -> bool {
        self.audio_matching(&checksum::digest(text))
    }

    pub fn audio_matching(&self, live: &TextDigest) -> bool {
        checksum::matches(self.tts_checksum.as_ref(), live)
    }

    /// Stored boxes regardless of validity
    pub fn boxes(&self) -> &[BoxRecord] {
        self.coordinates.as_deref().unwrap_or_default()
    }
}

/// Partial write applied on top of the stored entry
#[derive(Debug, Clone, Default)]
pub struct CacheUpdate {
    checksum: Option<TextDigest>,
    entities: Option<Option<EntitySet>>,
    coordinates: Option<Option<Vec<BoxRecord>>>,
    tts_checksum: Option<TextDigest>,
}

impl CacheUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn checksum(mut self, digest: TextDigest) -> Self {
        self.checksum = Some(digest);
        self
    }

    pub fn entities(mut self, entities: EntitySet) -> Self {
        self.entities = Some(Some(entities));
        self
    }

    /// Forget stored entities so the next lookup extracts again
    pub fn clear_entities(mut self) -> Self {
        self.entities = Some(None);
        self
    }

    /// Replace all boxes. An empty list is kept as "located, no boxes".
    pub fn coordinates(mut self, boxes: Vec<BoxRecord>) -> Self {
        self.coordinates = Some(Some(boxes));
        self
    }

    /// Forget stored boxes so the next lookup locates again
    pub fn clear_coordinates(mut self) -> Self {
        self.coordinates = Some(None);
        self
    }

    pub fn tts_checksum(mut self, digest: TextDigest) -> Self {
        self.tts_checksum = Some(digest);
        self
    }

    fn apply(self, entry: &mut CacheEntry) {
        if let Some(digest) = self.checksum {
            entry.checksum = Some(digest);
        }
        if let Some(entities) = self.entities {
            entry.entities = entities;
        }
        if let Some(boxes) = self.coordinates {
            entry.coordinates = boxes;
        }
        if let Some(digest) = self.tts_checksum {
            entry.tts_checksum = Some(digest);
        }
    }
}

/// Durable store of sidecar records, one JSON file per page
#[derive(Debug, Clone, Default)]
pub struct PageCacheStore {
    compact: bool,
}

impl PageCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write single-line JSON instead of pretty-printed records
    pub fn compact(mut self) -> Self {
        self.compact = true;
        self
    }

    /// Read the sidecar of `page`; missing or malformed records are empty
    pub fn load(&self, page: &Page) -> CacheEntry {
        let path = &page.sidecar;
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(page = %page.name, "No sidecar record yet");
                return CacheEntry::default();
            }
            Err(e) => {
                warn!(page = %page.name, error = %e, "Sidecar unreadable, treating as cache miss");
                return CacheEntry::default();
            }
        };

        match serde_json::from_str(&content) {
            Ok(entry) => entry,
            Err(source) => {
                let err = AnnotatorError::CacheCorrupt {
                    path: path.clone(),
                    source,
                };
                warn!(page = %page.name, error = %err, cause = %err_source(&err), "Treating as cache miss");
                CacheEntry::default()
            }
        }
    }

    /// Merge `update` into the stored record and write it back atomically
    pub fn save(&self, page: &Page, update: CacheUpdate) -> AnnotatorResult<CacheEntry> {
        let mut entry = self.load(page);
        update.apply(&mut entry);
        self.write(&page.sidecar, &entry)?;
        debug!(
            page = %page.name,
            entities = entry.entities.as_ref().map(EntitySet::len).unwrap_or(0),
            boxes = entry.boxes().len(),
            "Sidecar saved"
        );
        Ok(entry)
    }

    /// Drop every stored box of `page`
    pub fn clear_coordinates(&self, page: &Page) -> AnnotatorResult<CacheEntry> {
        self.save(page, CacheUpdate::new().clear_coordinates())
    }

    /// Drop stored entities and boxes (the "clear annotations" action)
    pub fn clear_annotations(&self, page: &Page) -> AnnotatorResult<CacheEntry> {
        self.save(page, CacheUpdate::new().clear_entities().clear_coordinates())
    }

    /// Replace the geometry of the box at `index`
    pub fn update_box(&self, page: &Page, index: usize, coords: ModelRect) -> AnnotatorResult<BoxRecord> {
        let mut boxes = self.load(page).coordinates.unwrap_or_default();
        let len = boxes.len();
        let record = boxes
            .get_mut(index)
            .ok_or(AnnotatorError::InvalidBoxIndex { index, len })?;
        record.coords = coords;
        let updated = record.clone();
        self.save(page, CacheUpdate::new().coordinates(boxes))?;
        Ok(updated)
    }

    /// Remove the box at `index`; later boxes shift down by one
    pub fn remove_box(&self, page: &Page, index: usize) -> AnnotatorResult<BoxRecord> {
        let mut boxes = self.load(page).coordinates.unwrap_or_default();
        if index >= boxes.len() {
            return Err(AnnotatorError::InvalidBoxIndex {
                index,
                len: boxes.len(),
            });
        }
        let removed = boxes.remove(index);
        self.save(page, CacheUpdate::new().coordinates(boxes))?;
        Ok(removed)
    }

    fn write(&self, path: &Path, entry: &CacheEntry) -> AnnotatorResult<()> {
        let json = if self.compact {
            serde_json::to_string(entry)
        } else {
            serde_json::to_string_pretty(entry)
        }
        .map_err(|e| AnnotatorError::General(e.into()))?;

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| AnnotatorError::persistence(&tmp, e))?;
        fs::rename(&tmp, path).map_err(|e| AnnotatorError::persistence(path, e))?;
        Ok(())
    }
}

fn err_source(err: &AnnotatorError) -> String {
    std::error::Error::source(err)
        .map(|s| s.to_string())
        .unwrap_or_default()
}
