use std::cell::OnceCell;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::checksum::{self, TextDigest};
use crate::error::{AnnotatorError, AnnotatorResult};
use crate::geometry::ImageSize;

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// State of a page's transcript file on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptStatus {
    Missing,
    Empty,
    Ready,
}

impl TranscriptStatus {
    /// Pages without usable text are pre-selected for batch transcription
    pub fn needs_transcription(&self) -> bool {
        !matches!(self, TranscriptStatus::Ready)
    }

    pub fn label(&self) -> &'static str {
        match self {
            TranscriptStatus::Missing => "no transcript",
            TranscriptStatus::Empty => "empty transcript",
            TranscriptStatus::Ready => "ready",
        }
    }
}

/// One scanned image together with its transcript and sidecar files
#[derive(Debug, Clone)]
pub struct Page {
    pub name: String,
    pub image: PathBuf,
    pub transcript: PathBuf,
    pub sidecar: PathBuf,
    checksum: OnceCell<TextDigest>,
}

impl Page {
    pub fn new(folder: &Path, image_file: &str) -> Self {
        let image = folder.join(image_file);
        let name = image
            .file_stem()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();
        Self {
            transcript: folder.join(format!("{}.txt", name)),
            sidecar: folder.join(format!("{}.json", name)),
            image,
            name,
            checksum: OnceCell::new(),
        }
    }

    /// Transcript text; a missing file reads as empty
    pub fn read_transcript(&self) -> AnnotatorResult<String> {
        match fs::read_to_string(&self.transcript) {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(AnnotatorError::persistence(&self.transcript, e)),
        }
    }

    /// Overwrite the transcript. Surrounding whitespace is trimmed and a
    /// single trailing newline is kept for non-empty text.
    pub fn write_transcript(&mut self, text: &str) -> AnnotatorResult<()> {
        let mut content = text.trim().to_string();
        if !content.is_empty() {
            content.push('\n');
        }
        fs::write(&self.transcript, &content)
            .map_err(|e| AnnotatorError::persistence(&self.transcript, e))?;
        self.checksum.take();
        debug!(page = %self.name, bytes = content.len(), "Transcript saved");
        Ok(())
    }

    /// Digest of the transcript file, computed on first use
    pub fn checksum(&self) -> AnnotatorResult<TextDigest> {
        if let Some(digest) = self.checksum.get() {
            return Ok(digest.clone());
        }
        let digest = checksum::digest(&self.read_transcript()?);
        Ok(self.checksum.get_or_init(|| digest).clone())
    }

    pub fn transcript_status(&self) -> TranscriptStatus {
        match fs::metadata(&self.transcript) {
            Err(_) => TranscriptStatus::Missing,
            Ok(meta) if meta.len() == 0 => TranscriptStatus::Empty,
            Ok(_) => TranscriptStatus::Ready,
        }
    }

    pub fn read_image(&self) -> AnnotatorResult<Vec<u8>> {
        fs::read(&self.image).map_err(|e| AnnotatorError::persistence(&self.image, e))
    }

    /// Pixel size read from the image header
    pub fn image_size(&self) -> AnnotatorResult<ImageSize> {
        let (width, height) =
            image::image_dimensions(&self.image).map_err(|e| AnnotatorError::ImageUnreadable {
                path: self.image.clone(),
                source: e,
            })?;
        Ok(ImageSize::new(width, height))
    }
}

/// Pages of one opened folder and the active page cursor
#[derive(Debug, Clone, Default)]
pub struct PageSet {
    pub folder: PathBuf,
    pages: Vec<Page>,
    active: usize,
}

impl PageSet {
    /// Scan `folder` for page images, sorted by file name
    pub fn open(folder: impl AsRef<Path>) -> AnnotatorResult<Self> {
        let folder = folder.as_ref();
        let entries = fs::read_dir(folder).map_err(|e| AnnotatorError::persistence(folder, e))?;

        let mut images = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| AnnotatorError::persistence(folder, e))?;
            let file_name = entry.file_name().to_string_lossy().to_string();
            let is_image = Path::new(&file_name)
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
                .unwrap_or(false);
            if is_image && entry.path().is_file() {
                images.push(file_name);
            }
        }
        images.sort();

        let pages: Vec<Page> = images.iter().map(|img| Page::new(folder, img)).collect();
        info!("Opened {} with {} page(s)", folder.display(), pages.len());

        Ok(Self {
            folder: folder.to_path_buf(),
            pages,
            active: 0,
        })
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Page> {
        self.pages.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Page> {
        self.pages.get_mut(index)
    }

    pub fn find(&self, name: &str) -> Option<usize> {
        self.pages.iter().position(|p| p.name == name)
    }

    pub fn active_index(&self) -> Option<usize> {
        if self.pages.is_empty() {
            None
        } else {
            Some(self.active)
        }
    }

    pub fn active(&self) -> Option<&Page> {
        self.pages.get(self.active)
    }

    pub fn active_mut(&mut self) -> Option<&mut Page> {
        self.pages.get_mut(self.active)
    }

    /// Move the cursor; returns false when the index is out of range or
    /// already active
    pub fn select(&mut self, index: usize) -> bool {
        if index >= self.pages.len() || index == self.active {
            return false;
        }
        self.active = index;
        true
    }

    pub fn first(&mut self) -> bool {
        self.select(0)
    }

    pub fn last(&mut self) -> bool {
        self.select(self.pages.len().saturating_sub(1))
    }

    pub fn next(&mut self) -> bool {
        self.select(self.active + 1)
    }

    pub fn prev(&mut self) -> bool {
        match self.active.checked_sub(1) {
            Some(index) => self.select(index),
            None => false,
        }
    }

    /// Header text for the active page, e.g. `[2/14] akt_0002`
    pub fn position_label(&self) -> String {
        match self.active() {
            Some(page) => format!("[{}/{}] {}", self.active + 1, self.pages.len(), page.name),
            None => "No files".to_string(),
        }
    }

    /// Indices pre-selected for batch transcription: pages whose
    /// transcript is missing or empty
    pub fn default_batch_selection(&self) -> Vec<usize> {
        self.pages
            .iter()
            .enumerate()
            .filter(|(_, page)| page.transcript_status().needs_transcription())
            .map(|(index, _)| index)
            .collect()
    }
}
