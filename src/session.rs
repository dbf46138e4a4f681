//! Interactive-thread owner of the open folder.
//!
//! Long-running collaborator calls run on short-lived worker threads. A
//! worker never touches session state: it sends an immutable
//! [`WorkerMessage`] back over a channel, and [`Session::drain_messages`]
//! applies the results. Each message carries the page generation it was
//! started for, so results arriving after the user moved to another page
//! are dropped.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cache::{CacheEntry, CacheUpdate, PageCacheStore};
use crate::canvas::BoxCanvas;
use crate::checksum::{self, TextDigest};
use crate::collaborators::{
    find_entity_spans, EntityExtractor, GeometryLocator, Synthesizer, Transcriber,
};
use crate::config::AnnotatorConfig;
use crate::editor::{BoxEditor, EditorState};
use crate::error::{AnnotatorError, AnnotatorResult};
use crate::geometry::{ImageSize, ViewPoint, ViewState};
use crate::log_error;
use crate::model::{BoxRecord, EntitySet};
use crate::page::{Page, PageSet};

/// Collaborator handles shared with worker threads
#[derive(Clone, Default)]
pub struct Collaborators {
    pub transcriber: Option<Arc<dyn Transcriber>>,
    pub extractor: Option<Arc<dyn EntityExtractor>>,
    pub locator: Option<Arc<dyn GeometryLocator>>,
    pub synthesizer: Option<Arc<dyn Synthesizer>>,
}

/// Kind of background work, at most one of each in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Task {
    Transcription,
    Entities,
    Boxes,
    Speech,
}

impl Task {
    pub fn label(&self) -> &'static str {
        match self {
            Task::Transcription => "transcription",
            Task::Entities => "entity extraction",
            Task::Boxes => "box location",
            Task::Speech => "speech synthesis",
        }
    }
}

/// Answer to a request: served from the cache, or started in the background
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    Cached(T),
    Pending,
}

/// Result sent from a worker thread
#[derive(Debug)]
pub enum WorkerMessage {
    TranscriptChunk {
        generation: u64,
        chunk: String,
    },
    TranscriptDone {
        generation: u64,
        result: AnnotatorResult<()>,
    },
    Entities {
        generation: u64,
        checksum: TextDigest,
        result: AnnotatorResult<EntitySet>,
    },
    /// Boxes together with the entities they were located for
    Boxes {
        generation: u64,
        checksum: TextDigest,
        result: AnnotatorResult<(EntitySet, Vec<BoxRecord>)>,
    },
    Speech {
        generation: u64,
        checksum: TextDigest,
        result: AnnotatorResult<PathBuf>,
    },
}

impl WorkerMessage {
    fn generation(&self) -> u64 {
        match self {
            WorkerMessage::TranscriptChunk { generation, .. }
            | WorkerMessage::TranscriptDone { generation, .. }
            | WorkerMessage::Entities { generation, .. }
            | WorkerMessage::Boxes { generation, .. }
            | WorkerMessage::Speech { generation, .. } => *generation,
        }
    }
}

/// What changed after applying worker results, for the front end to show
#[derive(Debug)]
pub enum SessionEvent {
    TranscriptChunk(String),
    TranscriptSaved,
    EntitiesReady(EntitySet),
    BoxesReady(usize),
    AudioReady(PathBuf),
    Failed { task: Task, error: AnnotatorError },
}

pub struct Session<C: BoxCanvas> {
    config: AnnotatorConfig,
    pages: PageSet,
    store: PageCacheStore,
    collaborators: Collaborators,
    canvas: C,
    editor: BoxEditor,
    view: ViewState,
    image: Option<ImageSize>,
    transcript: String,
    generation: u64,
    pending: HashSet<Task>,
    audio: Option<PathBuf>,
    pan_anchor: Option<ViewPoint>,
    tx: Sender<WorkerMessage>,
    rx: Receiver<WorkerMessage>,
}

impl<C: BoxCanvas> Session<C> {
    /// Open `folder` and activate its first page, if any
    pub fn open(
        folder: impl AsRef<Path>,
        config: AnnotatorConfig,
        collaborators: Collaborators,
        mut canvas: C,
    ) -> AnnotatorResult<Self> {
        let pages = PageSet::open(folder)?;
        let (tx, rx) = mpsc::channel();
        canvas.set_font_size(config.editor.font_size);
        let mut session = Self {
            editor: BoxEditor::new(&config.editor),
            config,
            pages,
            store: PageCacheStore::new(),
            collaborators,
            canvas,
            view: ViewState::default(),
            image: None,
            transcript: String::new(),
            generation: 0,
            pending: HashSet::new(),
            audio: None,
            pan_anchor: None,
            tx,
            rx,
        };
        if !session.pages.is_empty() {
            if let Err(e) = session.activate(0) {
                log_error!(&e, "opening first page");
            }
        }
        Ok(session)
    }

    pub fn pages(&self) -> &PageSet {
        &self.pages
    }

    pub fn page(&self) -> Option<&Page> {
        self.pages.active()
    }

    pub fn canvas(&self) -> &C {
        &self.canvas
    }

    pub fn editor(&self) -> &BoxEditor {
        &self.editor
    }

    pub fn view(&self) -> &ViewState {
        &self.view
    }

    pub fn image_size(&self) -> Option<ImageSize> {
        self.image
    }

    pub fn transcript(&self) -> &str {
        &self.transcript
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_pending(&self, task: Task) -> bool {
        self.pending.contains(&task)
    }

    pub fn config(&self) -> &AnnotatorConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut AnnotatorConfig {
        &mut self.config
    }

    /// Sidecar record of the active page
    pub fn cache_entry(&self) -> AnnotatorResult<CacheEntry> {
        Ok(self.store.load(self.active_page()?))
    }

    fn active_page(&self) -> AnnotatorResult<&Page> {
        self.pages.active().ok_or(AnnotatorError::NoActivePage)
    }

    /// Load page `index`: transcript, image size and a fresh view. Results
    /// still in flight for the previous page are discarded when they land.
    pub fn activate(&mut self, index: usize) -> AnnotatorResult<()> {
        if self.pages.get(index).is_none() {
            return Err(AnnotatorError::NoActivePage);
        }
        self.pages.select(index);
        self.generation += 1;
        self.pending.clear();
        self.audio = None;
        self.pan_anchor = None;
        self.editor.clear(&mut self.canvas);

        let page = self.active_page()?;
        info!(page = %page.name, position = %self.pages.position_label(), "Activating page");
        let transcript = page.read_transcript()?;
        let image = page.image_size();

        self.transcript = transcript;
        match image {
            Ok(size) => {
                self.image = Some(size);
                self.view = ViewState::fit(size, self.config.viewer.max_initial_width);
                self.render();
                Ok(())
            }
            Err(e) => {
                self.image = None;
                self.view = ViewState::default();
                Err(e)
            }
        }
    }

    pub fn next_page(&mut self) -> AnnotatorResult<bool> {
        self.step(|pages| pages.active_index().map(|i| i + 1))
    }

    pub fn prev_page(&mut self) -> AnnotatorResult<bool> {
        self.step(|pages| pages.active_index().and_then(|i| i.checked_sub(1)))
    }

    fn step(&mut self, target: impl FnOnce(&PageSet) -> Option<usize>) -> AnnotatorResult<bool> {
        match target(&self.pages) {
            Some(index) if index < self.pages.len() => {
                self.activate(index)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Replace the in-memory transcript (user typing)
    pub fn set_transcript(&mut self, text: impl Into<String>) {
        self.transcript = text.into();
        self.render();
    }

    /// Write the in-memory transcript to disk, normalized
    pub fn save_transcript(&mut self) -> AnnotatorResult<()> {
        let text = std::mem::take(&mut self.transcript);
        let page = self
            .pages
            .active_mut()
            .ok_or(AnnotatorError::NoActivePage)?;
        let written = page.write_transcript(&text).and_then(|_| page.read_transcript());
        match written {
            Ok(saved) => {
                self.transcript = saved;
                self.render();
                Ok(())
            }
            Err(e) => {
                self.transcript = text;
                Err(e)
            }
        }
    }

    /// Byte ranges of cached entity names in the transcript, for highlighting
    pub fn highlight_spans(&self) -> Vec<std::ops::Range<usize>> {
        let Ok(entry) = self.cache_entry() else {
            return Vec::new();
        };
        match entry.entities_for(&self.transcript) {
            Some(entities) => {
                let names: Vec<String> = entities
                    .flatten()
                    .into_iter()
                    .map(|record| record.surface_form)
                    .collect();
                find_entity_spans(&self.transcript, &names)
            }
            None => Vec::new(),
        }
    }

    /// Start streaming transcription of the active page into the transcript
    pub fn request_transcription(&mut self) -> AnnotatorResult<()> {
        let transcriber = self
            .collaborators
            .transcriber
            .clone()
            .ok_or_else(|| AnnotatorError::configuration("no transcriber configured"))?;
        if !self.pending.insert(Task::Transcription) {
            return Ok(());
        }
        let image = match self.active_page().and_then(Page::read_image) {
            Ok(image) => image,
            Err(e) => {
                self.pending.remove(&Task::Transcription);
                return Err(e);
            }
        };
        self.transcript.clear();

        let generation = self.generation;
        let tx = self.tx.clone();
        thread::spawn(move || {
            let result = transcriber.transcribe_stream(&image, &mut |chunk| {
                let _ = tx.send(WorkerMessage::TranscriptChunk { generation, chunk });
            });
            let _ = tx.send(WorkerMessage::TranscriptDone { generation, result });
        });
        Ok(())
    }

    /// Entities of the current transcript, extracted in the background on
    /// a cache miss
    pub fn request_entities(&mut self) -> AnnotatorResult<Lookup<EntitySet>> {
        let entry = self.cache_entry()?;
        if let Some(entities) = entry.entities_for(&self.transcript) {
            debug!(count = entities.len(), "Entity cache hit");
            return Ok(Lookup::Cached(entities.clone()));
        }
        let extractor = self
            .collaborators
            .extractor
            .clone()
            .ok_or_else(|| AnnotatorError::configuration("no entity extractor configured"))?;
        if !self.pending.insert(Task::Entities) {
            return Ok(Lookup::Pending);
        }

        let text = self.transcript.clone();
        let checksum = checksum::digest(&text);
        let generation = self.generation;
        let tx = self.tx.clone();
        thread::spawn(move || {
            let result = extractor.extract(&text);
            let _ = tx.send(WorkerMessage::Entities {
                generation,
                checksum,
                result,
            });
        });
        Ok(Lookup::Pending)
    }

    /// Boxes of the current transcript's entities. A miss locates them in
    /// the background, extracting the entities first when those are stale.
    pub fn request_boxes(&mut self) -> AnnotatorResult<Lookup<Vec<BoxRecord>>> {
        let entry = self.cache_entry()?;
        if let Some(boxes) = entry.boxes_for(&self.transcript) {
            debug!(count = boxes.len(), "Box cache hit");
            return Ok(Lookup::Cached(boxes.to_vec()));
        }
        let locator = self
            .collaborators
            .locator
            .clone()
            .ok_or_else(|| AnnotatorError::configuration("no geometry locator configured"))?;
        let cached = entry.entities_for(&self.transcript).cloned();
        let extractor = match cached {
            Some(_) => None,
            None => Some(self.collaborators.extractor.clone().ok_or_else(|| {
                AnnotatorError::configuration("no entity extractor configured")
            })?),
        };
        if !self.pending.insert(Task::Boxes) {
            return Ok(Lookup::Pending);
        }
        let image = match self.active_page().and_then(Page::read_image) {
            Ok(image) => image,
            Err(e) => {
                self.pending.remove(&Task::Boxes);
                return Err(e);
            }
        };

        let text = self.transcript.clone();
        let checksum = checksum::digest(&text);
        let generation = self.generation;
        let tx = self.tx.clone();
        thread::spawn(move || {
            let entities = match (cached, extractor) {
                (Some(entities), _) => Ok(entities),
                (None, Some(extractor)) => extractor.extract(&text),
                (None, None) => Ok(EntitySet::new()),
            };
            let result = entities.and_then(|entities| {
                let boxes = locator.locate(&image, &entities)?;
                Ok((entities, boxes))
            });
            let _ = tx.send(WorkerMessage::Boxes {
                generation,
                checksum,
                result,
            });
        });
        Ok(Lookup::Pending)
    }

    /// Audio reading the transcript in the configured language
    pub fn request_speech(&mut self) -> AnnotatorResult<Lookup<PathBuf>> {
        let entry = self.cache_entry()?;
        if let Some(path) = &self.audio {
            if entry.audio_current(&self.transcript) {
                return Ok(Lookup::Cached(path.clone()));
            }
        }
        let synthesizer = self
            .collaborators
            .synthesizer
            .clone()
            .ok_or_else(|| AnnotatorError::configuration("no speech synthesizer configured"))?;
        if !self.pending.insert(Task::Speech) {
            return Ok(Lookup::Pending);
        }

        let text = self.transcript.clone();
        let language = self.config.speech.language.clone();
        let checksum = checksum::digest(&text);
        let generation = self.generation;
        let tx = self.tx.clone();
        thread::spawn(move || {
            let result = synthesizer.synthesize(&text, &language);
            let _ = tx.send(WorkerMessage::Speech {
                generation,
                checksum,
                result,
            });
        });
        Ok(Lookup::Pending)
    }

    /// Drop cached entities and every box of the active page
    pub fn clear_annotations(&mut self) -> AnnotatorResult<()> {
        self.store.clear_annotations(self.active_page()?)?;
        self.render();
        Ok(())
    }

    /// Apply every worker result that has arrived so far
    pub fn drain_messages(&mut self) -> Vec<SessionEvent> {
        let messages: Vec<WorkerMessage> = self.rx.try_iter().collect();
        messages
            .into_iter()
            .filter_map(|message| self.apply(message))
            .collect()
    }

    /// Block up to `timeout` for the first result, then drain the rest
    pub fn wait_for_messages(&mut self, timeout: Duration) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        match self.rx.recv_timeout(timeout) {
            Ok(message) => events.extend(self.apply(message)),
            Err(RecvTimeoutError::Timeout) => return events,
            // The session holds a sender, so the channel never disconnects
            Err(RecvTimeoutError::Disconnected) => return events,
        }
        events.extend(self.drain_messages());
        events
    }

    fn apply(&mut self, message: WorkerMessage) -> Option<SessionEvent> {
        if message.generation() != self.generation {
            debug!(
                stale = message.generation(),
                current = self.generation,
                "Discarding result for a page no longer shown"
            );
            return None;
        }

        match message {
            WorkerMessage::TranscriptChunk { chunk, .. } => {
                self.transcript.push_str(&chunk);
                Some(SessionEvent::TranscriptChunk(chunk))
            }
            WorkerMessage::TranscriptDone { result, .. } => {
                self.pending.remove(&Task::Transcription);
                Some(match result.and_then(|_| self.save_transcript()) {
                    Ok(()) => SessionEvent::TranscriptSaved,
                    Err(error) => self.failed(Task::Transcription, error),
                })
            }
            WorkerMessage::Entities {
                checksum, result, ..
            } => {
                self.pending.remove(&Task::Entities);
                let saved = result.and_then(|entities| {
                    let update = CacheUpdate::new()
                        .checksum(checksum)
                        .entities(entities.clone())
                        .clear_coordinates();
                    self.store.save(self.active_page()?, update)?;
                    Ok(entities)
                });
                Some(match saved {
                    Ok(entities) => {
                        self.render();
                        SessionEvent::EntitiesReady(entities)
                    }
                    Err(error) => self.failed(Task::Entities, error),
                })
            }
            WorkerMessage::Boxes {
                checksum, result, ..
            } => {
                self.pending.remove(&Task::Boxes);
                // checksum, entities and boxes always land together
                let saved = result.and_then(|(entities, boxes)| {
                    let count = boxes.len();
                    let update = CacheUpdate::new()
                        .checksum(checksum)
                        .entities(entities)
                        .coordinates(boxes);
                    self.store.save(self.active_page()?, update)?;
                    Ok(count)
                });
                Some(match saved {
                    Ok(count) => {
                        self.render();
                        SessionEvent::BoxesReady(count)
                    }
                    Err(error) => self.failed(Task::Boxes, error),
                })
            }
            WorkerMessage::Speech {
                checksum, result, ..
            } => {
                self.pending.remove(&Task::Speech);
                let saved = result.and_then(|path| {
                    self.store
                        .save(self.active_page()?, CacheUpdate::new().tts_checksum(checksum))?;
                    Ok(path)
                });
                Some(match saved {
                    Ok(path) => {
                        self.audio = Some(path.clone());
                        SessionEvent::AudioReady(path)
                    }
                    Err(error) => self.failed(Task::Speech, error),
                })
            }
        }
    }

    fn failed(&self, task: Task, error: AnnotatorError) -> SessionEvent {
        log_error!(&error, task.label());
        SessionEvent::Failed { task, error }
    }

    /// Redraw the boxes valid for the current transcript
    fn render(&mut self) {
        let Some(image) = self.image else {
            self.editor.clear(&mut self.canvas);
            return;
        };
        let boxes = match self.pages.active() {
            Some(page) => self
                .store
                .load(page)
                .boxes_for(&self.transcript)
                .map(<[BoxRecord]>::to_vec)
                .unwrap_or_default(),
            None => Vec::new(),
        };
        self.editor.render(&mut self.canvas, &boxes, image, &self.view);
    }

    /// Pointer pressed on the canvas. A modified click deletes the box
    /// under the pointer; a press on empty canvas starts panning.
    pub fn pointer_press(&mut self, point: ViewPoint, modified: bool) -> AnnotatorResult<()> {
        if modified {
            if let Some(index) = self.editor.delete_at(point) {
                let removed = self.store.remove_box(self.active_page()?, index);
                self.render();
                let removed = removed?;
                info!(index, name = %removed.name, "Box deleted");
            }
            return Ok(());
        }
        if !self.editor.press(point) {
            self.pan_anchor = Some(point);
        }
        Ok(())
    }

    pub fn pointer_motion(&mut self, point: ViewPoint) {
        if !matches!(self.editor.state(), EditorState::Idle) {
            self.editor.motion(&mut self.canvas, point);
        } else if let Some(anchor) = self.pan_anchor {
            self.view.pan_by(point.x - anchor.x, point.y - anchor.y);
            self.pan_anchor = Some(point);
            self.render();
        }
    }

    /// Pointer released: a finished drag is written to the sidecar
    pub fn pointer_release(&mut self) -> AnnotatorResult<Option<BoxRecord>> {
        self.pan_anchor = None;
        let Some(image) = self.image else {
            return Ok(None);
        };
        let Some(edit) = self.editor.release(image, &self.view) else {
            return Ok(None);
        };
        match self.store.update_box(self.active_page()?, edit.index, edit.coords) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!(index = edit.index, error = %e, "Box edit rejected");
                self.render();
                Err(e)
            }
        }
    }

    /// Abort a drag in progress
    pub fn pointer_cancel(&mut self) {
        self.pan_anchor = None;
        self.editor.cancel(&mut self.canvas);
    }

    /// One wheel step, towards the viewer when `zoom_in`
    pub fn zoom(&mut self, zoom_in: bool) {
        let factor = if zoom_in {
            self.config.viewer.zoom_in_factor
        } else {
            self.config.viewer.zoom_out_factor
        };
        self.view.zoom(factor);
        self.render();
    }

    /// Step the label font size and redraw
    pub fn change_font_size(&mut self, delta: i32) {
        self.config.change_font_size(delta);
        self.canvas.set_font_size(self.config.editor.font_size);
        self.render();
    }

    pub fn reset_view(&mut self) {
        self.view = match self.image {
            Some(image) => ViewState::fit(image, self.config.viewer.max_initial_width),
            None => ViewState::default(),
        };
        self.render();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::{Scene, SceneItem};
    use crate::model::{Category, ModelRect};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::{tempdir, TempDir};

    struct Echo;

    impl Transcriber for Echo {
        fn transcribe(&self, _image: &[u8]) -> AnnotatorResult<String> {
            Ok("Jan Kowalski z Radomia".to_string())
        }

        fn transcribe_stream(
            &self,
            image: &[u8],
            on_chunk: &mut dyn FnMut(String),
        ) -> AnnotatorResult<()> {
            let text = self.transcribe(image)?;
            for word in text.split_inclusive(' ') {
                on_chunk(word.to_string());
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingExtractor {
        calls: AtomicUsize,
    }

    impl EntityExtractor for CountingExtractor {
        fn extract(&self, _text: &str) -> AnnotatorResult<EntitySet> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut entities = EntitySet::new();
            entities.push(Category::Person, "Jan Kowalski");
            entities.push(Category::Location, "Radom");
            Ok(entities)
        }
    }

    /// Tags the first word of the text as a person
    struct FirstWordExtractor;

    impl EntityExtractor for FirstWordExtractor {
        fn extract(&self, text: &str) -> AnnotatorResult<EntitySet> {
            let mut entities = EntitySet::new();
            if let Some(word) = text.split_whitespace().next() {
                entities.push(Category::Person, word);
            }
            Ok(entities)
        }
    }

    #[derive(Default)]
    struct FixedLocator {
        calls: AtomicUsize,
    }

    impl GeometryLocator for FixedLocator {
        fn locate(&self, _image: &[u8], entities: &EntitySet) -> AnnotatorResult<Vec<BoxRecord>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(entities
                .flatten()
                .into_iter()
                .enumerate()
                .map(|(i, record)| BoxRecord {
                    name: record.surface_form,
                    category: record.category,
                    coords: ModelRect::new(100, 100 + 300 * i as u16, 300, 300 + 300 * i as u16)
                        .unwrap(),
                })
                .collect())
        }
    }

    /// Holds every call until the test releases it
    struct GatedLocator {
        gate: Mutex<Receiver<()>>,
    }

    impl GatedLocator {
        fn new() -> (Self, Sender<()>) {
            let (tx, rx) = mpsc::channel();
            (Self { gate: Mutex::new(rx) }, tx)
        }
    }

    impl GeometryLocator for GatedLocator {
        fn locate(&self, image: &[u8], entities: &EntitySet) -> AnnotatorResult<Vec<BoxRecord>> {
            self.gate.lock().unwrap().recv().unwrap();
            FixedLocator::default().locate(image, entities)
        }
    }

    struct FakeSynthesizer {
        calls: AtomicUsize,
        out: PathBuf,
    }

    impl Synthesizer for FakeSynthesizer {
        fn synthesize(&self, _text: &str, language: &str) -> AnnotatorResult<PathBuf> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.out.join(format!("reading-{}-{}.wav", language, n)))
        }
    }

    fn folder() -> TempDir {
        let dir = tempdir().unwrap();
        for name in ["a.png", "b.png"] {
            image::RgbImage::new(1000, 1000)
                .save(dir.path().join(name))
                .unwrap();
        }
        std::fs::write(dir.path().join("a.txt"), "Jan Kowalski z Radomia\n").unwrap();
        dir
    }

    fn session(dir: &TempDir, extractor: Arc<CountingExtractor>) -> Session<Scene> {
        session_with(
            dir,
            Collaborators {
                transcriber: Some(Arc::new(Echo)),
                extractor: Some(extractor),
                locator: Some(Arc::new(FixedLocator::default())),
                synthesizer: None,
            },
        )
    }

    fn session_with(dir: &TempDir, collaborators: Collaborators) -> Session<Scene> {
        Session::open(dir.path(), AnnotatorConfig::default(), collaborators, Scene::default())
            .unwrap()
    }

    fn settle(session: &mut Session<Scene>) -> Vec<SessionEvent> {
        session.wait_for_messages(Duration::from_secs(5))
    }

    #[test]
    fn test_entities_served_from_cache_until_text_changes() {
        let dir = folder();
        let extractor = Arc::new(CountingExtractor::default());
        let mut session = session(&dir, extractor.clone());

        assert_eq!(session.request_entities().unwrap(), Lookup::Pending);
        let events = settle(&mut session);
        assert!(matches!(events.as_slice(), [SessionEvent::EntitiesReady(_)]));

        assert!(matches!(session.request_entities().unwrap(), Lookup::Cached(_)));
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
        assert_eq!(session.highlight_spans().len(), 2);

        session.set_transcript("Jan Kowalski z Radomia.\n");
        assert_eq!(session.request_entities().unwrap(), Lookup::Pending);
        settle(&mut session);
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_boxes_extract_locate_and_render() {
        let dir = folder();
        let extractor = Arc::new(CountingExtractor::default());
        let mut session = session(&dir, extractor.clone());

        assert_eq!(session.request_boxes().unwrap(), Lookup::Pending);
        let events = settle(&mut session);
        assert!(matches!(events.as_slice(), [SessionEvent::BoxesReady(2)]));
        assert_eq!(session.editor().box_count(), 2);

        let entry = session.cache_entry().unwrap();
        assert_eq!(entry.entities.as_ref().map(EntitySet::len), Some(2));
        assert_eq!(entry.checksum, Some(checksum::digest(session.transcript())));

        // edited text hides the boxes, and re-extraction drops them
        session.set_transcript("Jan Kowalski z Radomia i Kielc\n");
        assert_eq!(session.editor().box_count(), 0);
        assert_eq!(session.request_entities().unwrap(), Lookup::Pending);
        settle(&mut session);
        assert_eq!(session.cache_entry().unwrap().coordinates, None);
    }

    #[test]
    fn test_results_for_previous_page_are_discarded() {
        let dir = folder();
        let mut session = session(&dir, Arc::new(CountingExtractor::default()));

        session.request_entities().unwrap();
        assert!(session.next_page().unwrap());
        let events = settle(&mut session);
        assert!(events.is_empty());
        assert_eq!(session.page().unwrap().name, "b");
        assert!(session.cache_entry().unwrap().entities.is_none());
        assert!(!session.page().unwrap().sidecar.exists());
    }

    #[test]
    fn test_streaming_transcription_writes_file() {
        let dir = folder();
        let mut session = session(&dir, Arc::new(CountingExtractor::default()));
        session.activate(1).unwrap();

        session.request_transcription().unwrap();
        assert!(session.is_pending(Task::Transcription));
        let mut events = Vec::new();
        while session.is_pending(Task::Transcription) {
            events.extend(settle(&mut session));
        }

        let chunks: String = events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::TranscriptChunk(chunk) => Some(chunk.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(chunks, "Jan Kowalski z Radomia");
        assert!(matches!(events.last(), Some(SessionEvent::TranscriptSaved)));
        assert_eq!(session.transcript(), "Jan Kowalski z Radomia\n");
        assert_eq!(
            session.page().unwrap().read_transcript().unwrap(),
            "Jan Kowalski z Radomia\n"
        );
    }

    #[test]
    fn test_box_drag_and_delete_persist() {
        let dir = folder();
        let mut session = session(&dir, Arc::new(CountingExtractor::default()));
        session.request_boxes().unwrap();
        settle(&mut session);

        // first box spans view (100,100)-(300,300) at scale 1
        session.pointer_press(ViewPoint::new(300.0, 300.0), false).unwrap();
        session.pointer_motion(ViewPoint::new(350.0, 320.0));
        let edited = session.pointer_release().unwrap().unwrap();
        assert_eq!(edited.coords, ModelRect::new(100, 100, 320, 350).unwrap());

        session.pointer_press(ViewPoint::new(150.0, 150.0), true).unwrap();
        let entry = session.cache_entry().unwrap();
        let boxes = entry.boxes();
        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].name, "Radom");
        assert_eq!(session.editor().box_count(), 1);
        assert!(!session.editor().is_stale());
    }

    #[test]
    fn test_deleting_every_box_is_not_a_cache_miss() {
        let dir = folder();
        let locator = Arc::new(FixedLocator::default());
        let mut session = session_with(
            &dir,
            Collaborators {
                extractor: Some(Arc::new(CountingExtractor::default())),
                locator: Some(locator.clone()),
                ..Collaborators::default()
            },
        );
        session.request_boxes().unwrap();
        settle(&mut session);
        assert_eq!(session.editor().box_count(), 2);

        // Radom moves up to index 0 but keeps its place on the page
        session.pointer_press(ViewPoint::new(150.0, 150.0), true).unwrap();
        session.pointer_press(ViewPoint::new(450.0, 150.0), true).unwrap();
        assert_eq!(session.editor().box_count(), 0);

        assert_eq!(session.request_boxes().unwrap(), Lookup::Cached(Vec::new()));
        assert_eq!(locator.calls.load(Ordering::SeqCst), 1);
        assert!(!session.is_pending(Task::Boxes));
    }

    #[test]
    fn test_late_boxes_keep_the_entities_they_were_located_for() {
        let dir = folder();
        let (locator, release) = GatedLocator::new();
        let mut session = session_with(
            &dir,
            Collaborators {
                extractor: Some(Arc::new(FirstWordExtractor)),
                locator: Some(Arc::new(locator)),
                ..Collaborators::default()
            },
        );
        let original = session.transcript().to_string();

        // the locator holds on to entities extracted from the original text
        assert_eq!(session.request_boxes().unwrap(), Lookup::Pending);
        session.set_transcript("Anna z Kielc\n");
        assert_eq!(session.request_entities().unwrap(), Lookup::Pending);
        let events = settle(&mut session);
        assert!(matches!(events.as_slice(), [SessionEvent::EntitiesReady(_)]));

        release.send(()).unwrap();
        let events = settle(&mut session);
        assert!(matches!(events.as_slice(), [SessionEvent::BoxesReady(1)]));

        let entry = session.cache_entry().unwrap();
        assert_eq!(entry.checksum, Some(checksum::digest(&original)));
        let people = entry.entities_for(&original).unwrap().names(Category::Person);
        assert_eq!(people, &["Jan".to_string()][..]);
        assert_eq!(entry.boxes_for(&original).unwrap()[0].name, "Jan");
        assert!(entry.entities_for("Anna z Kielc\n").is_none());
    }

    #[test]
    fn test_speech_cache_follows_text_and_leaves_annotations_alone() {
        let dir = folder();
        let synthesizer = Arc::new(FakeSynthesizer {
            calls: AtomicUsize::new(0),
            out: dir.path().to_path_buf(),
        });
        let mut session = session_with(
            &dir,
            Collaborators {
                extractor: Some(Arc::new(CountingExtractor::default())),
                locator: Some(Arc::new(FixedLocator::default())),
                synthesizer: Some(synthesizer.clone()),
                ..Collaborators::default()
            },
        );
        session.request_boxes().unwrap();
        settle(&mut session);
        let annotated = session.cache_entry().unwrap();
        assert_eq!(annotated.tts_checksum, None);

        assert_eq!(session.request_speech().unwrap(), Lookup::Pending);
        let events = settle(&mut session);
        let path = match events.as_slice() {
            [SessionEvent::AudioReady(path)] => path.clone(),
            other => panic!("unexpected events: {:?}", other),
        };
        let entry = session.cache_entry().unwrap();
        assert_eq!(entry.tts_checksum, Some(checksum::digest(session.transcript())));
        assert_eq!(entry.checksum, annotated.checksum);
        assert_eq!(entry.entities, annotated.entities);
        assert_eq!(entry.coordinates, annotated.coordinates);
        assert_eq!(session.editor().box_count(), 2);

        assert_eq!(session.request_speech().unwrap(), Lookup::Cached(path));
        assert_eq!(synthesizer.calls.load(Ordering::SeqCst), 1);

        session.set_transcript("Jan Kowalski z Radomia i Kielc\n");
        assert_eq!(session.request_speech().unwrap(), Lookup::Pending);
        settle(&mut session);
        assert_eq!(synthesizer.calls.load(Ordering::SeqCst), 2);
        let entry = session.cache_entry().unwrap();
        assert_eq!(entry.tts_checksum, Some(checksum::digest(session.transcript())));
        assert_eq!(entry.checksum, annotated.checksum);
    }

    #[test]
    fn test_font_size_change_redraws_labels() {
        let dir = folder();
        let mut session = session(&dir, Arc::new(CountingExtractor::default()));
        session.request_boxes().unwrap();
        settle(&mut session);

        let label_height = |session: &Session<Scene>| {
            session
                .canvas()
                .items()
                .find_map(|(_, item)| match item {
                    SceneItem::Label { rect, text } if text == "Radom" => Some(rect.y2 - rect.y1),
                    _ => None,
                })
                .unwrap()
        };
        assert_eq!(label_height(&session), 12.0);

        session.change_font_size(8);
        assert_eq!(session.config().editor.font_size, 20);
        assert_eq!(label_height(&session), 20.0);
    }

    #[test]
    fn test_pan_on_empty_canvas() {
        let dir = folder();
        let mut session = session(&dir, Arc::new(CountingExtractor::default()));
        session.pointer_press(ViewPoint::new(900.0, 900.0), false).unwrap();
        session.pointer_motion(ViewPoint::new(880.0, 910.0));
        assert_eq!(session.pointer_release().unwrap(), None);
        assert_eq!((session.view().pan_x, session.view().pan_y), (-20.0, 10.0));

        session.zoom(true);
        assert!((session.view().scale() - 1.1).abs() < 1e-9);
        session.reset_view();
        assert_eq!(*session.view(), ViewState::default());
    }

    #[test]
    fn test_missing_collaborator_is_reported() {
        let dir = folder();
        let mut session = session(&dir, Arc::new(CountingExtractor::default()));
        assert!(matches!(
            session.request_speech(),
            Err(AnnotatorError::Configuration { .. })
        ));
    }
}
