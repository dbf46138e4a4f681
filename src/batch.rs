//! Sequential batch transcription over a selection of pages.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{info, warn};

use crate::collaborators::Transcriber;
use crate::error::AnnotatorError;
use crate::logging::PerformanceTimer;
use crate::page::Page;

/// Progress report of a running batch
#[derive(Debug)]
pub enum BatchEvent {
    /// About to transcribe item `index` (zero-based) of `total`
    Progress {
        index: usize,
        total: usize,
        page_name: String,
    },
    ItemFailed {
        page_name: String,
        error: AnnotatorError,
    },
    /// Always the last event, whether the batch ran to the end or stopped
    Done { total: usize, error_count: usize },
}

/// Counts reported when a batch finishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub processed: usize,
    pub error_count: usize,
}

pub struct BatchCoordinator {
    transcriber: Arc<dyn Transcriber>,
}

impl BatchCoordinator {
    pub fn new(transcriber: Arc<dyn Transcriber>) -> Self {
        Self { transcriber }
    }

    /// Transcribe `pages` strictly in order, one at a time. `alive` is
    /// checked before every item; once it reads false the batch stops
    /// without counting the remaining pages as failures.
    pub fn run(
        &self,
        pages: &mut [Page],
        alive: &AtomicBool,
        mut on_event: impl FnMut(BatchEvent),
    ) -> BatchSummary {
        let _timer = PerformanceTimer::start("batch transcription");
        let total = pages.len();
        let mut processed = 0;
        let mut error_count = 0;

        for (index, page) in pages.iter_mut().enumerate() {
            if !alive.load(Ordering::SeqCst) {
                info!(index, total, "Batch stopped before completion");
                break;
            }
            on_event(BatchEvent::Progress {
                index,
                total,
                page_name: page.name.clone(),
            });

            let result = page
                .read_image()
                .and_then(|bytes| self.transcriber.transcribe(&bytes))
                .and_then(|text| page.write_transcript(&text));
            processed += 1;

            if let Err(error) = result {
                error_count += 1;
                warn!(page = %page.name, error = %error, "Batch item failed");
                on_event(BatchEvent::ItemFailed {
                    page_name: page.name.clone(),
                    error,
                });
            }
        }

        info!(total, processed, error_count, "Batch finished");
        on_event(BatchEvent::Done { total, error_count });
        BatchSummary {
            total,
            processed,
            error_count,
        }
    }

    /// Run on a worker thread. Events arrive on the returned receiver in
    /// the order they were produced.
    pub fn spawn(
        self,
        mut pages: Vec<Page>,
        alive: Arc<AtomicBool>,
    ) -> (Receiver<BatchEvent>, JoinHandle<BatchSummary>) {
        let (tx, rx) = mpsc::channel();
        let handle = thread::spawn(move || {
            self.run(&mut pages, &alive, |event| {
                // A dropped receiver only means nobody is listening anymore
                let _ = tx.send(event);
            })
        });
        (rx, handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AnnotatorResult;
    use crate::page::PageSet;
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// Echoes the image bytes back as text and fails on one marker
    struct FakeTranscriber {
        fail_on: &'static [u8],
        calls: Mutex<Vec<Vec<u8>>>,
    }

    impl Transcriber for FakeTranscriber {
        fn transcribe(&self, image: &[u8]) -> AnnotatorResult<String> {
            self.calls.lock().unwrap().push(image.to_vec());
            if image == self.fail_on {
                Err(AnnotatorError::transport("transcriber", "quota exceeded"))
            } else {
                Ok(format!("  {}  ", String::from_utf8_lossy(image)))
            }
        }
    }

    fn five_pages(dir: &std::path::Path) -> Vec<Page> {
        for i in 1..=5 {
            std::fs::write(dir.join(format!("page{}.jpg", i)), format!("scan {}", i)).unwrap();
        }
        std::fs::write(dir.join("page3.txt"), "old text\n").unwrap();
        PageSet::open(dir).unwrap().pages().to_vec()
    }

    #[test]
    fn test_failed_item_does_not_abort_batch() {
        let dir = tempdir().unwrap();
        let mut pages = five_pages(dir.path());
        let transcriber = Arc::new(FakeTranscriber {
            fail_on: b"scan 3",
            calls: Mutex::new(Vec::new()),
        });
        let coordinator = BatchCoordinator::new(transcriber.clone());

        let mut events = Vec::new();
        let summary = coordinator.run(&mut pages, &AtomicBool::new(true), |e| events.push(e));

        assert_eq!(summary.total, 5);
        assert_eq!(summary.error_count, 1);
        assert_eq!(transcriber.calls.lock().unwrap().len(), 5);

        for (i, page) in pages.iter().enumerate() {
            let text = page.read_transcript().unwrap();
            if i == 2 {
                assert_eq!(text, "old text\n");
            } else {
                assert_eq!(text, format!("scan {}\n", i + 1));
            }
        }

        let progress: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                BatchEvent::Progress { index, .. } => Some(*index),
                _ => None,
            })
            .collect();
        assert_eq!(progress, vec![0, 1, 2, 3, 4]);
        assert!(matches!(
            events.iter().find(|e| matches!(e, BatchEvent::ItemFailed { .. })),
            Some(BatchEvent::ItemFailed { page_name, .. }) if page_name == "page3"
        ));
        assert!(matches!(
            events.last(),
            Some(BatchEvent::Done { total: 5, error_count: 1 })
        ));
    }

    #[test]
    fn test_stopping_between_items() {
        let dir = tempdir().unwrap();
        let mut pages = five_pages(dir.path());
        let coordinator = BatchCoordinator::new(Arc::new(FakeTranscriber {
            fail_on: b"",
            calls: Mutex::new(Vec::new()),
        }));

        let alive = AtomicBool::new(true);
        let summary = coordinator.run(&mut pages, &alive, |event| {
            if let BatchEvent::Progress { index: 1, .. } = event {
                alive.store(false, Ordering::SeqCst);
            }
        });

        assert_eq!(summary.processed, 2);
        assert_eq!(summary.error_count, 0);
        assert_eq!(pages[1].read_transcript().unwrap(), "scan 2\n");
        assert_eq!(pages[2].read_transcript().unwrap(), "");
    }

    #[test]
    fn test_spawned_batch_reports_through_channel() {
        let dir = tempdir().unwrap();
        let pages = five_pages(dir.path());
        let coordinator = BatchCoordinator::new(Arc::new(FakeTranscriber {
            fail_on: b"scan 5",
            calls: Mutex::new(Vec::new()),
        }));

        let (rx, handle) = coordinator.spawn(pages, Arc::new(AtomicBool::new(true)));
        let events: Vec<_> = rx.iter().collect();
        let summary = handle.join().unwrap();

        assert_eq!(summary.error_count, 1);
        assert!(matches!(
            events.last(),
            Some(BatchEvent::Done { total: 5, error_count: 1 })
        ));
    }
}
