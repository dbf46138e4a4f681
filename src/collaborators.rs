//! External services consumed by the annotation core, and helpers that
//! turn their raw text answers into typed records.
//!
//! The network transport of the model calls lives outside this crate; an
//! implementation only has to satisfy these traits. Every trait is
//! `Send + Sync` so a handle can be shared with worker threads.

use regex::Regex;
use serde::Deserialize;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::OnceLock;
use std::thread;
use tracing::debug;

use crate::error::{AnnotatorError, AnnotatorResult, ErrorContext};
use crate::model::{BoxRecord, Category, EntitySet, ModelRect};

/// Reads the text of a scanned page
pub trait Transcriber: Send + Sync {
    fn transcribe(&self, image: &[u8]) -> AnnotatorResult<String>;

    /// Streaming variant delivering chunks in arrival order. The default
    /// delivers the whole answer as one chunk.
    fn transcribe_stream(
        &self,
        image: &[u8],
        on_chunk: &mut dyn FnMut(String),
    ) -> AnnotatorResult<()> {
        let text = self.transcribe(image)?;
        on_chunk(text);
        Ok(())
    }
}

/// Extracts named entities from transcript text
pub trait EntityExtractor: Send + Sync {
    fn extract(&self, text: &str) -> AnnotatorResult<EntitySet>;
}

/// Locates entities on the page image in normalized model space
pub trait GeometryLocator: Send + Sync {
    fn locate(&self, image: &[u8], entities: &EntitySet) -> AnnotatorResult<Vec<BoxRecord>>;
}

/// Produces an audio file reading `text` aloud
pub trait Synthesizer: Send + Sync {
    fn synthesize(&self, text: &str, language: &str) -> AnnotatorResult<PathBuf>;
}

/// Transcriber backed by an external program: image bytes on stdin,
/// transcript on stdout.
#[derive(Debug, Clone)]
pub struct CommandTranscriber {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandTranscriber {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Build from `[program, args...]`
    pub fn from_command_line(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self::new(program.clone(), args.to_vec()))
    }
}

impl Transcriber for CommandTranscriber {
    fn transcribe(&self, image: &[u8]) -> AnnotatorResult<String> {
        debug!(program = %self.program, bytes = image.len(), "Running transcriber");
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_collaborator("transcriber")?;

        // stdin is fed from its own thread while stdout and stderr drain
        let stdin = child.stdin.take();
        let (written, output) = thread::scope(|scope| {
            let writer = scope.spawn(move || match stdin {
                Some(mut stdin) => stdin.write_all(image),
                None => Ok(()),
            });
            let output = child.wait_with_output();
            (writer.join(), output)
        });
        let output = output.with_collaborator("transcriber")?;
        match written {
            Ok(Ok(())) => {}
            // the child may exit without reading everything; its status decides
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                debug!(program = %self.program, "Transcriber closed stdin early");
            }
            Ok(Err(e)) => return Err(e).with_collaborator("transcriber"),
            Err(_) => {
                return Err(AnnotatorError::transport(
                    "transcriber",
                    "stdin writer thread panicked",
                ))
            }
        }
        if !output.status.success() {
            return Err(AnnotatorError::transport(
                "transcriber",
                format!(
                    "{} exited with {}: {}",
                    self.program,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

fn fence_pattern() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        Regex::new(r"(?s)^\s*```[A-Za-z]*\s*\n?(.*?)\s*```\s*$").expect("fence pattern is valid")
    })
}

/// Remove a surrounding Markdown code fence, if any
pub fn strip_code_fence(answer: &str) -> &str {
    match fence_pattern().captures(answer).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str(),
        None => answer.trim(),
    }
}

/// Parse an extractor answer: a JSON object keyed by category tag
pub fn parse_entities(answer: &str) -> AnnotatorResult<EntitySet> {
    let raw: serde_json::Map<String, serde_json::Value> =
        serde_json::from_str(strip_code_fence(answer))
            .map_err(|e| AnnotatorError::malformed("entity", e.to_string()))?;

    let mut entities = EntitySet::new();
    for (key, value) in raw {
        let Some(category) = Category::from_tag(&key) else {
            debug!(key = %key, "Ignoring unknown entity category");
            continue;
        };
        let names = value
            .as_array()
            .ok_or_else(|| AnnotatorError::malformed("entity", format!("{} is not a list", key)))?;
        for name in names.iter().filter_map(|n| n.as_str()) {
            let name = name.trim();
            if !name.is_empty() {
                entities.push(category, name);
            }
        }
    }
    Ok(entities)
}

/// Parse a plain comma-separated listing of proper names, keeping phrases
/// longer than two characters
pub fn parse_entity_list(answer: &str) -> Vec<String> {
    answer
        .split(',')
        .map(str::trim)
        .filter(|phrase| phrase.chars().count() > 2)
        .map(str::to_string)
        .collect()
}

#[derive(Deserialize)]
struct RawLocation {
    name: String,
    category: String,
    #[serde(alias = "box_2d")]
    coords: [f64; 4],
}

/// Parse a locator answer: a JSON list of `{name, category, coords}` with
/// coordinates `[yMin, xMin, yMax, xMax]` in `[0, 1000]`. Out-of-range
/// values are clamped and inverted corners reordered.
pub fn parse_locations(answer: &str) -> AnnotatorResult<Vec<BoxRecord>> {
    let raw: Vec<RawLocation> = serde_json::from_str(strip_code_fence(answer))
        .map_err(|e| AnnotatorError::malformed("location", e.to_string()))?;

    raw.into_iter()
        .map(|loc| {
            let category = Category::from_tag(&loc.category).ok_or_else(|| {
                AnnotatorError::malformed("location", format!("unknown category {}", loc.category))
            })?;
            let [y_min, x_min, y_max, x_max] = loc.coords;
            Ok(BoxRecord {
                name: loc.name,
                category,
                coords: ModelRect::from_f64_clamped(y_min, x_min, y_max, x_max),
            })
        })
        .collect()
}

/// Case-insensitive, non-overlapping byte ranges of every entity
/// occurrence in `text`, sorted by start
pub fn find_entity_spans(text: &str, entities: &[String]) -> Vec<std::ops::Range<usize>> {
    let mut spans: Vec<std::ops::Range<usize>> = Vec::new();
    for entity in entities.iter().filter(|e| !e.trim().is_empty()) {
        let pattern = match Regex::new(&format!("(?i){}", regex::escape(entity))) {
            Ok(pattern) => pattern,
            Err(_) => continue,
        };
        for found in pattern.find_iter(text) {
            let range = found.range();
            if !spans.iter().any(|s| s.start < range.end && range.start < s.end) {
                spans.push(range);
            }
        }
    }
    spans.sort_by_key(|s| s.start);
    spans
}
