use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;

use crate::batch::{BatchCoordinator, BatchEvent};
use crate::cache::PageCacheStore;
use crate::checksum;
use crate::collaborators::CommandTranscriber;
use crate::config::AnnotatorConfig;
use crate::page::{Page, PageSet};

/// Print one line per page: transcript state and which caches are current
pub fn status_command(folder: &Path) -> Result<()> {
    let pages = PageSet::open(folder)?;
    if pages.is_empty() {
        println!("No scans found in {}", folder.display());
        return Ok(());
    }

    let store = PageCacheStore::new();
    for page in pages.pages() {
        println!("{}", status_line(&store, page)?);
    }
    Ok(())
}

fn status_line(store: &PageCacheStore, page: &Page) -> Result<String> {
    let digest = page.checksum()?;
    let entry = store.load(page);
    let mark = |current: bool| if current { "yes" } else { "-" };
    Ok(format!(
        "{:<24} {:<17} entities:{:<4} boxes:{:<4} audio:{}",
        page.name,
        page.transcript_status().label(),
        mark(entry.entities_matching(&digest).is_some()),
        mark(entry.boxes_matching(&digest).is_some()),
        mark(entry.audio_matching(&digest)),
    ))
}

/// Transcribe pages with an external command, in folder order
pub fn batch_command(
    folder: &Path,
    command: Vec<String>,
    all: bool,
    names: Vec<String>,
    config: &AnnotatorConfig,
) -> Result<()> {
    let pages = PageSet::open(folder)?;

    let command = if command.is_empty() {
        config.transcription.command.clone()
    } else {
        command
    };
    let transcriber = CommandTranscriber::from_command_line(&command)
        .ok_or_else(|| anyhow!("No transcriber command given (use --command or transcription.command)"))?;

    let selection: Vec<usize> = if !names.is_empty() {
        names
            .iter()
            .map(|name| {
                pages
                    .find(name)
                    .ok_or_else(|| anyhow!("No page named {} in {}", name, folder.display()))
            })
            .collect::<Result<_>>()?
    } else if all {
        (0..pages.len()).collect()
    } else {
        pages.default_batch_selection()
    };

    if selection.is_empty() {
        println!("Nothing to transcribe: every page already has text");
        return Ok(());
    }
    info!("Transcribing {} of {} page(s)", selection.len(), pages.len());

    let mut selected: Vec<_> = selection
        .into_iter()
        .filter_map(|i| pages.get(i).cloned())
        .collect();
    let coordinator = BatchCoordinator::new(Arc::new(transcriber));
    let alive = AtomicBool::new(true);

    coordinator.run(&mut selected, &alive, |event| match event {
        BatchEvent::Progress {
            index,
            total,
            page_name,
        } => println!("[{}/{}] {}", index + 1, total, page_name),
        BatchEvent::ItemFailed { page_name, error } => {
            eprintln!("  {} failed: {} ({})", page_name, error.user_message(), error)
        }
        BatchEvent::Done { total, error_count } => {
            println!("Done: {} page(s), {} error(s)", total, error_count)
        }
    });
    Ok(())
}

/// Print the digest of a transcript file
pub fn digest_command(file: &Path) -> Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    println!("{}  {}", checksum::digest(&text), file.display());
    Ok(())
}

/// Drop cached entities and boxes of one page
pub fn clear_command(folder: &Path, page_name: &str) -> Result<()> {
    let pages = PageSet::open(folder)?;
    let page = pages
        .find(page_name)
        .and_then(|i| pages.get(i))
        .ok_or_else(|| anyhow!("No page named {} in {}", page_name, folder.display()))?;

    PageCacheStore::new().clear_annotations(page)?;
    println!("Cleared annotations of {}", page.name);
    Ok(())
}

/// Config from `path`, or the default location, with environment overrides
pub fn load_config(path: Option<PathBuf>) -> Result<AnnotatorConfig> {
    let path = path.unwrap_or_else(|| PathBuf::from("manuscript.toml"));
    let mut config = AnnotatorConfig::load_or_default(&path)
        .with_context(|| format!("Failed to load config {}", path.display()))?;
    config.apply_env();
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheUpdate;
    use crate::model::{Category, EntitySet};
    use tempfile::tempdir;

    #[test]
    fn test_status_line_reflects_transcript_on_disk() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("k001.png"), b"").unwrap();
        std::fs::write(dir.path().join("k001.txt"), "Jan Kowalski\n").unwrap();
        let pages = PageSet::open(dir.path()).unwrap();
        let page = pages.get(0).unwrap();
        let store = PageCacheStore::new();

        let mut entities = EntitySet::new();
        entities.push(Category::Person, "Jan Kowalski");
        store
            .save(
                page,
                CacheUpdate::new()
                    .checksum(checksum::digest("Jan Kowalski\n"))
                    .entities(entities)
                    .coordinates(Vec::new()),
            )
            .unwrap();

        let line = status_line(&store, page).unwrap();
        assert!(line.starts_with("k001"));
        assert!(line.contains("entities:yes"));
        assert!(line.contains("boxes:yes"));
        assert!(line.ends_with("audio:-"));

        // a fresh scan of the folder sees the edited file
        std::fs::write(dir.path().join("k001.txt"), "Jan Kowalsky\n").unwrap();
        let pages = PageSet::open(dir.path()).unwrap();
        let line = status_line(&store, pages.get(0).unwrap()).unwrap();
        assert!(line.contains("entities:-"));
        assert!(line.contains("boxes:-"));
    }
}
