use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{AnnotatorError, AnnotatorResult};

pub const MIN_FONT_SIZE: u32 = 6;
pub const MAX_FONT_SIZE: u32 = 72;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotatorConfig {
    pub viewer: ViewerConfig,
    pub editor: EditorConfig,
    pub speech: SpeechConfig,
    pub transcription: TranscriptionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewerConfig {
    /// Images wider than this (px) open scaled down to fit it
    pub max_initial_width: f64,

    /// Scale multiplier for one wheel step towards the viewer
    pub zoom_in_factor: f64,

    /// Scale multiplier for one wheel step away from the viewer
    pub zoom_out_factor: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditorConfig {
    /// Side of the square resize handle, view units
    pub handle_size: f64,

    /// Minimum box width and height while resizing, view units
    pub min_box_size: f64,

    /// Space between a label and its background plate
    pub label_padding: f64,

    /// Transcript editor font size
    pub font_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechConfig {
    /// Language code passed to the synthesizer
    pub language: String,

    /// Display name -> language code
    pub languages: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    /// Environment variable holding the model API key
    pub api_key_env: String,

    /// Fallback API key when the environment variable is unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_path: Option<PathBuf>,

    /// External transcriber program and its arguments
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
}

impl Default for AnnotatorConfig {
    fn default() -> Self {
        let languages = [
            ("Polski", "pl"),
            ("Łacina", "la"),
            ("Angielski", "en"),
            ("Niemiecki", "de"),
            ("Francuski", "fr"),
            ("Hiszpański", "es"),
            ("Portugalski", "pt"),
            ("Rosyjski", "ru"),
        ]
        .into_iter()
        .map(|(name, code)| (name.to_string(), code.to_string()))
        .collect();

        Self {
            viewer: ViewerConfig {
                max_initial_width: 1400.0,
                zoom_in_factor: 1.1,
                zoom_out_factor: 0.9,
            },
            editor: EditorConfig {
                handle_size: 10.0,
                min_box_size: 10.0,
                label_padding: 2.0,
                font_size: 12,
            },
            speech: SpeechConfig {
                language: "pl".to_string(),
                languages,
            },
            transcription: TranscriptionConfig {
                api_key_env: "GEMINI_API_KEY".to_string(),
                api_key: None,
                prompt_path: None,
                command: Vec::new(),
            },
        }
    }
}

impl AnnotatorConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> AnnotatorResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| AnnotatorError::persistence(path.as_ref(), e))?;

        let config: AnnotatorConfig = toml::from_str(&content).map_err(|e| {
            AnnotatorError::configuration(format!("Failed to parse config file: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Defaults when `path` does not exist, parse errors otherwise surface
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> AnnotatorResult<Self> {
        if path.as_ref().exists() {
            Self::load_from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Override fields from `MANUSCRIPT_*` environment variables
    pub fn apply_env(&mut self) {
        if let Ok(lang) = std::env::var("MANUSCRIPT_TTS_LANG") {
            if !lang.trim().is_empty() {
                self.speech.language = lang.trim().to_string();
            }
        }

        if let Ok(size) = std::env::var("MANUSCRIPT_FONT_SIZE") {
            if let Ok(value) = size.parse::<u32>() {
                self.set_font_size(value);
            }
        }

        if let Ok(command) = std::env::var("MANUSCRIPT_TRANSCRIBE_COMMAND") {
            self.transcription.command = command.split_whitespace().map(str::to_string).collect();
        }
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> AnnotatorResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| {
            AnnotatorError::configuration(format!("Failed to serialize config: {}", e))
        })?;

        std::fs::write(path.as_ref(), content)
            .map_err(|e| AnnotatorError::persistence(path.as_ref(), e))?;

        Ok(())
    }

    pub fn set_font_size(&mut self, size: u32) {
        self.editor.font_size = size.clamp(MIN_FONT_SIZE, MAX_FONT_SIZE);
    }

    /// Step the font size by `delta`, clamped to the allowed range
    pub fn change_font_size(&mut self, delta: i32) {
        let size = i64::from(self.editor.font_size) + i64::from(delta);
        let size = size.clamp(i64::from(MIN_FONT_SIZE), i64::from(MAX_FONT_SIZE));
        self.editor.font_size = size as u32;
    }

    /// Select a speech language by display name; returns false when unknown
    pub fn select_language(&mut self, display_name: &str) -> bool {
        match self.speech.languages.get(display_name) {
            Some(code) => {
                self.speech.language = code.clone();
                true
            }
            None => false,
        }
    }

    /// API key from the environment, falling back to the config file
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.transcription.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .or_else(|| self.transcription.api_key.clone())
            .filter(|key| !key.trim().is_empty())
    }

    fn validate(&self) -> AnnotatorResult<()> {
        if self.editor.handle_size <= 0.0 || self.editor.min_box_size <= 0.0 {
            return Err(AnnotatorError::configuration(
                "editor.handle_size and editor.min_box_size must be positive",
            ));
        }
        if self.viewer.zoom_in_factor <= 1.0 || !(0.0..1.0).contains(&self.viewer.zoom_out_factor) {
            return Err(AnnotatorError::configuration(
                "viewer zoom factors must enlarge (>1) and shrink (0..1)",
            ));
        }
        Ok(())
    }
}
