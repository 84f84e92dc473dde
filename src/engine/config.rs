use serde::{Deserialize, Serialize};
use std::fmt;

/// How a recognizer produces segments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecognitionMode {
    /// Continuous partial + final results
    Streaming,
    /// Final results only, after each detected pause
    Segmented,
}

impl fmt::Display for RecognitionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecognitionMode::Streaming => f.write_str("streaming"),
            RecognitionMode::Segmented => f.write_str("segmented"),
        }
    }
}

/// Recognition engine selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    /// Registry name of the engine implementation
    pub engine: String,

    /// Model identifier (e.g. "base", "small.en")
    pub model: String,

    /// Spoken language (ISO 639-1), or "auto"
    pub language: String,

    pub mode: RecognitionMode,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            engine: "loopback".to_string(),
            model: "base".to_string(),
            language: "en".to_string(),
            mode: RecognitionMode::Streaming,
        }
    }
}

/// Translation engine selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslationConfig {
    /// Translate transcript segments at all
    pub enabled: bool,

    /// Registry name of the engine implementation
    pub engine: String,

    /// Source language; `None` uses the segment's detected language
    pub source_language: Option<String>,

    pub target_language: String,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            engine: "loopback".to_string(),
            source_language: None,
            target_language: "en".to_string(),
        }
    }
}
