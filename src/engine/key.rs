use super::config::{RecognitionConfig, TranslationConfig};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Pool key: a fingerprint of the configuration an engine instance was built from.
///
/// Sessions whose configurations yield the same key share one engine instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EngineKey(String);

impl EngineKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EngineKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EngineKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

fn normalize(part: &str) -> String {
    let part = part.trim();
    if part.is_empty() {
        "default".to_string()
    } else {
        part.to_ascii_lowercase()
    }
}

/// `asr:<engine>:<model>:<language>:<mode>`
pub fn recognition_fingerprint(config: &RecognitionConfig) -> EngineKey {
    EngineKey(format!(
        "asr:{}:{}:{}:{}",
        normalize(&config.engine),
        normalize(&config.model),
        normalize(&config.language),
        config.mode
    ))
}

/// `mt:<engine>:<source>:<target>`
pub fn translation_fingerprint(config: &TranslationConfig) -> EngineKey {
    let source = config.source_language.as_deref().unwrap_or("auto");
    EngineKey(format!(
        "mt:{}:{}:{}",
        normalize(&config.engine),
        normalize(source),
        normalize(&config.target_language)
    ))
}
