use crate::config::Config;
use crate::engine::{RecognitionConfig, TranslationConfig};
use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// User-facing runtime settings, snapshotted by each session at Init
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Maximum concurrently registered sessions
    pub max_sessions: usize,

    /// How long an unused engine stays pooled before disposal
    pub engine_idle_dispose_ms: u64,

    /// Audio queue bound per session
    pub max_pending_audio_chunks: usize,

    /// Translate interim (non-final) segments too
    pub partial_translation_enabled: bool,

    pub recognition: RecognitionConfig,

    pub translation: TranslationConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_sessions: 8,
            engine_idle_dispose_ms: 30_000, // 30 seconds
            max_pending_audio_chunks: 50,   // ~5s of 100ms chunks
            partial_translation_enabled: false,
            recognition: RecognitionConfig::default(),
            translation: TranslationConfig::default(),
        }
    }
}

impl Settings {
    pub fn engine_idle_dispose(&self) -> Duration {
        Duration::from_millis(self.engine_idle_dispose_ms)
    }
}

/// Settings accessor consumed by the manager and by sessions
#[async_trait::async_trait]
pub trait SettingsProvider: Send + Sync {
    async fn load(&self) -> Result<Settings>;
}

/// In-memory settings, replaceable at runtime
#[derive(Debug, Default)]
pub struct StaticSettings {
    settings: RwLock<Settings>,
}

impl StaticSettings {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings: RwLock::new(settings),
        }
    }

    /// Replace the settings returned by later loads
    pub fn set(&self, settings: Settings) {
        *self.settings.write() = settings;
    }

    pub fn update(&self, f: impl FnOnce(&mut Settings)) {
        f(&mut self.settings.write());
    }
}

#[async_trait::async_trait]
impl SettingsProvider for StaticSettings {
    async fn load(&self) -> Result<Settings> {
        Ok(self.settings.read().clone())
    }
}

/// Settings read from the `[sessions]` section of a config file on every load
#[derive(Debug, Clone)]
pub struct FileSettings {
    path: PathBuf,
}

impl FileSettings {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait::async_trait]
impl SettingsProvider for FileSettings {
    async fn load(&self) -> Result<Settings> {
        let path = self.path.clone();
        let config = tokio::task::spawn_blocking(move || Config::load_from(&path))
            .await
            .context("Settings loader task failed")??;
        Ok(config.sessions)
    }
}
