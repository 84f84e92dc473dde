use super::config::{RecognitionConfig, TranslationConfig};
use super::key::{recognition_fingerprint, translation_fingerprint, EngineKey};
use super::traits::{RecognitionEngine, TranslationEngine};
use anyhow::Result;
use std::sync::Arc;

/// Derives pool keys from configuration and constructs engine instances.
///
/// Construction is only invoked by the pool on a cache miss.
#[async_trait::async_trait]
pub trait EngineRegistry: Send + Sync {
    fn recognition_key(&self, config: &RecognitionConfig) -> EngineKey {
        recognition_fingerprint(config)
    }

    fn translation_key(&self, config: &TranslationConfig) -> EngineKey {
        translation_fingerprint(config)
    }

    async fn create_recognizer(
        &self,
        key: &EngineKey,
        config: &RecognitionConfig,
    ) -> Result<Arc<dyn RecognitionEngine>>;

    async fn create_translator(
        &self,
        key: &EngineKey,
        config: &TranslationConfig,
    ) -> Result<Arc<dyn TranslationEngine>>;
}
