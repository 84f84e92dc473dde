//! Loopback engines
//!
//! Engines that need no model: the recognizer describes the audio it receives as
//! synthetic utterances and the translator tags text with the target language.
//! They exercise the full session pipeline in the demo binary and in tests.

use super::config::{RecognitionConfig, TranslationConfig};
use super::key::EngineKey;
use super::registry::EngineRegistry;
use super::traits::{
    EngineEvents, RecognitionEngine, RecognitionStream, RecognizedSegment, TranslationEngine,
};
use crate::channel::{AudioChunk, PlaybackState, StreamContext};
use crate::pool::Disposable;
use anyhow::{bail, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Audio between two partial segments
const PARTIAL_EVERY_MS: u64 = 500;

/// Audio per synthetic utterance
const UTTERANCE_MS: u64 = 2000;

pub struct LoopbackRecognizer {
    key: String,
    language: String,
    partial_every_ms: u64,
    utterance_ms: u64,
}

impl LoopbackRecognizer {
    pub fn new(key: &EngineKey, config: &RecognitionConfig) -> Self {
        Self {
            key: key.to_string(),
            language: config.language.clone(),
            partial_every_ms: PARTIAL_EVERY_MS,
            utterance_ms: UTTERANCE_MS,
        }
    }
}

#[async_trait::async_trait]
impl Disposable for LoopbackRecognizer {
    async fn dispose(&self) -> Result<()> {
        info!("Loopback recognizer {} disposed", self.key);
        Ok(())
    }
}

#[async_trait::async_trait]
impl RecognitionEngine for LoopbackRecognizer {
    fn key(&self) -> &str {
        &self.key
    }

    async fn initialize(
        &self,
        context: &StreamContext,
        events: EngineEvents,
    ) -> Result<Box<dyn RecognitionStream>> {
        debug!("Loopback stream opened for {}", context.source_url);

        Ok(Box::new(LoopbackStream {
            events,
            language: self.language.clone(),
            partial_every_ms: self.partial_every_ms,
            utterance_ms: self.utterance_ms,
            cursor: Mutex::new(Cursor::default()),
        }))
    }
}

#[derive(Default)]
struct Cursor {
    audio_ms: u64,
    utterance_start_ms: u64,
    last_partial_ms: u64,
    utterance_index: u64,
    sum_squares: f64,
    samples: u64,
    paused: bool,
}

impl Cursor {
    fn level_dbfs(&self) -> f64 {
        if self.samples == 0 {
            return f64::NEG_INFINITY;
        }
        let rms = (self.sum_squares / self.samples as f64).sqrt();
        20.0 * rms.max(1e-9).log10()
    }
}

struct LoopbackStream {
    events: EngineEvents,
    language: String,
    partial_every_ms: u64,
    utterance_ms: u64,
    cursor: Mutex<Cursor>,
}

#[async_trait::async_trait]
impl RecognitionStream for LoopbackStream {
    async fn push_audio(&self, chunk: &AudioChunk, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            bail!("Stream cancelled");
        }

        let mut segments = Vec::new();
        {
            let mut cursor = self.cursor.lock();
            if cursor.paused {
                return Ok(());
            }

            cursor.audio_ms += chunk.duration_ms();
            cursor.samples += chunk.pcm_samples.len() as u64;
            cursor.sum_squares += chunk
                .pcm_samples
                .iter()
                .map(|s| (*s as f64) * (*s as f64))
                .sum::<f64>();

            let utterance_len = cursor.audio_ms - cursor.utterance_start_ms;
            if utterance_len >= self.utterance_ms {
                cursor.utterance_index += 1;
                segments.push(RecognizedSegment {
                    text: format!(
                        "utterance {} ({} ms, {:.0} dBFS)",
                        cursor.utterance_index,
                        utterance_len,
                        cursor.level_dbfs()
                    ),
                    is_final: true,
                    start_ms: Some(cursor.utterance_start_ms),
                    end_ms: Some(cursor.audio_ms),
                    language: Some(self.language.clone()),
                });
                cursor.utterance_start_ms = cursor.audio_ms;
                cursor.last_partial_ms = cursor.audio_ms;
                cursor.sum_squares = 0.0;
                cursor.samples = 0;
            } else if cursor.audio_ms - cursor.last_partial_ms >= self.partial_every_ms {
                segments.push(RecognizedSegment {
                    text: format!(
                        "utterance {} ({} ms so far)",
                        cursor.utterance_index + 1,
                        utterance_len
                    ),
                    is_final: false,
                    start_ms: Some(cursor.utterance_start_ms),
                    end_ms: Some(cursor.audio_ms),
                    language: Some(self.language.clone()),
                });
                cursor.last_partial_ms = cursor.audio_ms;
            }
        }

        for segment in segments {
            self.events.segment(segment);
        }

        Ok(())
    }

    async fn set_playback_state(&self, state: PlaybackState) -> Result<()> {
        self.cursor.lock().paused = matches!(state, PlaybackState::Paused | PlaybackState::Ended);
        Ok(())
    }
}

pub struct LoopbackTranslator {
    key: String,
}

impl LoopbackTranslator {
    pub fn new(key: &EngineKey) -> Self {
        Self {
            key: key.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl Disposable for LoopbackTranslator {
    async fn dispose(&self) -> Result<()> {
        info!("Loopback translator {} disposed", self.key);
        Ok(())
    }
}

#[async_trait::async_trait]
impl TranslationEngine for LoopbackTranslator {
    fn key(&self) -> &str {
        &self.key
    }

    async fn translate(
        &self,
        text: &str,
        _source_language: &str,
        target_language: &str,
        _is_final: bool,
        cancel: &CancellationToken,
    ) -> Result<String> {
        if cancel.is_cancelled() {
            bail!("Translation cancelled");
        }
        Ok(format!("[{}] {}", target_language, text))
    }
}

/// Registry that only knows the loopback engines
#[derive(Default)]
pub struct LoopbackRegistry {
    recognizers_built: AtomicUsize,
    translators_built: AtomicUsize,
}

impl LoopbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recognizers constructed so far
    pub fn recognizers_built(&self) -> usize {
        self.recognizers_built.load(Ordering::SeqCst)
    }

    pub fn translators_built(&self) -> usize {
        self.translators_built.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl EngineRegistry for LoopbackRegistry {
    async fn create_recognizer(
        &self,
        key: &EngineKey,
        config: &RecognitionConfig,
    ) -> Result<Arc<dyn RecognitionEngine>> {
        if config.engine != "loopback" {
            bail!("Unknown recognition engine: {}", config.engine);
        }
        self.recognizers_built.fetch_add(1, Ordering::SeqCst);
        info!("Constructing loopback recognizer {}", key);
        Ok(Arc::new(LoopbackRecognizer::new(key, config)))
    }

    async fn create_translator(
        &self,
        key: &EngineKey,
        config: &TranslationConfig,
    ) -> Result<Arc<dyn TranslationEngine>> {
        if config.engine != "loopback" {
            bail!("Unknown translation engine: {}", config.engine);
        }
        self.translators_built.fetch_add(1, Ordering::SeqCst);
        info!("Constructing loopback translator {}", key);
        Ok(Arc::new(LoopbackTranslator::new(key)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineEvent;

    fn chunk(ms: u64) -> AudioChunk {
        AudioChunk {
            sample_rate: 16000,
            channel_count: 1,
            timestamp_ms: 0,
            pcm_samples: vec![0.25; (ms * 16) as usize],
        }
    }

    #[tokio::test]
    async fn emits_partials_then_a_final() {
        let key = EngineKey::new("asr:loopback:base:en:streaming");
        let recognizer = LoopbackRecognizer::new(&key, &RecognitionConfig::default());
        let (events, mut rx) = EngineEvents::channel();
        let context = StreamContext {
            source_url: "https://example.com".to_string(),
            is_live: true,
            started_at_ms: 0,
            playback_rate: 1.0,
        };

        let stream = recognizer.initialize(&context, events).await.unwrap();
        let cancel = CancellationToken::new();
        for _ in 0..4 {
            stream.push_audio(&chunk(500), &cancel).await.unwrap();
        }

        let mut received = Vec::new();
        while let Ok(EngineEvent::Segment(segment)) = rx.try_recv() {
            received.push(segment);
        }

        assert_eq!(received.len(), 4);
        assert!(received[..3].iter().all(|s| !s.is_final));
        assert!(received[3].is_final);
        assert_eq!(received[3].end_ms, Some(2000));
    }

    #[tokio::test]
    async fn registry_rejects_unknown_engines() {
        let registry = LoopbackRegistry::new();
        let config = RecognitionConfig {
            engine: "whisper".to_string(),
            ..RecognitionConfig::default()
        };
        let key = registry.recognition_key(&config);

        assert!(registry.create_recognizer(&key, &config).await.is_err());
        assert_eq!(registry.recognizers_built(), 0);
    }
}
