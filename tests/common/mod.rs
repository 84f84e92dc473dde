// Shared fixtures for integration tests: scriptable mock engines and a manager harness.

#![allow(dead_code)]

use anyhow::{bail, Result};
use caption_sessions::engine::recognition_fingerprint;
use caption_sessions::{
    AttachError, Attached, AudioChunk, ChannelPeer, ChannelSender, Disposable, EngineEvents,
    EngineKey, EngineRegistry, InboundEvent, ManagerOptions, OutboundEvent, PlaybackState,
    RecognitionConfig, RecognitionEngine, RecognitionStream, RecognizedSegment, Session,
    SessionManager, Settings, StaticSettings, StreamChannel, StreamContext, TranscriptSegment,
    TranslationConfig, TranslationEngine, PROTOCOL_VERSION,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Behavior switches and counters shared by every mock engine of one registry
#[derive(Default)]
pub struct MockShared {
    pub block_push: AtomicBool,
    pub fail_push: AtomicBool,
    pub fail_init: AtomicBool,
    pub fail_create: AtomicBool,
    pub fail_translate: AtomicBool,
    pub init_delay_ms: AtomicU64,
    pub create_delay_ms: AtomicU64,

    pub recognizers_built: AtomicUsize,
    pub translators_built: AtomicUsize,
    pub recognizer_disposals: AtomicUsize,
    pub translator_disposals: AtomicUsize,

    /// Timestamps of accepted chunks, in push order
    pub pushed: Mutex<Vec<u64>>,
    /// Event senders handed out by `initialize`, in order
    pub streams: Mutex<Vec<EngineEvents>>,
    pub playback: Mutex<Vec<PlaybackState>>,
}

#[derive(Default)]
pub struct MockRegistry {
    pub shared: Arc<MockShared>,
}

impl MockRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Engine event sender of the `index`-th opened stream
    pub fn events(&self, index: usize) -> EngineEvents {
        self.shared.streams.lock()[index].clone()
    }

    pub fn pushed(&self) -> Vec<u64> {
        self.shared.pushed.lock().clone()
    }

    pub fn recognizers_built(&self) -> usize {
        self.shared.recognizers_built.load(Ordering::SeqCst)
    }

    pub fn recognizer_disposals(&self) -> usize {
        self.shared.recognizer_disposals.load(Ordering::SeqCst)
    }

    pub fn translator_disposals(&self) -> usize {
        self.shared.translator_disposals.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl EngineRegistry for MockRegistry {
    async fn create_recognizer(
        &self,
        key: &EngineKey,
        _config: &RecognitionConfig,
    ) -> Result<Arc<dyn RecognitionEngine>> {
        let delay = self.shared.create_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.shared.fail_create.load(Ordering::SeqCst) {
            bail!("model weights missing");
        }
        self.shared.recognizers_built.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockRecognizer {
            key: key.to_string(),
            shared: Arc::clone(&self.shared),
        }))
    }

    async fn create_translator(
        &self,
        key: &EngineKey,
        _config: &TranslationConfig,
    ) -> Result<Arc<dyn TranslationEngine>> {
        self.shared.translators_built.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockTranslator {
            key: key.to_string(),
            shared: Arc::clone(&self.shared),
        }))
    }
}

struct MockRecognizer {
    key: String,
    shared: Arc<MockShared>,
}

#[async_trait::async_trait]
impl Disposable for MockRecognizer {
    async fn dispose(&self) -> Result<()> {
        self.shared.recognizer_disposals.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait::async_trait]
impl RecognitionEngine for MockRecognizer {
    fn key(&self) -> &str {
        &self.key
    }

    async fn initialize(
        &self,
        _context: &StreamContext,
        events: EngineEvents,
    ) -> Result<Box<dyn RecognitionStream>> {
        let delay = self.shared.init_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.shared.fail_init.load(Ordering::SeqCst) {
            bail!("recognizer warm-up failed");
        }

        self.shared.streams.lock().push(events);
        Ok(Box::new(MockStream {
            shared: Arc::clone(&self.shared),
        }))
    }
}

struct MockStream {
    shared: Arc<MockShared>,
}

#[async_trait::async_trait]
impl RecognitionStream for MockStream {
    async fn push_audio(&self, chunk: &AudioChunk, _cancel: &CancellationToken) -> Result<()> {
        if self.shared.block_push.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.shared.fail_push.load(Ordering::SeqCst) {
            bail!("decoder rejected chunk");
        }
        self.shared.pushed.lock().push(chunk.timestamp_ms);
        Ok(())
    }

    async fn set_playback_state(&self, state: PlaybackState) -> Result<()> {
        self.shared.playback.lock().push(state);
        Ok(())
    }
}

struct MockTranslator {
    key: String,
    shared: Arc<MockShared>,
}

#[async_trait::async_trait]
impl Disposable for MockTranslator {
    async fn dispose(&self) -> Result<()> {
        self.shared.translator_disposals.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait::async_trait]
impl TranslationEngine for MockTranslator {
    fn key(&self) -> &str {
        &self.key
    }

    async fn translate(
        &self,
        text: &str,
        _source_language: &str,
        target_language: &str,
        _is_final: bool,
        _cancel: &CancellationToken,
    ) -> Result<String> {
        if self.shared.fail_translate.load(Ordering::SeqCst) {
            bail!("translation quota exceeded");
        }
        Ok(format!("{}:{}", target_language, text))
    }
}

/// Settings wired to the mock engines
pub fn mock_settings() -> Settings {
    Settings {
        max_sessions: 4,
        engine_idle_dispose_ms: 1000,
        max_pending_audio_chunks: 10,
        partial_translation_enabled: false,
        recognition: RecognitionConfig {
            engine: "mock".to_string(),
            ..RecognitionConfig::default()
        },
        translation: TranslationConfig {
            enabled: true,
            engine: "mock".to_string(),
            source_language: None,
            target_language: "de".to_string(),
        },
    }
}

pub fn live_context() -> StreamContext {
    StreamContext {
        source_url: "https://example.com/live".to_string(),
        is_live: true,
        started_at_ms: 1_700_000_000_000,
        playback_rate: 1.0,
    }
}

pub fn init_event() -> InboundEvent {
    InboundEvent::Init {
        version: PROTOCOL_VERSION,
        context: live_context(),
    }
}

pub fn chunk(timestamp_ms: u64) -> AudioChunk {
    AudioChunk {
        sample_rate: 16000,
        channel_count: 1,
        timestamp_ms,
        pcm_samples: vec![0.1; 1600],
    }
}

pub fn segment(text: &str, is_final: bool) -> RecognizedSegment {
    RecognizedSegment {
        text: text.to_string(),
        is_final,
        start_ms: Some(0),
        end_ms: Some(1000),
        language: Some("en".to_string()),
    }
}

pub struct Harness {
    pub manager: Arc<SessionManager>,
    pub registry: Arc<MockRegistry>,
    pub settings: Arc<StaticSettings>,
}

impl Harness {
    pub async fn new(settings: Settings) -> Self {
        Self::with_options(settings, ManagerOptions::default()).await
    }

    pub async fn with_options(settings: Settings, options: ManagerOptions) -> Self {
        let registry = MockRegistry::new();
        let settings = Arc::new(StaticSettings::new(settings));
        let manager = SessionManager::create(settings.clone(), registry.clone(), options)
            .await
            .expect("manager starts");

        Self {
            manager,
            registry,
            settings,
        }
    }

    pub fn attach(&self, tab_id: u32, frame_id: u32) -> (Result<Attached, AttachError>, ChannelPeer) {
        let (channel, peer) = StreamChannel::pair(ChannelSender::tab(tab_id, frame_id));
        (self.manager.attach_channel(channel), peer)
    }

    /// Attach, send Init and wait for Ready
    pub async fn open(&self, tab_id: u32, frame_id: u32) -> (Arc<Session>, ChannelPeer) {
        let (attached, mut peer) = self.attach(tab_id, frame_id);
        let session = attached.expect("attach accepted").session().clone();

        peer.send(init_event()).await.unwrap();
        match next_event(&mut peer).await {
            OutboundEvent::Ready { .. } => {}
            other => panic!("expected Ready, got {:?}", other),
        }

        (session, peer)
    }

    pub fn recognizer_key(&self) -> EngineKey {
        recognition_fingerprint(&mock_settings().recognition)
    }
}

pub async fn next_event(peer: &mut ChannelPeer) -> OutboundEvent {
    tokio::time::timeout(Duration::from_secs(5), peer.recv())
        .await
        .expect("timed out waiting for outbound event")
        .expect("channel closed")
}

/// Next transcript update, skipping stats
pub async fn next_transcript(peer: &mut ChannelPeer) -> TranscriptSegment {
    loop {
        match next_event(peer).await {
            OutboundEvent::TranscriptUpdate(segment) => return segment,
            OutboundEvent::Stats(_) => continue,
            other => panic!("expected TranscriptUpdate, got {:?}", other),
        }
    }
}

/// Wait until the session side dropped the channel, returning what it sent meanwhile
pub async fn collect_until_closed(peer: &mut ChannelPeer) -> Vec<OutboundEvent> {
    let mut events = Vec::new();
    loop {
        match tokio::time::timeout(Duration::from_secs(5), peer.recv()).await {
            Ok(Some(event)) => events.push(event),
            Ok(None) => return events,
            Err(_) => panic!("channel still open, received {:?}", events),
        }
    }
}

pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}
