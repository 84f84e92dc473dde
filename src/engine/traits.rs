use crate::channel::{AudioChunk, PlaybackState, StreamContext};
use crate::pool::Disposable;
use anyhow::Result;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A piece of recognized speech reported by a recognition stream
#[derive(Debug, Clone, PartialEq)]
pub struct RecognizedSegment {
    pub text: String,
    pub is_final: bool,
    pub start_ms: Option<u64>,
    pub end_ms: Option<u64>,
    /// Detected or configured language of `text`
    pub language: Option<String>,
}

/// Asynchronous reports from a recognition stream to its session
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Segment(RecognizedSegment),
    Error { message: String, fatal: bool },
}

/// Sending half handed to a recognizer at initialization
#[derive(Debug, Clone)]
pub struct EngineEvents {
    tx: mpsc::UnboundedSender<EngineEvent>,
}

impl EngineEvents {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Report a segment. Returns `false` once the session stopped listening.
    pub fn segment(&self, segment: RecognizedSegment) -> bool {
        self.tx.send(EngineEvent::Segment(segment)).is_ok()
    }

    /// Report a runtime error. `fatal` errors terminate the session.
    pub fn error(&self, message: impl Into<String>, fatal: bool) -> bool {
        self.tx
            .send(EngineEvent::Error {
                message: message.into(),
                fatal,
            })
            .is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Speech recognition engine shared between sessions through the pool.
///
/// The engine holds the expensive state (loaded model, backend connection);
/// each session opens its own `RecognitionStream` so audio cursors never mix.
#[async_trait::async_trait]
pub trait RecognitionEngine: Disposable {
    /// Pool key this engine was constructed for
    fn key(&self) -> &str;

    /// Open a recognition stream for one session.
    ///
    /// Segments and runtime errors are reported through `events`.
    async fn initialize(
        &self,
        context: &StreamContext,
        events: EngineEvents,
    ) -> Result<Box<dyn RecognitionStream>>;
}

/// Per-session recognition state. Dropping the stream ends it.
#[async_trait::async_trait]
pub trait RecognitionStream: Send + Sync {
    /// Feed one audio chunk. Calls for one stream never overlap.
    async fn push_audio(&self, chunk: &AudioChunk, cancel: &CancellationToken) -> Result<()>;

    async fn set_playback_state(&self, state: PlaybackState) -> Result<()>;
}

/// Text translation engine shared between sessions through the pool
#[async_trait::async_trait]
pub trait TranslationEngine: Disposable {
    fn key(&self) -> &str;

    async fn translate(
        &self,
        text: &str,
        source_language: &str,
        target_language: &str,
        is_final: bool,
        cancel: &CancellationToken,
    ) -> Result<String>;
}
