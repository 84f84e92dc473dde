use super::identity::{SessionKey, SessionState};
use super::queue::AudioQueue;
use super::settings::{Settings, SettingsProvider};
use super::stats::{SessionStats, TranscriptSegment};
use crate::channel::{
    AudioChunk, InboundEvent, OutboundEvent, PlaybackState, StreamChannel, StreamContext,
    PROTOCOL_VERSION,
};
use crate::engine::{
    EngineEvent, EngineEvents, EngineKey, EngineRegistry, RecognitionEngine, RecognitionStream,
    RecognizedSegment, TranslationEngine,
};
use crate::error::{ErrorCode, SessionFailure};
use crate::pool::EnginePool;
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Minimum spacing between "audio dropped" warnings of one session
const DROP_LOG_INTERVAL: Duration = Duration::from_secs(1);

/// Collaborators injected into every session by the manager
#[derive(Clone)]
pub struct SessionDeps {
    pub settings: Arc<dyn SettingsProvider>,
    pub registry: Arc<dyn EngineRegistry>,
    pub recognizers: Arc<EnginePool<dyn RecognitionEngine>>,
    pub translators: Arc<EnginePool<dyn TranslationEngine>>,
    /// Called once when the session is disposed
    pub on_disposed: Arc<dyn Fn(&SessionKey, Uuid) + Send + Sync>,
}

/// Pool references held by a running session
struct EngineLeases {
    recognizer_key: EngineKey,
    translator_key: EngineKey,
    translator: Arc<dyn TranslationEngine>,
    /// Opened once the recognizer initialized successfully
    stream: Option<Arc<dyn RecognitionStream>>,
    idle_dispose: Duration,
}

/// The channel a session currently reads from and writes to
struct ChannelBinding {
    channel_id: Uuid,
    outbound: mpsc::UnboundedSender<OutboundEvent>,
    /// Cancels this binding's reader task
    reader: CancellationToken,
}

struct SessionInner {
    state: SessionState,
    context: Option<StreamContext>,
    settings: Option<Settings>,
    engines: Option<EngineLeases>,
    queue: AudioQueue,
    binding: Option<ChannelBinding>,
    last_heartbeat: Instant,
    reconnect_count: u32,
    revision: u64,
    pushed: u64,
    last_drop_log: Option<Instant>,
}

impl SessionInner {
    fn stream(&self) -> Option<Arc<dyn RecognitionStream>> {
        self.engines.as_ref().and_then(|leases| leases.stream.clone())
    }

    fn stats(&self) -> SessionStats {
        SessionStats {
            dropped_audio_chunks: self.queue.dropped(),
            pending_audio_chunks: self.queue.len(),
            reconnect_count: self.reconnect_count,
            received_audio_chunks: self.queue.received(),
            pushed_audio_chunks: self.pushed,
        }
    }
}

/// Per-stream state machine binding a channel to pooled engines
pub struct Session {
    id: Uuid,
    key: SessionKey,
    deps: SessionDeps,
    inner: Mutex<SessionInner>,
    disposed: AtomicBool,
    init_in_flight: AtomicBool,
    flushing: AtomicBool,
    /// Cancelled on disposal; threaded through engine calls
    cancel: CancellationToken,
}

impl Session {
    /// Create an idle, unbound session
    pub fn new(key: SessionKey, deps: SessionDeps) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            key,
            deps,
            inner: Mutex::new(SessionInner {
                state: SessionState::Idle,
                context: None,
                settings: None,
                engines: None,
                queue: AudioQueue::new(Settings::default().max_pending_audio_chunks),
                binding: None,
                last_heartbeat: Instant::now(),
                reconnect_count: 0,
                revision: 0,
                pushed: 0,
                last_drop_log: None,
            }),
            disposed: AtomicBool::new(false),
            init_in_flight: AtomicBool::new(false),
            flushing: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn key(&self) -> SessionKey {
        self.key
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    pub fn stats(&self) -> SessionStats {
        self.inner.lock().stats()
    }

    pub fn last_heartbeat(&self) -> Instant {
        self.inner.lock().last_heartbeat
    }

    pub fn context(&self) -> Option<StreamContext> {
        self.inner.lock().context.clone()
    }

    /// Id of the currently bound channel
    pub fn channel_id(&self) -> Option<Uuid> {
        self.inner.lock().binding.as_ref().map(|b| b.channel_id)
    }

    /// Pool key of the recognizer this session holds
    pub fn engine_key(&self) -> Option<EngineKey> {
        self.inner
            .lock()
            .engines
            .as_ref()
            .map(|leases| leases.recognizer_key.clone())
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Bind `channel`, replacing (and unbinding) any previous one.
    ///
    /// Inbound events of the channel are processed by a reader task until the
    /// channel closes, the binding is replaced, or the session is disposed.
    pub fn bind(self: &Arc<Self>, channel: StreamChannel) {
        let (channel_id, inbound, outbound) = channel.into_parts();
        let reader = self.cancel.child_token();

        {
            let mut inner = self.inner.lock();
            if self.is_disposed() {
                debug!("Session {} disposed, not binding channel {}", self.key, channel_id);
                return;
            }

            let previous = inner.binding.replace(ChannelBinding {
                channel_id,
                outbound,
                reader: reader.clone(),
            });
            if let Some(previous) = previous {
                previous.reader.cancel();
                inner.reconnect_count += 1;
                info!(
                    "Session {} rebound from channel {} to {} (reconnect #{})",
                    self.key, previous.channel_id, channel_id, inner.reconnect_count
                );
            } else {
                debug!("Session {} bound to channel {}", self.key, channel_id);
            }
        }

        tokio::spawn(Arc::clone(self).read_channel(inbound, reader));
    }

    async fn read_channel(
        self: Arc<Self>,
        mut inbound: mpsc::Receiver<InboundEvent>,
        reader: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                biased;
                _ = reader.cancelled() => break,
                event = inbound.recv() => event,
            };

            match event {
                Some(event) => self.handle_event(event).await,
                None => {
                    if !reader.is_cancelled() {
                        self.dispose("channel disconnected");
                    }
                    break;
                }
            }
        }
    }

    /// Process one inbound event
    pub async fn handle_event(self: &Arc<Self>, event: InboundEvent) {
        if self.is_disposed() {
            debug!("Session {} ignoring {} after disposal", self.key, event.kind());
            return;
        }

        match event {
            InboundEvent::Init { version, context } => self.start_init(version, context),
            InboundEvent::AudioChunk(chunk) => self.on_audio_chunk(chunk),
            InboundEvent::PlaybackState { state } => self.on_playback_state(state).await,
            InboundEvent::Heartbeat { .. } => self.on_heartbeat(),
            InboundEvent::Stop { reason } => self.dispose(&reason),
        }
    }

    fn start_init(self: &Arc<Self>, version: u32, context: StreamContext) {
        if self
            .init_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Session {} ignoring duplicate Init while one is in flight", self.key);
            return;
        }

        let session = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(failure) = session.initialize(version, context).await {
                session.fail(failure);
            }
            session.init_in_flight.store(false, Ordering::SeqCst);
        });
    }

    async fn initialize(
        self: &Arc<Self>,
        version: u32,
        context: StreamContext,
    ) -> Result<(), SessionFailure> {
        if version != PROTOCOL_VERSION {
            return Err(SessionFailure::new(
                ErrorCode::VersionMismatch,
                format!(
                    "expected protocol version {}, got {}",
                    PROTOCOL_VERSION, version
                ),
            ));
        }

        if !context.is_live {
            return Err(SessionFailure::new(
                ErrorCode::NotLive,
                format!("stream {} is not live", context.source_url),
            ));
        }

        // Already initialized (e.g. the page re-injected its script): refresh and re-announce
        let ready_key = {
            let mut inner = self.inner.lock();
            let key = inner
                .engines
                .as_ref()
                .filter(|leases| leases.stream.is_some())
                .map(|leases| leases.recognizer_key.clone());
            if key.is_some() {
                inner.context = Some(context.clone());
            }
            key
        };
        if let Some(engine_key) = ready_key {
            debug!("Session {} re-initialized on existing engines", self.key);
            self.emit_ready(&engine_key);
            return Ok(());
        }

        let settings = self
            .deps
            .settings
            .load()
            .await
            .map_err(|e| SessionFailure::from_error(ErrorCode::SettingsUnavailable, &e))?;

        let registry = &self.deps.registry;
        let recognizer_key = registry.recognition_key(&settings.recognition);
        let translator_key = registry.translation_key(&settings.translation);
        let idle_dispose = settings.engine_idle_dispose();

        let (recognition, rkey) = (&settings.recognition, &recognizer_key);
        let recognizer = self
            .deps
            .recognizers
            .acquire(rkey, move || registry.create_recognizer(rkey, recognition))
            .await
            .map_err(|e| SessionFailure::from_error(ErrorCode::EngineInitFailed, &e))?;

        if self.is_disposed() {
            self.deps.recognizers.release(&recognizer_key, idle_dispose);
            return Ok(());
        }

        let (translation, tkey) = (&settings.translation, &translator_key);
        let translator = match self
            .deps
            .translators
            .acquire(tkey, move || registry.create_translator(tkey, translation))
            .await
        {
            Ok(translator) => translator,
            Err(e) => {
                self.deps.recognizers.release(&recognizer_key, idle_dispose);
                return Err(SessionFailure::from_error(ErrorCode::EngineInitFailed, &e));
            }
        };

        // Record the leases first so a disposal racing initialization releases them
        {
            let mut inner = self.inner.lock();
            if self.is_disposed() {
                drop(inner);
                self.deps.recognizers.release(&recognizer_key, idle_dispose);
                self.deps.translators.release(&translator_key, idle_dispose);
                return Ok(());
            }
            inner.queue.set_capacity(settings.max_pending_audio_chunks);
            inner.context = Some(context.clone());
            inner.settings = Some(settings);
            inner.engines = Some(EngineLeases {
                recognizer_key: recognizer_key.clone(),
                translator_key,
                translator,
                stream: None,
                idle_dispose,
            });
        }

        let (events, engine_rx) = EngineEvents::channel();
        tokio::spawn(Arc::clone(self).forward_engine_events(engine_rx));

        let stream = recognizer
            .initialize(&context, events)
            .await
            .map_err(|e| SessionFailure::from_error(ErrorCode::EngineInitFailed, &e))?;

        {
            let mut inner = self.inner.lock();
            if self.is_disposed() {
                return Ok(());
            }
            if let Some(leases) = inner.engines.as_mut() {
                leases.stream = Some(Arc::from(stream));
            }
            inner.state = SessionState::Running;
            inner.last_heartbeat = Instant::now();
        }

        info!(
            "Session {} running on {} ({})",
            self.key, recognizer_key, context.source_url
        );
        self.emit_ready(&recognizer_key);

        Ok(())
    }

    fn emit_ready(&self, engine_key: &EngineKey) {
        self.emit(OutboundEvent::Ready {
            session_id: self.id.to_string(),
            engine_key: engine_key.to_string(),
        });
    }

    fn on_audio_chunk(self: &Arc<Self>, chunk: AudioChunk) {
        let start_flush = {
            let mut inner = self.inner.lock();
            inner.last_heartbeat = Instant::now();

            if !inner.state.accepts_audio() || inner.stream().is_none() {
                debug!("Session {} ignoring audio in state {:?}", self.key, inner.state);
                return;
            }

            if !inner.queue.offer(chunk) {
                let now = Instant::now();
                let log_due = inner
                    .last_drop_log
                    .map_or(true, |last| now.duration_since(last) >= DROP_LOG_INTERVAL);
                if log_due {
                    inner.last_drop_log = Some(now);
                    warn!(
                        "Session {} audio queue full ({} pending), {} chunk(s) dropped so far",
                        self.key,
                        inner.queue.len(),
                        inner.queue.dropped()
                    );
                }
                return;
            }

            !self.flushing.swap(true, Ordering::SeqCst)
        };

        if start_flush {
            tokio::spawn(Arc::clone(self).flush_audio());
        }
    }

    /// Single-flight loop pushing queued audio to the recognizer in FIFO order
    async fn flush_audio(self: Arc<Self>) {
        loop {
            let next = {
                let inner = self.inner.lock();
                let next = if self.is_disposed() {
                    None
                } else {
                    inner.queue.front().zip(inner.stream())
                };
                if next.is_none() {
                    // Cleared under the lock so a concurrent enqueue restarts the loop
                    self.flushing.store(false, Ordering::SeqCst);
                }
                next
            };

            let Some((chunk, stream)) = next else {
                return;
            };

            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                result = stream.push_audio(&chunk, &self.cancel) => result,
            };

            let mut inner = self.inner.lock();
            if self.is_disposed() {
                return;
            }
            inner.queue.pop_front();
            match result {
                Ok(()) => inner.pushed += 1,
                Err(e) => warn!(
                    "Session {} failed to push audio chunk at {}ms: {:#}",
                    self.key, chunk.timestamp_ms, e
                ),
            }
        }
    }

    async fn on_playback_state(&self, state: PlaybackState) {
        let stream = {
            let mut inner = self.inner.lock();
            inner.last_heartbeat = Instant::now();
            inner.stream()
        };

        if let Some(stream) = stream {
            if let Err(e) = stream.set_playback_state(state).await {
                warn!("Session {} failed to forward playback state: {:#}", self.key, e);
            }
        }

        let mut inner = self.inner.lock();
        match (state, inner.state) {
            (PlaybackState::Paused, SessionState::Running) => {
                inner.state = SessionState::Paused;
                debug!("Session {} paused", self.key);
            }
            (PlaybackState::Playing, SessionState::Paused) => {
                inner.state = SessionState::Running;
                debug!("Session {} resumed", self.key);
            }
            _ => {}
        }
    }

    /// Refresh liveness and answer with the current counters.
    ///
    /// A failed `Stats` write disposes the session like any other write.
    fn on_heartbeat(&self) {
        let stats = {
            let mut inner = self.inner.lock();
            inner.last_heartbeat = Instant::now();
            inner.stats()
        };
        self.emit(OutboundEvent::Stats(stats));
    }

    async fn forward_engine_events(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<EngineEvent>,
    ) {
        loop {
            let event = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                event = events.recv() => event,
            };
            let Some(event) = event else {
                break;
            };

            match event {
                EngineEvent::Segment(segment) => self.emit_segment(segment).await,
                EngineEvent::Error {
                    message,
                    fatal: true,
                } => {
                    let code = if self.state() == SessionState::Idle {
                        ErrorCode::EngineInitFailed
                    } else {
                        ErrorCode::EngineFatal
                    };
                    self.fail(SessionFailure::new(code, message));
                    break;
                }
                EngineEvent::Error {
                    message,
                    fatal: false,
                } => {
                    warn!("Session {} engine error: {}", self.key, message);
                    self.emit(OutboundEvent::SessionError {
                        code: ErrorCode::EngineError,
                        message,
                        fatal: false,
                    });
                }
            }
        }
    }

    async fn emit_segment(&self, segment: RecognizedSegment) {
        let (translator, settings) = {
            let inner = self.inner.lock();
            match (inner.engines.as_ref(), inner.settings.as_ref()) {
                (Some(leases), Some(settings)) => {
                    (Arc::clone(&leases.translator), settings.clone())
                }
                _ => return,
            }
        };

        let translation = &settings.translation;
        let should_translate = translation.enabled
            && (segment.is_final || settings.partial_translation_enabled);

        let translated_text = if should_translate {
            let source = translation
                .source_language
                .as_deref()
                .or(segment.language.as_deref())
                .unwrap_or("auto");
            match translator
                .translate(
                    &segment.text,
                    source,
                    &translation.target_language,
                    segment.is_final,
                    &self.cancel,
                )
                .await
            {
                Ok(text) => Some(text),
                Err(e) => {
                    warn!(
                        "Session {} translation failed, emitting original text: {:#}",
                        self.key, e
                    );
                    None
                }
            }
        } else {
            None
        };

        if self.is_disposed() {
            return;
        }

        let revision = {
            let mut inner = self.inner.lock();
            inner.revision += 1;
            inner.revision
        };

        self.emit(OutboundEvent::TranscriptUpdate(TranscriptSegment {
            text: segment.text,
            translated_text,
            is_final: segment.is_final,
            start_ms: segment.start_ms,
            end_ms: segment.end_ms,
            language: segment.language,
            revision,
            created_at: Utc::now(),
        }));
    }

    /// Write to the bound channel; a failed write disposes the session
    fn emit(&self, event: OutboundEvent) -> bool {
        let outbound = self
            .inner
            .lock()
            .binding
            .as_ref()
            .map(|binding| binding.outbound.clone());

        let Some(outbound) = outbound else {
            debug!("Session {} has no channel, dropping outbound event", self.key);
            return false;
        };

        if outbound.send(event).is_err() {
            warn!("Session {} channel closed while writing", self.key);
            self.dispose("channel write failed");
            return false;
        }
        true
    }

    /// Report a fatal failure to the channel, then dispose
    fn fail(&self, failure: SessionFailure) {
        warn!("Session {} failed: {}", self.key, failure);
        self.inner.lock().state = SessionState::Error;
        self.emit(OutboundEvent::SessionError {
            code: failure.code,
            message: failure.message,
            fatal: true,
        });
        self.dispose(&failure.code.as_str().to_lowercase());
    }

    /// Tear the session down. Idempotent; later calls are no-ops.
    ///
    /// Unbinds the channel, discards pending audio, releases both engine leases
    /// (idle eviction, not immediate destruction), sends `Stopped` best-effort and
    /// notifies the owner.
    pub fn dispose(&self, reason: &str) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();

        let (binding, leases, discarded) = {
            let mut inner = self.inner.lock();
            inner.state = SessionState::Closed;
            let discarded = inner.queue.clear();
            (inner.binding.take(), inner.engines.take(), discarded)
        };

        if let Some(leases) = leases {
            drop(leases.stream);
            self.deps
                .recognizers
                .release(&leases.recognizer_key, leases.idle_dispose);
            self.deps
                .translators
                .release(&leases.translator_key, leases.idle_dispose);
        }

        if let Some(binding) = binding {
            binding.reader.cancel();
            let _ = binding.outbound.send(OutboundEvent::Stopped {
                reason: reason.to_string(),
            });
        }

        info!(
            "Session {} ({}) disposed: {} ({} pending chunk(s) discarded)",
            self.key, self.id, reason, discarded
        );

        (self.deps.on_disposed)(&self.key, self.id);
    }
}
