//! Session registry and lifecycle
//!
//! `SessionManager` binds stream channels to sessions, caps the number of concurrent
//! sessions, reaps sessions whose heartbeat expired and owns the two engine pools
//! shared by every session.

use crate::channel::StreamChannel;
use crate::engine::{EngineRegistry, RecognitionEngine, TranslationEngine};
use crate::error::AttachError;
use crate::pool::EnginePool;
use crate::session::{Session, SessionDeps, SessionKey, Settings, SettingsProvider};
use anyhow::{bail, Context, Result};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

type SessionMap = HashMap<SessionKey, Arc<Session>>;

/// Liveness sweep timing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerOptions {
    /// Time between two heartbeat sweeps
    pub sweep_interval: Duration,

    /// Heartbeat age after which a session is disposed
    pub heartbeat_timeout: Duration,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(5),
            heartbeat_timeout: Duration::from_secs(15),
        }
    }
}

/// Result of a successful `attach_channel`
#[derive(Clone)]
pub enum Attached {
    /// A new session was registered for the channel's identity
    Created(Arc<Session>),
    /// The channel replaced the channel of an existing session
    Rebound(Arc<Session>),
}

impl Attached {
    pub fn session(&self) -> &Arc<Session> {
        match self {
            Attached::Created(session) | Attached::Rebound(session) => session,
        }
    }

    pub fn is_rebound(&self) -> bool {
        matches!(self, Attached::Rebound(_))
    }
}

pub struct SessionManager {
    settings_provider: Arc<dyn SettingsProvider>,
    engines: Arc<dyn EngineRegistry>,
    recognizers: Arc<EnginePool<dyn RecognitionEngine>>,
    translators: Arc<EnginePool<dyn TranslationEngine>>,
    sessions: Arc<Mutex<SessionMap>>,
    /// Manager-level settings snapshot (`max_sessions`)
    settings: RwLock<Settings>,
    options: ManagerOptions,
    shutdown: CancellationToken,
    sweep_task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    /// Load settings and start the heartbeat sweep.
    ///
    /// Fails on a zero `sweep_interval`.
    pub async fn create(
        settings_provider: Arc<dyn SettingsProvider>,
        engines: Arc<dyn EngineRegistry>,
        options: ManagerOptions,
    ) -> Result<Arc<Self>> {
        if options.sweep_interval.is_zero() {
            bail!("Heartbeat sweep interval must be greater than zero");
        }

        let settings = settings_provider
            .load()
            .await
            .context("Failed to load initial settings")?;

        info!(
            "Session manager starting (max {} sessions, sweep every {}ms, heartbeat timeout {}ms)",
            settings.max_sessions,
            options.sweep_interval.as_millis(),
            options.heartbeat_timeout.as_millis()
        );

        let manager = Arc::new(Self {
            settings_provider,
            engines,
            recognizers: Arc::new(EnginePool::new("recognizers")),
            translators: Arc::new(EnginePool::new("translators")),
            sessions: Arc::new(Mutex::new(HashMap::new())),
            settings: RwLock::new(settings),
            options,
            shutdown: CancellationToken::new(),
            sweep_task: Mutex::new(None),
        });

        let sweep = tokio::spawn(sweep_loop(
            Arc::downgrade(&manager),
            manager.options.sweep_interval,
            manager.shutdown.clone(),
        ));
        *manager.sweep_task.lock() = Some(sweep);

        Ok(manager)
    }

    /// Bind `channel` to the session of its tab/frame, creating one if needed.
    ///
    /// Rejected channels receive a fatal `SessionError` and are closed.
    pub fn attach_channel(&self, channel: StreamChannel) -> Result<Attached, AttachError> {
        let outcome = self.register(&channel);

        match &outcome {
            Ok(attached) => attached.session().bind(channel),
            Err(err) => {
                warn!("Rejected channel {}: {}", channel.id(), err);
                channel.close_with_error(err.code(), err.to_string());
            }
        }

        outcome
    }

    fn register(&self, channel: &StreamChannel) -> Result<Attached, AttachError> {
        if self.shutdown.is_cancelled() {
            return Err(AttachError::ShuttingDown);
        }

        let key = SessionKey::from_sender(channel.sender()).ok_or(AttachError::MissingIdentity)?;
        let max = self.settings.read().max_sessions;

        let mut sessions = self.sessions.lock();
        if let Some(existing) = sessions.get(&key).filter(|s| !s.is_disposed()) {
            return Ok(Attached::Rebound(Arc::clone(existing)));
        }

        if sessions.len() >= max {
            return Err(AttachError::CapacityExceeded { max });
        }

        let session = Session::new(key, self.session_deps());
        sessions.insert(key, Arc::clone(&session));
        info!(
            "Session {} ({}) created, {} active",
            key,
            session.id(),
            sessions.len()
        );

        Ok(Attached::Created(session))
    }

    fn session_deps(&self) -> SessionDeps {
        let registry: Weak<Mutex<SessionMap>> = Arc::downgrade(&self.sessions);

        SessionDeps {
            settings: Arc::clone(&self.settings_provider),
            registry: Arc::clone(&self.engines),
            recognizers: Arc::clone(&self.recognizers),
            translators: Arc::clone(&self.translators),
            on_disposed: Arc::new(move |key: &SessionKey, id: Uuid| {
                let Some(registry) = registry.upgrade() else {
                    return;
                };
                let mut sessions = registry.lock();
                // A replacement session may already own this key
                if sessions.get(key).map_or(false, |s| s.id() == id) {
                    sessions.remove(key);
                    debug!("Session {} removed, {} active", key, sessions.len());
                }
            }),
        }
    }

    /// Dispose every session of `tab_id`; returns how many were disposed
    pub fn detach_tab(&self, tab_id: u32) -> usize {
        let targets: Vec<Arc<Session>> = self
            .sessions
            .lock()
            .values()
            .filter(|s| s.key().tab_id == tab_id)
            .cloned()
            .collect();

        for session in &targets {
            session.dispose("tab detached");
        }

        if !targets.is_empty() {
            info!("Detached tab {} ({} session(s))", tab_id, targets.len());
        }
        targets.len()
    }

    /// Dispose sessions whose last heartbeat is older than the timeout
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let timeout = self.options.heartbeat_timeout;

        let expired: Vec<Arc<Session>> = self
            .sessions
            .lock()
            .values()
            .filter(|s| now.duration_since(s.last_heartbeat()) > timeout)
            .cloned()
            .collect();

        for session in &expired {
            warn!(
                "Session {} missed heartbeat for over {}ms",
                session.key(),
                timeout.as_millis()
            );
            session.dispose("heartbeat timeout");
        }

        expired.len()
    }

    /// Re-read the settings accessor for manager-level values.
    ///
    /// Running sessions keep the snapshot they took at Init.
    pub async fn refresh_settings(&self) -> Result<Settings> {
        let settings = self
            .settings_provider
            .load()
            .await
            .context("Failed to refresh settings")?;
        *self.settings.write() = settings.clone();
        Ok(settings)
    }

    /// Dispose every session, stop the sweep and drain both engine pools
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        if let Some(sweep) = self.sweep_task.lock().take() {
            sweep.abort();
        }

        let sessions: Vec<Arc<Session>> = self.sessions.lock().values().cloned().collect();
        info!("Shutting down {} session(s)", sessions.len());
        for session in &sessions {
            session.dispose("shutdown");
        }

        tokio::join!(self.recognizers.dispose_all(), self.translators.dispose_all());
        info!("Session manager stopped");
    }

    pub fn session(&self, key: &SessionKey) -> Option<Arc<Session>> {
        self.sessions.lock().get(key).cloned()
    }

    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.sessions.lock().values().cloned().collect()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn settings(&self) -> Settings {
        self.settings.read().clone()
    }

    pub fn options(&self) -> &ManagerOptions {
        &self.options
    }

    pub fn recognizers(&self) -> &Arc<EnginePool<dyn RecognitionEngine>> {
        &self.recognizers
    }

    pub fn translators(&self) -> &Arc<EnginePool<dyn TranslationEngine>> {
        &self.translators
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn sweep_loop(manager: Weak<SessionManager>, period: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let Some(manager) = manager.upgrade() else {
            break;
        };
        let expired = manager.sweep_expired();
        if expired > 0 {
            debug!("Heartbeat sweep disposed {} session(s)", expired);
        }
    }
}
