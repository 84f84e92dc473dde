use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Machine-readable error codes carried by outbound `SessionError` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Init carried a protocol version other than [`crate::PROTOCOL_VERSION`]
    VersionMismatch,
    /// The stream context declared itself non-live
    NotLive,
    /// The settings accessor failed while snapshotting settings at Init
    SettingsUnavailable,
    /// Engine construction, acquisition or initialization failed
    EngineInitFailed,
    /// An engine reported a fatal runtime error
    EngineFatal,
    /// An engine reported a recoverable runtime error
    EngineError,
    /// The session registry is full
    CapacityExceeded,
    /// No tab/frame identity could be derived from the channel
    InvalidChannel,
    /// The manager is shutting down
    ShuttingDown,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::VersionMismatch => "VERSION_MISMATCH",
            ErrorCode::NotLive => "NOT_LIVE",
            ErrorCode::SettingsUnavailable => "SETTINGS_UNAVAILABLE",
            ErrorCode::EngineInitFailed => "ENGINE_INIT_FAILED",
            ErrorCode::EngineFatal => "ENGINE_FATAL",
            ErrorCode::EngineError => "ENGINE_ERROR",
            ErrorCode::CapacityExceeded => "CAPACITY_EXCEEDED",
            ErrorCode::InvalidChannel => "INVALID_CHANNEL",
            ErrorCode::ShuttingDown => "SHUTTING_DOWN",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A session-terminating failure: reported to the channel, then the session is disposed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct SessionFailure {
    pub code: ErrorCode,
    pub message: String,
}

impl SessionFailure {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Wrap a collaborator error, keeping its full context chain in the message.
    pub fn from_error(code: ErrorCode, err: &anyhow::Error) -> Self {
        Self::new(code, format!("{:#}", err))
    }
}

/// Reasons `SessionManager::attach_channel` refuses a channel.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AttachError {
    #[error("channel carries no tab identity")]
    MissingIdentity,

    #[error("session capacity exceeded ({max} active sessions)")]
    CapacityExceeded { max: usize },

    #[error("session manager is shut down")]
    ShuttingDown,
}

impl AttachError {
    pub fn code(&self) -> ErrorCode {
        match self {
            AttachError::MissingIdentity => ErrorCode::InvalidChannel,
            AttachError::CapacityExceeded { .. } => ErrorCode::CapacityExceeded,
            AttachError::ShuttingDown => ErrorCode::ShuttingDown,
        }
    }
}
