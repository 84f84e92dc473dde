//! Live transcription sessions
//!
//! This module provides the `Session` state machine that manages:
//! - Protocol handshake and stream validation (Init)
//! - Engine leases from the shared recognition/translation pools
//! - Bounded audio queue with drop-incoming backpressure and an ordered flush loop
//! - Transcript emission with optional translation and per-session revisions
//! - Idempotent disposal on stop, failure, disconnect or heartbeat expiry

mod identity;
mod queue;
mod session;
mod settings;
mod stats;

pub use identity::{SessionKey, SessionState};
pub use session::{Session, SessionDeps};
pub use settings::{FileSettings, Settings, SettingsProvider, StaticSettings};
pub use stats::{SessionStats, TranscriptSegment};
