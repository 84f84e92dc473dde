use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Counters reported by a session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    /// Chunks rejected because the audio queue was full
    pub dropped_audio_chunks: u64,

    /// Chunks queued, including the one being pushed
    pub pending_audio_chunks: usize,

    /// Number of times a new channel replaced the bound one
    pub reconnect_count: u32,

    /// Chunks offered while running (accepted or dropped)
    pub received_audio_chunks: u64,

    /// Chunks the recognizer accepted
    pub pushed_audio_chunks: u64,
}

/// A transcript update emitted to the page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptSegment {
    /// Recognized text
    pub text: String,

    /// Translation of `text`, if translation ran and succeeded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translated_text: Option<String>,

    /// Whether this is a final (non-interim) result
    pub is_final: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_ms: Option<u64>,

    /// Source language tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    /// Per-session revision, 1, 2, 3, ...
    pub revision: u64,

    /// When this segment was emitted
    pub created_at: DateTime<Utc>,
}
