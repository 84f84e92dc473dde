use crate::error::ErrorCode;
use crate::session::{SessionStats, TranscriptSegment};
use serde::{Deserialize, Serialize};

/// Protocol version expected in `Init`
pub const PROTOCOL_VERSION: u32 = 1;

/// Description of the media stream a session transcribes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamContext {
    /// URL of the page or media element producing audio
    pub source_url: String,

    /// Whether the stream is live; non-live streams are rejected
    pub is_live: bool,

    /// Client wall-clock time the stream started (ms since epoch)
    pub started_at_ms: u64,

    /// Current playback rate (1.0 = realtime)
    #[serde(default = "default_playback_rate")]
    pub playback_rate: f32,
}

fn default_playback_rate() -> f32 {
    1.0
}

/// One block of captured audio (mono f32 PCM)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioChunk {
    /// Sample rate in Hz
    pub sample_rate: u32,

    /// Number of channels (always 1, capture downmixes)
    #[serde(default = "default_channel_count")]
    pub channel_count: u16,

    /// Capture timestamp in milliseconds since the stream started
    pub timestamp_ms: u64,

    /// PCM samples in [-1.0, 1.0]
    pub pcm_samples: Vec<f32>,
}

fn default_channel_count() -> u16 {
    1
}

impl AudioChunk {
    /// Duration of this chunk in milliseconds
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        let frames = self.pcm_samples.len() as u64 / self.channel_count.max(1) as u64;
        frames * 1000 / self.sample_rate as u64
    }
}

/// Playback state of the media element feeding a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Playing,
    Paused,
    Stalled,
    Ended,
}

/// Events sent by the page to its session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum InboundEvent {
    Init {
        version: u32,
        context: StreamContext,
    },
    AudioChunk(AudioChunk),
    PlaybackState {
        state: PlaybackState,
    },
    Heartbeat {
        /// Client clock in ms since epoch
        now: u64,
    },
    Stop {
        reason: String,
    },
}

impl InboundEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            InboundEvent::Init { .. } => "init",
            InboundEvent::AudioChunk(_) => "audioChunk",
            InboundEvent::PlaybackState { .. } => "playbackState",
            InboundEvent::Heartbeat { .. } => "heartbeat",
            InboundEvent::Stop { .. } => "stop",
        }
    }
}

/// Events sent by a session back to its page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum OutboundEvent {
    Ready {
        session_id: String,
        engine_key: String,
    },
    TranscriptUpdate(TranscriptSegment),
    SessionError {
        code: ErrorCode,
        message: String,
        fatal: bool,
    },
    Stopped {
        reason: String,
    },
    Stats(SessionStats),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_events_use_tagged_camel_case_json() {
        let json = r#"{
            "type": "init",
            "version": 1,
            "context": {
                "sourceUrl": "https://example.com/live",
                "isLive": true,
                "startedAtMs": 1700000000000
            }
        }"#;

        let event: InboundEvent = serde_json::from_str(json).unwrap();
        match event {
            InboundEvent::Init { version, context } => {
                assert_eq!(version, PROTOCOL_VERSION);
                assert!(context.is_live);
                assert_eq!(context.playback_rate, 1.0);
            }
            other => panic!("unexpected event: {:?}", other),
        }

        let chunk: InboundEvent = serde_json::from_str(
            r#"{"type":"audioChunk","sampleRate":16000,"timestampMs":20,"pcmSamples":[0.0,0.5]}"#,
        )
        .unwrap();
        assert_eq!(chunk.kind(), "audioChunk");
    }

    #[test]
    fn outbound_error_serializes_code() {
        let event = OutboundEvent::SessionError {
            code: ErrorCode::VersionMismatch,
            message: "expected 1".to_string(),
            fatal: true,
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"sessionError\""));
        assert!(json.contains("\"code\":\"VERSION_MISMATCH\""));
        assert!(json.contains("\"fatal\":true"));
    }

    #[test]
    fn chunk_duration_from_sample_count() {
        let chunk = AudioChunk {
            sample_rate: 16000,
            channel_count: 1,
            timestamp_ms: 0,
            pcm_samples: vec![0.0; 1600],
        };
        assert_eq!(chunk.duration_ms(), 100);
    }
}
