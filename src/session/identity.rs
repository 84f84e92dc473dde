use crate::channel::ChannelSender;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Frame id assumed when a channel does not report one (top-level frame)
const TOP_FRAME_ID: u32 = 0;

/// Registry identity of a session: one per tab/frame pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionKey {
    pub tab_id: u32,
    pub frame_id: u32,
}

impl SessionKey {
    pub fn new(tab_id: u32, frame_id: u32) -> Self {
        Self { tab_id, frame_id }
    }

    /// Derive the identity of a channel; `None` when the sender has no tab
    pub fn from_sender(sender: &ChannelSender) -> Option<Self> {
        let tab_id = sender.tab_id?;
        Some(Self {
            tab_id,
            frame_id: sender.frame_id.unwrap_or(TOP_FRAME_ID),
        })
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tab_id, self.frame_id)
    }
}

/// Session state machine.
///
/// State transitions:
/// ```text
/// idle → running ↔ paused
///          ↓
///        error → closed
/// ```
/// Any state can move to `closed`, which is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Running,
    Paused,
    Error,
    Closed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }

    pub fn accepts_audio(&self) -> bool {
        matches!(self, Self::Running)
    }
}
