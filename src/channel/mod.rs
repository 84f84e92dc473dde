//! Stream channel plumbing
//!
//! A `StreamChannel` is the session-side end of a bidirectional event pipe:
//! - Inbound: `InboundEvent`s produced by the page (init, audio, playback, heartbeat, stop)
//! - Outbound: `OutboundEvent`s produced by the session (ready, transcripts, errors, stats)
//!
//! The transport behind the pipe (extension port, websocket, ...) is not part of this crate;
//! both event enums serialize to tagged JSON so any transport can carry them.

mod events;
mod stream;

pub use events::{
    AudioChunk, InboundEvent, OutboundEvent, PlaybackState, StreamContext, PROTOCOL_VERSION,
};
pub use stream::{ChannelPeer, ChannelSender, StreamChannel};
