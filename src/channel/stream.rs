use super::events::{InboundEvent, OutboundEvent};
use crate::error::ErrorCode;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Default inbound buffer for `StreamChannel::pair`
const DEFAULT_INBOUND_CAPACITY: usize = 256;

/// Metadata about whoever opened a channel (browser tab / frame)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSender {
    pub tab_id: Option<u32>,
    pub frame_id: Option<u32>,
    pub url: Option<String>,
}

impl ChannelSender {
    pub fn tab(tab_id: u32, frame_id: u32) -> Self {
        Self {
            tab_id: Some(tab_id),
            frame_id: Some(frame_id),
            url: None,
        }
    }
}

/// Session-side end of an event pipe
pub struct StreamChannel {
    id: Uuid,
    sender: ChannelSender,
    inbound: mpsc::Receiver<InboundEvent>,
    outbound: mpsc::UnboundedSender<OutboundEvent>,
}

/// Page-side end of an event pipe
pub struct ChannelPeer {
    inbound: mpsc::Sender<InboundEvent>,
    outbound: mpsc::UnboundedReceiver<OutboundEvent>,
}

impl StreamChannel {
    /// Create a connected channel/peer pair
    pub fn pair(sender: ChannelSender) -> (StreamChannel, ChannelPeer) {
        Self::pair_with_capacity(sender, DEFAULT_INBOUND_CAPACITY)
    }

    pub fn pair_with_capacity(sender: ChannelSender, capacity: usize) -> (StreamChannel, ChannelPeer) {
        let (in_tx, in_rx) = mpsc::channel(capacity.max(1));
        let (out_tx, out_rx) = mpsc::unbounded_channel();

        let channel = StreamChannel {
            id: Uuid::new_v4(),
            sender,
            inbound: in_rx,
            outbound: out_tx,
        };
        let peer = ChannelPeer {
            inbound: in_tx,
            outbound: out_rx,
        };

        (channel, peer)
    }

    /// Wrap transport-owned pipes as a channel
    pub fn from_parts(
        sender: ChannelSender,
        inbound: mpsc::Receiver<InboundEvent>,
        outbound: mpsc::UnboundedSender<OutboundEvent>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender,
            inbound,
            outbound,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn sender(&self) -> &ChannelSender {
        &self.sender
    }

    /// Report a fatal error to the peer and close the channel.
    ///
    /// Best-effort: a peer that already went away is ignored.
    pub fn close_with_error(self, code: ErrorCode, message: impl Into<String>) {
        let message = message.into();
        let _ = self.outbound.send(OutboundEvent::SessionError {
            code,
            message: message.clone(),
            fatal: true,
        });
        let _ = self.outbound.send(OutboundEvent::Stopped {
            reason: code.as_str().to_lowercase(),
        });
        debug!("Closed channel {} ({}: {})", self.id, code, message);
    }

    pub(crate) fn into_parts(
        self,
    ) -> (
        Uuid,
        mpsc::Receiver<InboundEvent>,
        mpsc::UnboundedSender<OutboundEvent>,
    ) {
        (self.id, self.inbound, self.outbound)
    }
}

impl ChannelPeer {
    /// Send an event to the session
    pub async fn send(&self, event: InboundEvent) -> Result<()> {
        self.inbound
            .send(event)
            .await
            .context("Session side of channel is closed")
    }

    /// Receive the next outbound event; `None` once the session closed the channel
    pub async fn recv(&mut self) -> Option<OutboundEvent> {
        self.outbound.recv().await
    }

    pub fn try_recv(&mut self) -> Option<OutboundEvent> {
        self.outbound.try_recv().ok()
    }

    /// Drain every outbound event currently buffered
    pub fn drain(&mut self) -> Vec<OutboundEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.outbound.try_recv() {
            events.push(event);
        }
        events
    }

    pub fn is_closed(&self) -> bool {
        self.inbound.is_closed()
    }
}
