use crate::channel::AudioChunk;
use std::collections::VecDeque;
use std::sync::Arc;

/// Bounded FIFO of pending audio with drop-incoming backpressure.
///
/// The chunk being pushed to the recognizer stays at the head until its push
/// settles, so `len()` never exceeds `capacity` even counting in-flight audio.
pub(crate) struct AudioQueue {
    chunks: VecDeque<Arc<AudioChunk>>,
    capacity: usize,
    dropped: u64,
    received: u64,
}

impl AudioQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            chunks: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            dropped: 0,
            received: 0,
        }
    }

    pub(crate) fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
    }

    /// Append `chunk`, or drop it when full. Returns whether it was queued.
    pub(crate) fn offer(&mut self, chunk: AudioChunk) -> bool {
        self.received += 1;
        if self.chunks.len() >= self.capacity {
            self.dropped += 1;
            return false;
        }
        self.chunks.push_back(Arc::new(chunk));
        true
    }

    pub(crate) fn front(&self) -> Option<Arc<AudioChunk>> {
        self.chunks.front().cloned()
    }

    pub(crate) fn pop_front(&mut self) -> Option<Arc<AudioChunk>> {
        self.chunks.pop_front()
    }

    /// Discard everything pending; returns how many chunks were discarded
    pub(crate) fn clear(&mut self) -> usize {
        let discarded = self.chunks.len();
        self.chunks.clear();
        discarded
    }

    pub(crate) fn len(&self) -> usize {
        self.chunks.len()
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.dropped
    }

    pub(crate) fn received(&self) -> u64 {
        self.received
    }
}
