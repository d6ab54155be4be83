//! Global event buffer: the hub-side holding area for events awaiting
//! client retrieval.
//!
//! Bounded ring over a `VecDeque`. When full, the oldest event is silently
//! evicted - documented data loss, not an error; the `dropped` counter in
//! [`BufferStats`] makes the loss observable through the status RPC.

use std::collections::VecDeque;

use tideproto::{BufferStats, Event};
use tracing::trace;

/// Bounded, time-ordered holding area for events destined for the client.
#[derive(Debug)]
pub struct GlobalEventBuffer {
    events: VecDeque<Event>,
    capacity: usize,
    total_pushed: u64,
    dropped: u64,
}

impl GlobalEventBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
            total_pushed: 0,
            dropped: 0,
        }
    }

    /// Append an event, evicting the oldest when at capacity.
    pub fn push(&mut self, event: Event) {
        if self.events.len() >= self.capacity {
            self.events.pop_front();
            self.dropped += 1;
        }
        self.events.push_back(event);
        self.total_pushed += 1;
        trace!(
            len = self.events.len(),
            total = self.total_pushed,
            "buffered event"
        );
    }

    /// Empty the buffer, returning its contents in ascending hub-time
    /// order.
    ///
    /// Within one pipeline tick events arrive pre-sorted, but a slow
    /// device's events can land in a later tick than a fast device's newer
    /// ones, so the drain re-sorts across tick boundaries.
    pub fn drain_sorted(&mut self) -> Vec<Event> {
        let mut events: Vec<Event> = self.events.drain(..).collect();
        events.sort_by(|a, b| a.time.total_cmp(&b.time));
        events
    }

    /// Discard all buffered events, returning how many were dropped.
    pub fn clear(&mut self) -> usize {
        let n = self.events.len();
        self.events.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn stats(&self) -> BufferStats {
        BufferStats {
            len: self.events.len(),
            capacity: self.capacity,
            total_pushed: self.total_pushed,
            dropped: self.dropped,
        }
    }
}
