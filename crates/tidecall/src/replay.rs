//! Client-side replay buffer.
//!
//! Events fetched in the background during `wait()` land here so they are
//! not lost before the caller's next explicit `get_events()`, which drains
//! this buffer ahead of the freshly retrieved batch. Bounded; oldest
//! dropped on overflow.

use std::collections::VecDeque;

use tideproto::Event;

#[derive(Debug)]
pub struct ReplayBuffer {
    events: VecDeque<Event>,
    capacity: usize,
}

impl ReplayBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, event: Event) {
        if self.events.len() >= self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    pub fn extend(&mut self, events: impl IntoIterator<Item = Event>) {
        for event in events {
            self.push(event);
        }
    }

    /// Empty the buffer in arrival order (oldest first).
    pub fn drain(&mut self) -> Vec<Event> {
        self.events.drain(..).collect()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tideproto::{EventData, EventKind};

    fn event(id: u64) -> Event {
        Event {
            event_id: id,
            device: "pulse".into(),
            kind: EventKind::Pulse,
            device_time: id as f64,
            logged_time: id as f64,
            time: id as f64,
            confidence_interval: 0.0,
            delay: 0.0,
            data: EventData::Pulse { count: id },
        }
    }

    #[test]
    fn drains_in_arrival_order() {
        let mut buffer = ReplayBuffer::new(10);
        buffer.extend([event(1), event(2), event(3)]);
        let ids: Vec<u64> = buffer.drain().iter().map(|e| e.event_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn overflow_drops_oldest() {
        let mut buffer = ReplayBuffer::new(3);
        buffer.extend((0..7).map(event));
        assert_eq!(buffer.len(), 3);
        let ids: Vec<u64> = buffer.drain().iter().map(|e| e.event_id).collect();
        assert_eq!(ids, vec![4, 5, 6]);
    }
}
