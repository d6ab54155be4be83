//! Per-device event stream transforms.
//!
//! A filter maps one event to zero or more output events and may hold
//! internal state, so chains compose: suppression, smoothing, and
//! splitting are all `apply` behaviors. Filters run in registration order
//! inside the pipeline, before listener fan-out, and are testable without
//! a running hub.

use std::collections::{HashMap, VecDeque};

use tideproto::{Event, EventData, EventKind};

pub trait EventFilter: Send + Sync {
    fn name(&self) -> &str;

    /// Transform one event into zero or more output events.
    fn apply(&mut self, event: Event) -> Vec<Event>;

    /// Drop accumulated state, as if freshly constructed.
    fn reset(&mut self) {}
}

/// Windowed per-channel mean over analog samples. Non-analog events pass
/// through untouched.
pub struct MovingAverage {
    window: usize,
    history: VecDeque<Vec<f64>>,
}

impl MovingAverage {
    pub fn new(window: usize) -> Self {
        assert!(window > 0, "window must be at least 1");
        Self {
            window,
            history: VecDeque::with_capacity(window),
        }
    }
}

impl EventFilter for MovingAverage {
    fn name(&self) -> &str {
        "moving_average"
    }

    fn apply(&mut self, mut event: Event) -> Vec<Event> {
        let voltages = match &event.data {
            EventData::Analog { voltages } => voltages.clone(),
            _ => return vec![event],
        };

        if self.history.len() >= self.window {
            self.history.pop_front();
        }
        self.history.push_back(voltages);

        let channels = self.history.back().map(|v| v.len()).unwrap_or(0);
        let mut means = vec![0.0; channels];
        for sample in &self.history {
            for (ch, v) in sample.iter().enumerate().take(channels) {
                means[ch] += v;
            }
        }
        let n = self.history.len() as f64;
        for mean in &mut means {
            *mean /= n;
        }

        event.data = EventData::Analog { voltages: means };
        vec![event]
    }

    fn reset(&mut self) {
        self.history.clear();
    }
}

/// Keep every N-th event of the configured kinds, suppress the rest.
/// Unconfigured kinds pass through.
pub struct Downsample {
    kinds: Vec<EventKind>,
    factor: u64,
    counters: HashMap<EventKind, u64>,
}

impl Downsample {
    pub fn new(kinds: Vec<EventKind>, factor: u64) -> Self {
        assert!(factor > 0, "factor must be at least 1");
        Self {
            kinds,
            factor,
            counters: HashMap::new(),
        }
    }
}

impl EventFilter for Downsample {
    fn name(&self) -> &str {
        "downsample"
    }

    fn apply(&mut self, event: Event) -> Vec<Event> {
        if !self.kinds.contains(&event.kind) {
            return vec![event];
        }
        let counter = self.counters.entry(event.kind).or_insert(0);
        let keep = *counter % self.factor == 0;
        *counter += 1;
        if keep {
            vec![event]
        } else {
            Vec::new()
        }
    }

    fn reset(&mut self) {
        self.counters.clear();
    }
}
