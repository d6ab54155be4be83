//! The event processing pipeline: drain, convert, filter, fan out.
//!
//! Runs once per hub tick and eagerly on every `GET_EVENTS` request so the
//! client never waits a full tick for fresh events. All per-event failures
//! are contained here: a bad sample or a failing sink write is logged and
//! skipped, never propagated.

use tideproto::Event;
use tracing::warn;

use crate::device::Listener;
use crate::state::HubState;

/// Process every device's pending native events through conversion,
/// filters, and listener fan-out.
///
/// Ordering guarantee: all events produced within one call are delivered
/// to the global event buffer in ascending hub-time order, across devices.
pub fn process_device_events(state: &mut HubState) {
    // Collect this tick's converted events, tagged with their device.
    let mut tick: Vec<(usize, Event)> = Vec::new();
    for idx in 0..state.devices.len() {
        loop {
            let native = match state.devices[idx].next_native() {
                Some(native) => native,
                None => break,
            };
            let event_id = state.take_event_id();
            let device = &mut state.devices[idx];
            let event = device.convert(native, event_id);
            tick.extend(device.apply_filters(event).into_iter().map(|e| (idx, e)));
        }
    }

    if tick.is_empty() {
        return;
    }

    // One global sort per tick gives the client a time-ordered stream even
    // though devices are polled independently.
    tick.sort_by(|a, b| a.1.time.total_cmp(&b.1.time));

    let devices = &mut state.devices;
    let buffer = &mut state.buffer;
    let store = &mut state.store;

    for (idx, event) in tick {
        for listener in devices[idx].listeners_for(event.kind) {
            match listener {
                Listener::DeviceBuffer => devices[idx].push_egress(event.clone()),
                Listener::GlobalBuffer => buffer.push(event.clone()),
                Listener::Datastore => {
                    if let Some(sink) = store.as_deref_mut() {
                        if let Err(e) = sink.write_event(&event) {
                            warn!(device = %event.device, error = %e, "datastore write failed");
                        }
                    }
                }
                Listener::Channel(tx) => {
                    // A dropped subscriber is not an error.
                    let _ = tx.send(event.clone());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tideproto::MonotonicClock;
    use crate::device::Listener;
    use crate::filter::Downsample;
    use crate::state::HubState;
    use tideconf::{DeviceClass, DeviceConfig};
    use tideproto::{EventData, EventKind};

    fn state_with_pulse(name: &str, interval: f64) -> HubState {
        let mut state = HubState::new(MonotonicClock::new(), 256);
        state
            .add_device(
                &DeviceConfig::new(DeviceClass::Pulse)
                    .with_name(name)
                    .with_poll_interval(interval),
            )
            .unwrap();
        state
    }

    fn pulse_count(event: &Event) -> u64 {
        match event.data {
            EventData::Pulse { count } => count,
            _ => unreachable!(),
        }
    }

    #[test]
    fn event_ids_monotone_across_devices() {
        let mut state = state_with_pulse("a", 0.01);
        state
            .add_device(
                &DeviceConfig::new(DeviceClass::Pulse)
                    .with_name("b")
                    .with_poll_interval(0.02),
            )
            .unwrap();

        for t in 0..5 {
            let now = t as f64 * 0.01;
            state.devices[0].poll_tick(now);
            state.devices[1].poll_tick(now);
        }
        process_device_events(&mut state);

        let events = state.buffer.drain_sorted();
        assert_eq!(events.len(), 10);
        // Strictly increasing hub-wide, regardless of delivery order.
        let mut ids: Vec<u64> = events.iter().map(|e| e.event_id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 10);
    }

    #[test]
    fn tick_output_is_time_ordered() {
        // Two devices polled at different cadences within one tick.
        let mut state = state_with_pulse("fast", 0.02);
        state
            .add_device(
                &DeviceConfig::new(DeviceClass::Pulse)
                    .with_name("slow")
                    .with_poll_interval(0.05),
            )
            .unwrap();

        for i in 0..50 {
            state.devices[0].poll_tick(i as f64 * 0.02);
        }
        for i in 0..20 {
            state.devices[1].poll_tick(i as f64 * 0.05);
        }
        process_device_events(&mut state);

        let events = state.buffer.drain_sorted();
        assert_eq!(events.len(), 70);
        for pair in events.windows(2) {
            assert!(pair[0].time <= pair[1].time);
        }

        // Equivalent to merge-sorting the two devices' own streams.
        let mut expected: Vec<(f64, String)> = events
            .iter()
            .map(|e| (e.time, e.device.clone()))
            .collect();
        expected.sort_by(|a, b| a.0.total_cmp(&b.0));
        let actual: Vec<(f64, String)> = events
            .iter()
            .map(|e| (e.time, e.device.clone()))
            .collect();
        assert_eq!(actual, expected);
    }

    #[test]
    fn pulse_counters_contiguous() {
        let mut state = state_with_pulse("pulse", 0.01);
        for i in 0..40 {
            state.devices[0].poll_tick(i as f64 * 0.01);
        }
        process_device_events(&mut state);

        let events = state.buffer.drain_sorted();
        let counts: Vec<u64> = events.iter().map(pulse_count).collect();
        assert_eq!(counts, (0..40).collect::<Vec<u64>>());
    }

    #[test]
    fn events_reach_device_egress_and_global_buffer() {
        let mut state = state_with_pulse("pulse", 0.01);
        state.devices[0].poll_tick(0.0);
        state.devices[0].poll_tick(0.01);
        process_device_events(&mut state);

        assert_eq!(state.buffer.len(), 2);
        let device_events = state.devices[0].drain_events(None);
        assert_eq!(device_events.len(), 2);
    }

    #[test]
    fn filters_run_before_fanout() {
        let mut state = state_with_pulse("pulse", 0.01);
        state.devices[0].add_filter(Box::new(Downsample::new(vec![EventKind::Pulse], 2)));

        for i in 0..6 {
            state.devices[0].poll_tick(i as f64 * 0.01);
        }
        process_device_events(&mut state);

        let counts: Vec<u64> = state
            .buffer
            .drain_sorted()
            .iter()
            .map(pulse_count)
            .collect();
        assert_eq!(counts, vec![0, 2, 4]);
    }

    #[test]
    fn channel_listeners_receive_events() {
        let mut state = state_with_pulse("pulse", 0.01);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        state.devices[0].add_listener(Listener::Channel(tx), vec![EventKind::Pulse]);

        state.devices[0].poll_tick(0.0);
        process_device_events(&mut state);

        let received = rx.try_recv().unwrap();
        assert_eq!(received.kind, EventKind::Pulse);
    }

    #[test]
    fn empty_tick_is_a_noop() {
        let mut state = state_with_pulse("pulse", 0.01);
        process_device_events(&mut state);
        assert!(state.buffer.is_empty());
    }
}
