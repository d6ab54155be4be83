//! Device layer: acquisition, buffering, and per-device dispatch.
//!
//! A [`Device`] implementation knows how to produce raw samples (by polling
//! or by having an external callback context push into its ingress ring)
//! and exposes a closed RPC method table. The hub wraps each one in a
//! [`MonitoredDevice`], which owns the buffers, the listener registrations,
//! the reporting gate, and the poll-gap bookkeeping that timestamping
//! depends on.
//!
//! ## The callback boundary
//!
//! Everything in the hub runs on one cooperative thread except OS hook /
//! vendor SDK callbacks, which fire on threads the hub does not control.
//! Those contexts get a [`NativeEventSender`]: a cloneable handle over a
//! lock-free bounded ring (`crossbeam_queue::ArrayQueue`) plus the
//! reporting gate. A callback only ever enqueues; the pipeline drains on
//! the hub thread. When the ring is full the oldest sample is displaced.

mod analog;
mod experiment;
mod keyboard;
mod mouse;
mod pulse;

pub use analog::{AnalogInput, ConstantSource, SampleSource, SineSource};
pub use experiment::Experiment;
pub use keyboard::Keyboard;
pub use mouse::Mouse;
pub use pulse::Pulse;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_queue::ArrayQueue;
use serde_json::Value;
use tideconf::{DeviceClass, DeviceConfig};
use tideproto::{ErrorKind, Event, EventData, EventKind};
use tracing::warn;

use crate::filter::EventFilter;

/// Capacity of every device's native-event ingress ring.
const INGRESS_CAPACITY: usize = 1024;

/// A raw sample as produced by poll or callback, before conversion.
#[derive(Debug, Clone)]
pub struct NativeEvent {
    /// Device/hardware clock reading; receipt time when the device has no
    /// clock of its own.
    pub device_time: f64,
    /// Hub clock at the moment the sample entered the ingress ring.
    pub received_time: f64,
    /// Final hub time to use instead of the computed `logged - delay`
    /// (experiment messages carry caller-supplied timestamps).
    pub time_override: Option<f64>,
    pub data: EventData,
}

impl NativeEvent {
    pub fn new(device_time: f64, received_time: f64, data: EventData) -> Self {
        Self {
            device_time,
            received_time,
            time_override: None,
            data,
        }
    }
}

/// Handle given to OS hook / SDK callback contexts.
///
/// Safe to call from any thread at any time relative to the hub loop; only
/// enqueues. Samples are dropped (not queued) while reporting is disabled.
#[derive(Clone)]
pub struct NativeEventSender {
    queue: Arc<ArrayQueue<NativeEvent>>,
    reporting: Arc<AtomicBool>,
}

impl NativeEventSender {
    /// Enqueue a sample, displacing the oldest if the ring is full.
    pub fn send(&self, event: NativeEvent) {
        if self.reporting.load(Ordering::Relaxed) {
            let _ = self.queue.force_push(event);
        }
    }

    pub fn is_reporting(&self) -> bool {
        self.reporting.load(Ordering::Relaxed)
    }
}

/// Device-level failures.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("device configuration: {0}")]
    Config(String),
    #[error("no device method named {0}")]
    UnknownMethod(String),
    #[error("bad arguments for {method}: {message}")]
    BadArgs { method: String, message: String },
    #[error("{0}")]
    Runtime(String),
}

impl DeviceError {
    pub fn bad_args(method: &str, message: impl Into<String>) -> Self {
        DeviceError::BadArgs {
            method: method.to_string(),
            message: message.into(),
        }
    }

    /// Wire error category for this failure.
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            DeviceError::UnknownMethod(_) => ErrorKind::Attribute,
            DeviceError::BadArgs { .. } => ErrorKind::NotCallable,
            DeviceError::Config(_) | DeviceError::Runtime(_) => ErrorKind::Runtime,
        }
    }
}

/// One input/output peripheral.
///
/// `poll` must be bounded-time: it runs inside a cooperative scheduler tick
/// and a stall starves every other task in the hub.
pub trait Device: Send + Sync {
    fn class(&self) -> DeviceClass;

    /// Read the current raw state, returning zero or more samples. Only
    /// called for polled classes.
    fn poll(&mut self, now: f64) -> Result<Vec<NativeEvent>, DeviceError> {
        let _ = now;
        Ok(Vec::new())
    }

    /// Adjust a drained sample before conversion (press-duration and
    /// position tracking live here). Default: identity.
    fn refine(&mut self, native: &mut NativeEvent) {
        let _ = native;
    }

    /// Methods this device accepts beyond the common buffer methods.
    fn rpc_methods(&self) -> &'static [&'static str] {
        &[]
    }

    /// Invoke a method from [`Device::rpc_methods`].
    fn call(&mut self, method: &str, args: &[Value]) -> Result<Value, DeviceError> {
        let _ = args;
        Err(DeviceError::UnknownMethod(method.to_string()))
    }

    /// Release any hardware/OS resources. Called once at hub shutdown.
    fn close(&mut self) {}
}

/// Buffer-level methods every device answers, independent of class.
pub const COMMON_RPC_METHODS: &[&str] = &[
    "get_events",
    "clear_events",
    "enable_event_reporting",
    "is_reporting_events",
];

/// Fan-out target for converted events.
#[derive(Debug, Clone)]
pub enum Listener {
    /// The device's own egress buffer.
    DeviceBuffer,
    /// The hub global event buffer.
    GlobalBuffer,
    /// The datastore sink.
    Datastore,
    /// An in-process subscriber.
    Channel(tokio::sync::mpsc::UnboundedSender<Event>),
}

/// Registration handle returned by [`MonitoredDevice::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u32);

#[derive(Debug)]
struct Registration {
    id: ListenerId,
    listener: Listener,
    kinds: Vec<EventKind>,
}

/// Event kinds a device class can produce.
pub fn produced_kinds(class: DeviceClass) -> &'static [EventKind] {
    match class {
        DeviceClass::Keyboard => &[EventKind::KeyPress, EventKind::KeyRelease],
        DeviceClass::Mouse => &[
            EventKind::MouseMove,
            EventKind::MouseButtonPress,
            EventKind::MouseButtonRelease,
            EventKind::MouseScroll,
        ],
        DeviceClass::AnalogInput => &[EventKind::AnalogSample],
        DeviceClass::Pulse => &[EventKind::Pulse],
        DeviceClass::Experiment => &[EventKind::Message],
    }
}

/// Construct the concrete device for a config entry.
pub fn build_device(config: &DeviceConfig) -> Result<Box<dyn Device>, DeviceError> {
    match config.class {
        DeviceClass::Keyboard => Ok(Box::new(Keyboard::new())),
        DeviceClass::Mouse => Ok(Box::new(Mouse::new())),
        DeviceClass::AnalogInput => Ok(Box::new(AnalogInput::from_settings(&config.settings)?)),
        DeviceClass::Pulse => Ok(Box::new(Pulse::from_settings(&config.settings)?)),
        DeviceClass::Experiment => Ok(Box::new(Experiment::new())),
    }
}

/// A device under hub management: the device itself plus its buffers,
/// listeners, filters, and timing bookkeeping.
pub struct MonitoredDevice {
    name: String,
    class: DeviceClass,
    device: Box<dyn Device>,
    ingress: Arc<ArrayQueue<NativeEvent>>,
    reporting: Arc<AtomicBool>,
    egress: VecDeque<Event>,
    egress_capacity: usize,
    registrations: Vec<Registration>,
    next_listener_id: u32,
    filters: Vec<Box<dyn EventFilter>>,
    poll_interval: Option<Duration>,
    last_poll_time: Option<f64>,
    poll_gap: f64,
}

impl MonitoredDevice {
    /// Build a monitored device from config: constructs the inner device
    /// and registers the standard listeners (device buffer always; global
    /// buffer when streaming; datastore when saving), restricted to
    /// `monitor_event_types` when set.
    pub fn from_config(config: &DeviceConfig) -> Result<Self, DeviceError> {
        let device = build_device(config)?;

        let kinds: Vec<EventKind> = if config.monitor_event_types.is_empty() {
            produced_kinds(config.class).to_vec()
        } else {
            config
                .monitor_event_types
                .iter()
                .filter_map(|name| EventKind::from_name(name))
                .collect()
        };

        let poll_interval = if config.class.is_polled() {
            config.poll_interval.map(Duration::from_secs_f64)
        } else {
            None
        };

        let mut monitored = Self {
            name: config.resolved_name(),
            class: config.class,
            device,
            ingress: Arc::new(ArrayQueue::new(INGRESS_CAPACITY)),
            reporting: Arc::new(AtomicBool::new(true)),
            egress: VecDeque::with_capacity(config.event_buffer_length),
            egress_capacity: config.event_buffer_length,
            registrations: Vec::new(),
            next_listener_id: 0,
            filters: Vec::new(),
            poll_interval,
            last_poll_time: None,
            poll_gap: 0.0,
        };

        monitored.add_listener(Listener::DeviceBuffer, kinds.clone());
        if config.stream_events {
            monitored.add_listener(Listener::GlobalBuffer, kinds.clone());
        }
        if config.save_events {
            monitored.add_listener(Listener::Datastore, kinds);
        }

        Ok(monitored)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn class(&self) -> DeviceClass {
        self.class
    }

    /// Poll period; None for callback-driven and virtual devices.
    pub fn poll_interval(&self) -> Option<Duration> {
        self.poll_interval
    }

    /// Handle for external callback contexts to enqueue samples.
    pub fn sender(&self) -> NativeEventSender {
        NativeEventSender {
            queue: Arc::clone(&self.ingress),
            reporting: Arc::clone(&self.reporting),
        }
    }

    pub fn is_reporting(&self) -> bool {
        self.reporting.load(Ordering::Relaxed)
    }

    /// Toggle event reporting. Pending events are cleared on any toggle so
    /// a re-enable starts from a clean buffer.
    pub fn enable_event_reporting(&mut self, enabled: bool) -> bool {
        self.clear_events();
        self.reporting.store(enabled, Ordering::Relaxed);
        enabled
    }

    /// One monitor tick: poll the inner device and enqueue its samples.
    /// Poll errors are logged and ticking continues; the poll-gap
    /// bookkeeping advances regardless so confidence intervals stay
    /// truthful.
    pub fn poll_tick(&mut self, now: f64) {
        self.poll_gap = now - self.last_poll_time.unwrap_or(now);
        self.last_poll_time = Some(now);

        match self.device.poll(now) {
            Ok(events) => {
                if self.is_reporting() {
                    for event in events {
                        let _ = self.ingress.force_push(event);
                    }
                }
            }
            Err(e) => {
                warn!(device = %self.name, error = %e, "device poll failed");
            }
        }
    }

    /// Drain one sample off the ingress ring.
    pub fn next_native(&mut self) -> Option<NativeEvent> {
        let mut native = self.ingress.pop()?;
        self.device.refine(&mut native);
        Some(native)
    }

    /// Convert a drained sample into a canonical event.
    pub fn convert(&self, native: NativeEvent, event_id: u64) -> Event {
        let (confidence_interval, delay) = if self.class.is_polled() {
            // Arrival assumed uniform over the poll gap.
            (self.poll_gap, self.poll_gap / 2.0)
        } else {
            (0.0, 0.0)
        };

        let logged_time = native.received_time;
        let time = native.time_override.unwrap_or(logged_time - delay);

        Event {
            event_id,
            device: self.name.clone(),
            kind: native.data.kind(),
            device_time: native.device_time,
            logged_time,
            time,
            confidence_interval,
            delay,
            data: native.data,
        }
    }

    /// Run an event through the filter chain in registration order.
    pub fn apply_filters(&mut self, event: Event) -> Vec<Event> {
        let mut current = vec![event];
        for filter in &mut self.filters {
            let mut next = Vec::with_capacity(current.len());
            for ev in current {
                next.extend(filter.apply(ev));
            }
            current = next;
        }
        current
    }

    pub fn add_filter(&mut self, filter: Box<dyn EventFilter>) {
        self.filters.push(filter);
    }

    pub fn add_listener(&mut self, listener: Listener, kinds: Vec<EventKind>) -> ListenerId {
        let id = ListenerId(self.next_listener_id);
        self.next_listener_id += 1;
        self.registrations.push(Registration {
            id,
            listener,
            kinds,
        });
        id
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        let before = self.registrations.len();
        self.registrations.retain(|r| r.id != id);
        self.registrations.len() != before
    }

    /// Listeners registered for an event kind (cloned so the caller can
    /// act on them while mutating buffers).
    pub fn listeners_for(&self, kind: EventKind) -> Vec<Listener> {
        self.registrations
            .iter()
            .filter(|r| r.kinds.contains(&kind))
            .map(|r| r.listener.clone())
            .collect()
    }

    /// Append to the egress buffer, evicting the oldest at capacity.
    pub fn push_egress(&mut self, event: Event) {
        if self.egress.len() >= self.egress_capacity {
            self.egress.pop_front();
        }
        self.egress.push_back(event);
    }

    /// Drain the egress buffer, optionally restricted to one kind (only
    /// matching events are removed). Returned events are in ascending
    /// hub-time order.
    pub fn drain_events(&mut self, kind: Option<EventKind>) -> Vec<Event> {
        let mut drained: Vec<Event> = match kind {
            None => self.egress.drain(..).collect(),
            Some(kind) => {
                let (matching, rest): (Vec<Event>, Vec<Event>) =
                    self.egress.drain(..).partition(|e| e.kind == kind);
                self.egress = rest.into();
                matching
            }
        };
        drained.sort_by(|a, b| a.time.total_cmp(&b.time));
        drained
    }

    /// Discard everything queued and buffered for this device.
    pub fn clear_events(&mut self) -> usize {
        let mut n = self.egress.len();
        self.egress.clear();
        while self.ingress.pop().is_some() {
            n += 1;
        }
        n
    }

    /// Full RPC surface: common buffer methods plus the device's own.
    pub fn rpc_interface(&self) -> Vec<String> {
        COMMON_RPC_METHODS
            .iter()
            .chain(self.device.rpc_methods())
            .map(|s| s.to_string())
            .collect()
    }

    /// Invoke a method by name against the closed table.
    pub fn call_method(&mut self, method: &str, args: &[Value]) -> Result<Value, DeviceError> {
        match method {
            "get_events" => {
                let kind = match args.first() {
                    None | Some(Value::Null) => None,
                    Some(Value::String(name)) => Some(EventKind::from_name(name).ok_or_else(
                        || DeviceError::bad_args(method, format!("unknown event type: {name}")),
                    )?),
                    Some(other) => {
                        return Err(DeviceError::bad_args(
                            method,
                            format!("expected event type name, got {other}"),
                        ))
                    }
                };
                let events = self.drain_events(kind);
                serde_json::to_value(events).map_err(|e| DeviceError::Runtime(e.to_string()))
            }
            "clear_events" => Ok(Value::from(self.clear_events())),
            "enable_event_reporting" => {
                let enabled = match args.first() {
                    None => true,
                    Some(Value::Bool(b)) => *b,
                    Some(other) => {
                        return Err(DeviceError::bad_args(
                            method,
                            format!("expected bool, got {other}"),
                        ))
                    }
                };
                Ok(Value::from(self.enable_event_reporting(enabled)))
            }
            "is_reporting_events" => Ok(Value::from(self.is_reporting())),
            _ if self.device.rpc_methods().contains(&method) => self.device.call(method, args),
            _ => Err(DeviceError::UnknownMethod(method.to_string())),
        }
    }

    pub fn close(&mut self) {
        self.clear_events();
        self.device.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tideproto::Modifiers;

    fn key_data(code: u32, pressed: bool) -> EventData {
        EventData::Key {
            code,
            chr: None,
            modifiers: Modifiers::none(),
            pressed,
            duration: None,
        }
    }

    fn keyboard() -> MonitoredDevice {
        MonitoredDevice::from_config(&DeviceConfig::new(DeviceClass::Keyboard)).unwrap()
    }

    #[test]
    fn sender_respects_reporting_gate() {
        let mut dev = keyboard();
        let sender = dev.sender();

        dev.enable_event_reporting(false);
        sender.send(NativeEvent::new(1.0, 1.0, key_data(30, true)));
        assert!(dev.next_native().is_none());

        dev.enable_event_reporting(true);
        sender.send(NativeEvent::new(2.0, 2.0, key_data(30, true)));
        assert!(dev.next_native().is_some());
    }

    #[test]
    fn egress_evicts_oldest() {
        let mut dev = MonitoredDevice::from_config(
            &DeviceConfig::new(DeviceClass::Pulse)
                .with_poll_interval(0.01)
                .with_buffer_length(10),
        )
        .unwrap();

        for i in 0..15u64 {
            dev.push_egress(Event {
                event_id: i,
                device: "pulse".into(),
                kind: EventKind::Pulse,
                device_time: i as f64,
                logged_time: i as f64,
                time: i as f64,
                confidence_interval: 0.0,
                delay: 0.0,
                data: EventData::Pulse { count: i },
            });
        }

        let events = dev.drain_events(None);
        assert_eq!(events.len(), 10);
        let counts: Vec<u64> = events
            .iter()
            .map(|e| match e.data {
                EventData::Pulse { count } => count,
                _ => unreachable!(),
            })
            .collect();
        // Oldest five evicted: the 6th through 15th produced remain.
        assert_eq!(counts, (5..15).collect::<Vec<u64>>());
    }

    #[test]
    fn drain_with_kind_filter_leaves_rest() {
        let mut dev = keyboard();
        for (i, pressed) in [(0u64, true), (1, false), (2, true)] {
            let data = key_data(30, pressed);
            dev.push_egress(Event {
                event_id: i,
                device: "keyboard".into(),
                kind: data.kind(),
                device_time: i as f64,
                logged_time: i as f64,
                time: i as f64,
                confidence_interval: 0.0,
                delay: 0.0,
                data,
            });
        }

        let presses = dev.drain_events(Some(EventKind::KeyPress));
        assert_eq!(presses.len(), 2);
        let rest = dev.drain_events(None);
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].kind, EventKind::KeyRelease);
    }

    #[test]
    fn poll_gap_feeds_confidence_interval() {
        let mut dev = MonitoredDevice::from_config(
            &DeviceConfig::new(DeviceClass::Pulse).with_poll_interval(0.01),
        )
        .unwrap();

        dev.poll_tick(10.0);
        // First tick has no prior poll: gap is zero.
        let native = dev.next_native().unwrap();
        let ev = dev.convert(native, 1);
        assert_eq!(ev.confidence_interval, 0.0);

        dev.poll_tick(10.02);
        let native = dev.next_native().unwrap();
        let ev = dev.convert(native, 2);
        assert!((ev.confidence_interval - 0.02).abs() < 1e-9);
        assert!((ev.delay - 0.01).abs() < 1e-9);
        assert!((ev.time - (ev.logged_time - ev.delay)).abs() < 1e-12);
    }

    #[test]
    fn callback_device_has_zero_interval() {
        let mut dev = keyboard();
        dev.sender()
            .send(NativeEvent::new(5.0, 5.001, key_data(57, true)));
        let native = dev.next_native().unwrap();
        let ev = dev.convert(native, 1);
        assert_eq!(ev.confidence_interval, 0.0);
        assert_eq!(ev.delay, 0.0);
        assert_eq!(ev.time, ev.logged_time);
    }

    #[test]
    fn unknown_method_is_attribute_error() {
        let mut dev = keyboard();
        let err = dev.call_method("warp_speed", &[]).unwrap_err();
        assert_eq!(err.error_kind(), ErrorKind::Attribute);
    }

    #[test]
    fn bad_args_is_not_callable() {
        let mut dev = keyboard();
        let err = dev
            .call_method("enable_event_reporting", &[Value::from("yes")])
            .unwrap_err();
        assert_eq!(err.error_kind(), ErrorKind::NotCallable);
    }

    #[test]
    fn rpc_interface_includes_common_and_device_methods() {
        let dev = keyboard();
        let methods = dev.rpc_interface();
        assert!(methods.contains(&"get_events".to_string()));
        assert!(methods.contains(&"get_modifier_state".to_string()));
    }

    #[test]
    fn listener_registration_and_removal() {
        let mut dev = keyboard();
        let baseline = dev.listeners_for(EventKind::KeyPress).len();

        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let id = dev.add_listener(Listener::Channel(tx), vec![EventKind::KeyPress]);
        assert_eq!(dev.listeners_for(EventKind::KeyPress).len(), baseline + 1);
        assert_eq!(dev.listeners_for(EventKind::KeyRelease).len(), baseline);

        assert!(dev.remove_listener(id));
        assert!(!dev.remove_listener(id));
        assert_eq!(dev.listeners_for(EventKind::KeyPress).len(), baseline);
    }
}
