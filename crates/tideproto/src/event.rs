//! Event records shared by the hub and client processes.
//!
//! Every observation a device makes is converted into an [`Event`]: a typed
//! header (ids and four timestamps) plus a tagged payload. The numeric
//! [`EventKind`] tag is stable and is what listener registration and the
//! datastore dispatch on; the payload itself carries named fields rather
//! than positional slots.
//!
//! ## Timestamps
//!
//! All times are f64 seconds on the hub's monotonic timeline (which the hub
//! inherits from the client at spawn, see [`crate::clock`]):
//!
//! - `device_time`: the device/hardware clock reading, when the device has
//!   one; otherwise equal to the receipt time.
//! - `logged_time`: hub clock when the hub became aware of the sample.
//! - `time`: `logged_time - delay`, the best estimate of when the input
//!   actually occurred.
//! - `confidence_interval`: elapsed time since the device's previous poll; a
//!   bound on how stale `time` may be. `0.0` for callback-driven devices.
//! - `delay`: estimated capture-to-log latency. Polled devices assume
//!   arrival uniformly distributed over the poll gap, so delay is half the
//!   confidence interval.

use serde::{Deserialize, Serialize};

/// Stable numeric tag for each event type (wire + dispatch).
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    KeyPress = 0x0010,
    KeyRelease = 0x0011,
    MouseMove = 0x0020,
    MouseButtonPress = 0x0021,
    MouseButtonRelease = 0x0022,
    MouseScroll = 0x0023,
    AnalogSample = 0x0030,
    Message = 0x0040,
    Pulse = 0x0050,
}

impl EventKind {
    /// Parse a u16 tag into an EventKind.
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0010 => Some(EventKind::KeyPress),
            0x0011 => Some(EventKind::KeyRelease),
            0x0020 => Some(EventKind::MouseMove),
            0x0021 => Some(EventKind::MouseButtonPress),
            0x0022 => Some(EventKind::MouseButtonRelease),
            0x0023 => Some(EventKind::MouseScroll),
            0x0030 => Some(EventKind::AnalogSample),
            0x0040 => Some(EventKind::Message),
            0x0050 => Some(EventKind::Pulse),
            _ => None,
        }
    }

    /// Convert the EventKind to its wire tag.
    pub fn to_u16(self) -> u16 {
        self as u16
    }

    /// Lower-snake name used in config files and logs.
    pub fn name(self) -> &'static str {
        match self {
            EventKind::KeyPress => "key_press",
            EventKind::KeyRelease => "key_release",
            EventKind::MouseMove => "mouse_move",
            EventKind::MouseButtonPress => "mouse_button_press",
            EventKind::MouseButtonRelease => "mouse_button_release",
            EventKind::MouseScroll => "mouse_scroll",
            EventKind::AnalogSample => "analog_sample",
            EventKind::Message => "message",
            EventKind::Pulse => "pulse",
        }
    }

    /// Parse a config-file name back into a kind.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "key_press" => Some(EventKind::KeyPress),
            "key_release" => Some(EventKind::KeyRelease),
            "mouse_move" => Some(EventKind::MouseMove),
            "mouse_button_press" => Some(EventKind::MouseButtonPress),
            "mouse_button_release" => Some(EventKind::MouseButtonRelease),
            "mouse_scroll" => Some(EventKind::MouseScroll),
            "analog_sample" => Some(EventKind::AnalogSample),
            "message" => Some(EventKind::Message),
            "pulse" => Some(EventKind::Pulse),
            _ => None,
        }
    }
}

/// Keyboard modifier state at the moment of an event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modifiers {
    #[serde(default)]
    pub shift: bool,
    #[serde(default)]
    pub ctrl: bool,
    #[serde(default)]
    pub alt: bool,
    #[serde(default)]
    pub meta: bool,
}

impl Modifiers {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn any(&self) -> bool {
        self.shift || self.ctrl || self.alt || self.meta
    }
}

/// Mouse button identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    Left,
    Middle,
    Right,
}

/// Typed event payload. The variant must agree with the header's
/// [`EventKind`]; [`EventData::kind`] gives the canonical mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventData {
    Key {
        /// OS-level key code.
        code: u32,
        /// Printable character, if the key produces one.
        chr: Option<char>,
        modifiers: Modifiers,
        pressed: bool,
        /// Key-down duration in seconds, filled in on release events when
        /// the matching press was observed.
        duration: Option<f64>,
    },
    MouseMove {
        x: f64,
        y: f64,
        modifiers: Modifiers,
    },
    MouseButton {
        x: f64,
        y: f64,
        button: MouseButton,
        pressed: bool,
        modifiers: Modifiers,
    },
    MouseScroll {
        x: f64,
        y: f64,
        scroll_x: f64,
        scroll_y: f64,
        modifiers: Modifiers,
    },
    Analog {
        /// One voltage per configured channel, channel 0 first.
        voltages: Vec<f64>,
    },
    Message {
        text: String,
        category: String,
    },
    Pulse {
        count: u64,
    },
}

impl EventData {
    /// The event kind this payload maps to.
    pub fn kind(&self) -> EventKind {
        match self {
            EventData::Key { pressed: true, .. } => EventKind::KeyPress,
            EventData::Key { pressed: false, .. } => EventKind::KeyRelease,
            EventData::MouseMove { .. } => EventKind::MouseMove,
            EventData::MouseButton { pressed: true, .. } => EventKind::MouseButtonPress,
            EventData::MouseButton { pressed: false, .. } => EventKind::MouseButtonRelease,
            EventData::MouseScroll { .. } => EventKind::MouseScroll,
            EventData::Analog { .. } => EventKind::AnalogSample,
            EventData::Message { .. } => EventKind::Message,
            EventData::Pulse { .. } => EventKind::Pulse,
        }
    }
}

/// A fully converted, timestamped event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Hub-wide monotonically increasing id.
    pub event_id: u64,
    /// Name of the device that produced the event.
    pub device: String,
    /// Stable type tag (always equals `data.kind()`).
    pub kind: EventKind,
    pub device_time: f64,
    pub logged_time: f64,
    /// Hub time: `logged_time - delay`.
    pub time: f64,
    pub confidence_interval: f64,
    pub delay: f64,
    pub data: EventData,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tag_roundtrip() {
        for kind in [
            EventKind::KeyPress,
            EventKind::KeyRelease,
            EventKind::MouseMove,
            EventKind::MouseButtonPress,
            EventKind::MouseButtonRelease,
            EventKind::MouseScroll,
            EventKind::AnalogSample,
            EventKind::Message,
            EventKind::Pulse,
        ] {
            assert_eq!(EventKind::from_u16(kind.to_u16()), Some(kind));
            assert_eq!(EventKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(EventKind::from_u16(0xFFFF), None);
        assert_eq!(EventKind::from_name("beat_tick"), None);
    }

    #[test]
    fn payload_kind_agreement() {
        let press = EventData::Key {
            code: 30,
            chr: Some('a'),
            modifiers: Modifiers::none(),
            pressed: true,
            duration: None,
        };
        assert_eq!(press.kind(), EventKind::KeyPress);

        let release = EventData::Key {
            code: 30,
            chr: Some('a'),
            modifiers: Modifiers::none(),
            pressed: false,
            duration: Some(0.125),
        };
        assert_eq!(release.kind(), EventKind::KeyRelease);

        let scroll = EventData::MouseScroll {
            x: 10.0,
            y: 20.0,
            scroll_x: 0.0,
            scroll_y: -3.0,
            modifiers: Modifiers::none(),
        };
        assert_eq!(scroll.kind(), EventKind::MouseScroll);
    }

    #[test]
    fn modifiers_any() {
        assert!(!Modifiers::none().any());
        let m = Modifiers {
            ctrl: true,
            ..Modifiers::none()
        };
        assert!(m.any());
    }
}
