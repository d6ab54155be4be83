//! Pulse device: a polled counter emitting exactly one event per tick.
//!
//! Useful as a heartbeat in demo configs and as a deterministic load for
//! timing checks: counters are contiguous, so any gap in a retrieved run
//! points at buffer overflow or a stalled monitor.

use serde_json::Value;
use tideconf::DeviceClass;
use tideproto::EventData;

use super::{Device, DeviceError, NativeEvent};

pub struct Pulse {
    next: u64,
}

impl Pulse {
    pub fn new(start: u64) -> Self {
        Self { next: start }
    }

    pub fn from_settings(settings: &toml::Table) -> Result<Self, DeviceError> {
        let start = match settings.get("start") {
            None => 0,
            Some(toml::Value::Integer(n)) if *n >= 0 => *n as u64,
            Some(other) => {
                return Err(DeviceError::Config(format!(
                    "start must be a non-negative integer, got {other}"
                )))
            }
        };
        Ok(Self::new(start))
    }
}

impl Device for Pulse {
    fn class(&self) -> DeviceClass {
        DeviceClass::Pulse
    }

    fn poll(&mut self, now: f64) -> Result<Vec<NativeEvent>, DeviceError> {
        let count = self.next;
        self.next += 1;
        Ok(vec![NativeEvent::new(
            now,
            now,
            EventData::Pulse { count },
        )])
    }

    fn rpc_methods(&self) -> &'static [&'static str] {
        &["get_count"]
    }

    fn call(&mut self, method: &str, _args: &[Value]) -> Result<Value, DeviceError> {
        match method {
            "get_count" => Ok(Value::from(self.next)),
            _ => Err(DeviceError::UnknownMethod(method.to_string())),
        }
    }
}
