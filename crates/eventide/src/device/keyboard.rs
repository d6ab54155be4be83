//! Keyboard device: callback-driven key press/release acquisition.
//!
//! The OS hook integration lives outside the hub; whatever hooks the
//! platform keyboard pushes raw samples through the device's
//! [`NativeEventSender`](super::NativeEventSender). This module owns the
//! state that spans samples: which keys are currently down (for
//! press-duration on release) and the last seen modifier state.

use std::collections::HashMap;

use serde_json::Value;
use tideconf::DeviceClass;
use tideproto::{EventData, Modifiers};

use super::{Device, DeviceError, NativeEvent};

pub struct Keyboard {
    /// Press time per key code, keyed until the matching release.
    down: HashMap<u32, f64>,
    modifiers: Modifiers,
}

impl Keyboard {
    pub fn new() -> Self {
        Self {
            down: HashMap::new(),
            modifiers: Modifiers::none(),
        }
    }
}

impl Default for Keyboard {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for Keyboard {
    fn class(&self) -> DeviceClass {
        DeviceClass::Keyboard
    }

    fn refine(&mut self, native: &mut NativeEvent) {
        if let EventData::Key {
            code,
            pressed,
            modifiers,
            duration,
            ..
        } = &mut native.data
        {
            self.modifiers = *modifiers;
            if *pressed {
                // Auto-repeat re-presses keep the original press time.
                self.down.entry(*code).or_insert(native.device_time);
            } else if let Some(pressed_at) = self.down.remove(code) {
                *duration = Some(native.device_time - pressed_at);
            }
        }
    }

    fn rpc_methods(&self) -> &'static [&'static str] {
        &["get_modifier_state"]
    }

    fn call(&mut self, method: &str, args: &[Value]) -> Result<Value, DeviceError> {
        let _ = args;
        match method {
            "get_modifier_state" => {
                serde_json::to_value(self.modifiers).map_err(|e| DeviceError::Runtime(e.to_string()))
            }
            _ => Err(DeviceError::UnknownMethod(method.to_string())),
        }
    }
}
