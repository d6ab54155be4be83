//! Mouse device: callback-driven motion, button, and scroll acquisition.

use serde_json::Value;
use tideconf::DeviceClass;
use tideproto::EventData;

use super::{Device, DeviceError, NativeEvent};

pub struct Mouse {
    position: (f64, f64),
}

impl Mouse {
    pub fn new() -> Self {
        Self { position: (0.0, 0.0) }
    }
}

impl Default for Mouse {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for Mouse {
    fn class(&self) -> DeviceClass {
        DeviceClass::Mouse
    }

    fn refine(&mut self, native: &mut NativeEvent) {
        match &native.data {
            EventData::MouseMove { x, y, .. }
            | EventData::MouseButton { x, y, .. }
            | EventData::MouseScroll { x, y, .. } => {
                self.position = (*x, *y);
            }
            _ => {}
        }
    }

    fn rpc_methods(&self) -> &'static [&'static str] {
        &["get_position", "set_position"]
    }

    fn call(&mut self, method: &str, args: &[Value]) -> Result<Value, DeviceError> {
        match method {
            "get_position" => Ok(Value::from(vec![self.position.0, self.position.1])),
            "set_position" => {
                let (x, y) = match (args.first(), args.get(1)) {
                    (Some(x), Some(y)) => match (x.as_f64(), y.as_f64()) {
                        (Some(x), Some(y)) => (x, y),
                        _ => {
                            return Err(DeviceError::bad_args(
                                method,
                                "coordinates must be numbers",
                            ))
                        }
                    },
                    _ => return Err(DeviceError::bad_args(method, "expected x and y")),
                };
                self.position = (x, y);
                Ok(Value::from(vec![x, y]))
            }
            _ => Err(DeviceError::UnknownMethod(method.to_string())),
        }
    }
}
