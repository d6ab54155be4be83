//! Analog input device: polled multi-channel voltage acquisition.
//!
//! Hardware access goes through the [`SampleSource`] seam so the device
//! logic (polling, channel layout, settings validation) is independent of
//! any vendor interface. The shipped sources generate deterministic
//! waveforms, which is what the demo configs and tests run against.

use serde_json::Value;
use tideconf::DeviceClass;
use tideproto::EventData;

use super::{Device, DeviceError, NativeEvent};

/// Where an [`AnalogInput`] reads voltages from.
pub trait SampleSource: Send + Sync {
    /// One voltage per channel at the given time.
    fn sample(&mut self, now: f64, channels: usize) -> Vec<f64>;
}

/// Per-channel sine waves, phase-offset per channel.
pub struct SineSource {
    pub frequency_hz: f64,
    pub amplitude: f64,
}

impl SampleSource for SineSource {
    fn sample(&mut self, now: f64, channels: usize) -> Vec<f64> {
        (0..channels)
            .map(|ch| {
                let phase = ch as f64 * std::f64::consts::FRAC_PI_4;
                self.amplitude * (std::f64::consts::TAU * self.frequency_hz * now + phase).sin()
            })
            .collect()
    }
}

/// A constant level on every channel.
pub struct ConstantSource {
    pub level: f64,
}

impl SampleSource for ConstantSource {
    fn sample(&mut self, _now: f64, channels: usize) -> Vec<f64> {
        vec![self.level; channels]
    }
}

pub struct AnalogInput {
    channels: usize,
    source: Box<dyn SampleSource>,
}

impl std::fmt::Debug for AnalogInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalogInput")
            .field("channels", &self.channels)
            .finish_non_exhaustive()
    }
}

impl AnalogInput {
    pub fn new(channels: usize, source: Box<dyn SampleSource>) -> Self {
        Self { channels, source }
    }

    /// Build from the config `settings` table.
    ///
    /// Recognized keys: `channel_count` (int, default 8), `source`
    /// ("sine" or "constant", default "sine"), `frequency` (Hz, sine),
    /// `amplitude` (sine), `level` (constant).
    pub fn from_settings(settings: &toml::Table) -> Result<Self, DeviceError> {
        let channels = match settings.get("channel_count") {
            None => 8,
            Some(toml::Value::Integer(n)) if *n > 0 => *n as usize,
            Some(other) => {
                return Err(DeviceError::Config(format!(
                    "channel_count must be a positive integer, got {other}"
                )))
            }
        };

        let source_name = match settings.get("source") {
            None => "sine",
            Some(toml::Value::String(s)) => s.as_str(),
            Some(other) => {
                return Err(DeviceError::Config(format!(
                    "source must be a string, got {other}"
                )))
            }
        };

        let source: Box<dyn SampleSource> = match source_name {
            "sine" => Box::new(SineSource {
                frequency_hz: float_setting(settings, "frequency", 10.0)?,
                amplitude: float_setting(settings, "amplitude", 1.0)?,
            }),
            "constant" => Box::new(ConstantSource {
                level: float_setting(settings, "level", 0.0)?,
            }),
            other => {
                return Err(DeviceError::Config(format!(
                    "unknown sample source: {other}"
                )))
            }
        };

        Ok(Self::new(channels, source))
    }
}

fn float_setting(settings: &toml::Table, key: &str, default: f64) -> Result<f64, DeviceError> {
    match settings.get(key) {
        None => Ok(default),
        Some(toml::Value::Float(f)) => Ok(*f),
        Some(toml::Value::Integer(n)) => Ok(*n as f64),
        Some(other) => Err(DeviceError::Config(format!(
            "{key} must be a number, got {other}"
        ))),
    }
}

impl Device for AnalogInput {
    fn class(&self) -> DeviceClass {
        DeviceClass::AnalogInput
    }

    fn poll(&mut self, now: f64) -> Result<Vec<NativeEvent>, DeviceError> {
        let voltages = self.source.sample(now, self.channels);
        Ok(vec![NativeEvent::new(
            now,
            now,
            EventData::Analog { voltages },
        )])
    }

    fn rpc_methods(&self) -> &'static [&'static str] {
        &["get_channel_count"]
    }

    fn call(&mut self, method: &str, _args: &[Value]) -> Result<Value, DeviceError> {
        match method {
            "get_channel_count" => Ok(Value::from(self.channels)),
            _ => Err(DeviceError::UnknownMethod(method.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_emits_one_sample_per_tick() {
        let mut dev = AnalogInput::new(4, Box::new(ConstantSource { level: 2.5 }));
        let events = dev.poll(1.0).unwrap();
        assert_eq!(events.len(), 1);
        match &events[0].data {
            EventData::Analog { voltages } => assert_eq!(voltages, &vec![2.5; 4]),
            _ => unreachable!(),
        }
    }

    #[test]
    fn settings_defaults() {
        let dev = AnalogInput::from_settings(&toml::Table::new()).unwrap();
        assert_eq!(dev.channels, 8);
    }

    #[test]
    fn settings_rejects_bad_channel_count() {
        let mut settings = toml::Table::new();
        settings.insert("channel_count".into(), toml::Value::String("many".into()));
        let err = AnalogInput::from_settings(&settings).unwrap_err();
        assert!(matches!(err, DeviceError::Config(_)));
    }

    #[test]
    fn settings_rejects_unknown_source() {
        let mut settings = toml::Table::new();
        settings.insert("source".into(), toml::Value::String("entropy".into()));
        assert!(AnalogInput::from_settings(&settings).is_err());
    }

    #[test]
    fn sine_source_is_deterministic() {
        let mut a = SineSource {
            frequency_hz: 10.0,
            amplitude: 1.0,
        };
        let mut b = SineSource {
            frequency_hz: 10.0,
            amplitude: 1.0,
        };
        assert_eq!(a.sample(0.123, 3), b.sample(0.123, 3));
    }
}
