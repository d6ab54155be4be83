//! Configuration loading for the eventide event hub.
//!
//! The client process builds (or loads) a [`HubConfig`], serializes it to a
//! temp file, and hands the path to the spawned hub process, so both sides
//! work from the same document. The hub never discovers config on its own
//! beyond the file it was given plus `EVENTIDE_*` environment overrides.
//!
//! # Example Config
//!
//! ```toml
//! udp_port = 9034
//! global_event_buffer_length = 2048
//!
//! [datastore]
//! enable = true
//! filename = "events"
//!
//! [[devices]]
//! class = "keyboard"
//!
//! [[devices]]
//! class = "analog_input"
//! poll_interval = 0.002
//! save_events = true
//! [devices.settings]
//! channel_count = 8
//! ```
//!
//! Device `settings` are a free-form table validated by the device
//! constructor, so new device classes do not grow this crate.

pub mod loader;

pub use loader::apply_env_overrides;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid config: {field}: {message}")]
    Invalid { field: String, message: String },
}

impl ConfigError {
    fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Device classes the hub can construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    Keyboard,
    Mouse,
    AnalogInput,
    Pulse,
    Experiment,
}

impl DeviceClass {
    /// Whether the class acquires by polling (needs a monitor task) rather
    /// than by OS/SDK callback.
    pub fn is_polled(self) -> bool {
        matches!(self, DeviceClass::AnalogInput | DeviceClass::Pulse)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeviceClass::Keyboard => "keyboard",
            DeviceClass::Mouse => "mouse",
            DeviceClass::AnalogInput => "analog_input",
            DeviceClass::Pulse => "pulse",
            DeviceClass::Experiment => "experiment",
        }
    }

    pub fn from_str_name(name: &str) -> Option<Self> {
        match name {
            "keyboard" => Some(DeviceClass::Keyboard),
            "mouse" => Some(DeviceClass::Mouse),
            "analog_input" => Some(DeviceClass::AnalogInput),
            "pulse" => Some(DeviceClass::Pulse),
            "experiment" => Some(DeviceClass::Experiment),
            _ => None,
        }
    }
}

impl std::fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Complete hub configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// UDP port the hub binds on localhost.
    #[serde(default = "default_udp_port")]
    pub udp_port: u16,

    /// Capacity of the hub-side global event buffer.
    #[serde(default = "default_global_buffer")]
    pub global_event_buffer_length: usize,

    /// How long the client waits for the readiness sentinel before treating
    /// startup as failed.
    #[serde(default = "default_start_timeout")]
    pub start_timeout_secs: u64,

    /// Tracing filter override (else `EVENTIDE_LOG_LEVEL` / compiled default).
    #[serde(default)]
    pub log_level: Option<String>,

    #[serde(default)]
    pub datastore: StoreConfig,

    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            udp_port: default_udp_port(),
            global_event_buffer_length: default_global_buffer(),
            start_timeout_secs: default_start_timeout(),
            log_level: None,
            datastore: StoreConfig::default(),
            devices: Vec::new(),
        }
    }
}

/// Datastore sink settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub enable: bool,

    /// Base filename; the sink appends its own extension.
    #[serde(default = "default_store_filename")]
    pub filename: String,

    /// Directory for the store file, resolved against the hub's work dir
    /// when relative.
    #[serde(default = "default_store_parent")]
    pub parent_dir: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            enable: false,
            filename: default_store_filename(),
            parent_dir: default_store_parent(),
        }
    }
}

/// One monitored device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub class: DeviceClass,

    /// Unique device name; defaults to the class name.
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Poll period in seconds. Required for polled classes, ignored for
    /// callback-driven ones.
    #[serde(default)]
    pub poll_interval: Option<f64>,

    /// Capacity of the device's egress event buffer.
    #[serde(default = "default_device_buffer")]
    pub event_buffer_length: usize,

    /// Whether converted events are delivered to the global event buffer.
    #[serde(default = "default_true")]
    pub stream_events: bool,

    /// Whether converted events are forwarded to the datastore sink.
    #[serde(default)]
    pub save_events: bool,

    /// Restrict delivery to these event kinds (names per
    /// `tideproto::EventKind::name`). Empty/absent means all kinds the
    /// device produces.
    #[serde(default)]
    pub monitor_event_types: Vec<String>,

    /// Free-form per-class settings, validated by the device constructor.
    #[serde(default)]
    pub settings: toml::Table,
}

impl DeviceConfig {
    /// Minimal config for a class, everything defaulted.
    pub fn new(class: DeviceClass) -> Self {
        Self {
            class,
            name: None,
            enabled: true,
            poll_interval: None,
            event_buffer_length: default_device_buffer(),
            stream_events: true,
            save_events: false,
            monitor_event_types: Vec::new(),
            settings: toml::Table::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_poll_interval(mut self, secs: f64) -> Self {
        self.poll_interval = Some(secs);
        self
    }

    pub fn with_buffer_length(mut self, len: usize) -> Self {
        self.event_buffer_length = len;
        self
    }

    pub fn with_save_events(mut self, save: bool) -> Self {
        self.save_events = save;
        self
    }

    pub fn with_setting(mut self, key: &str, value: toml::Value) -> Self {
        self.settings.insert(key.to_string(), value);
        self
    }

    /// Effective device name.
    pub fn resolved_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.class.as_str().to_string())
    }
}

impl HubConfig {
    /// Load from an explicit file (if given) or `./eventide.toml` when
    /// present, then apply `EVENTIDE_*` env overrides and validate.
    pub fn load_from(config_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let mut config = match loader::resolve_config_file(config_path) {
            Some(path) => loader::load_from_file(&path)?,
            None => HubConfig::default(),
        };
        loader::apply_env_overrides(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Parse from a TOML string (no env overlay). Validates.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: HubConfig = toml::from_str(contents).map_err(|e| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to TOML for handoff to the hub process.
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    /// Structural validation beyond what serde typing enforces.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::HashSet::new();
        for dev in &self.devices {
            let name = dev.resolved_name();
            if !seen.insert(name.clone()) {
                return Err(ConfigError::invalid(
                    format!("devices.{name}"),
                    "duplicate device name",
                ));
            }

            if dev.class.is_polled() {
                match dev.poll_interval {
                    None => {
                        return Err(ConfigError::invalid(
                            format!("devices.{name}.poll_interval"),
                            format!("required for polled class {}", dev.class),
                        ));
                    }
                    Some(secs) if !(secs > 0.0) => {
                        return Err(ConfigError::invalid(
                            format!("devices.{name}.poll_interval"),
                            "must be a positive number of seconds",
                        ));
                    }
                    Some(_) => {}
                }
            }

            if dev.event_buffer_length == 0 {
                return Err(ConfigError::invalid(
                    format!("devices.{name}.event_buffer_length"),
                    "must be at least 1",
                ));
            }

            for kind in &dev.monitor_event_types {
                if !known_event_type(kind) {
                    return Err(ConfigError::invalid(
                        format!("devices.{name}.monitor_event_types"),
                        format!("unknown event type: {kind}"),
                    ));
                }
            }
        }

        if self.global_event_buffer_length == 0 {
            return Err(ConfigError::invalid(
                "global_event_buffer_length",
                "must be at least 1",
            ));
        }

        Ok(())
    }
}

// Kept in sync with the protocol crate's event kinds; this crate stays
// leaf-level, so the names are duplicated rather than imported.
fn known_event_type(name: &str) -> bool {
    const KNOWN: &[&str] = &[
        "key_press",
        "key_release",
        "mouse_move",
        "mouse_button_press",
        "mouse_button_release",
        "mouse_scroll",
        "analog_sample",
        "message",
        "pulse",
    ];
    KNOWN.contains(&name)
}

fn default_udp_port() -> u16 {
    9034
}

fn default_global_buffer() -> usize {
    2048
}

fn default_device_buffer() -> usize {
    256
}

fn default_start_timeout() -> u64 {
    30
}

fn default_store_filename() -> String {
    "events".to_string()
}

fn default_store_parent() -> String {
    ".".to_string()
}

fn default_true() -> bool {
    true
}
