//! All hub process state in one explicitly-passed struct.
//!
//! There are deliberately no process-global registries: everything the
//! pipeline, dispatcher, and monitors touch hangs off [`HubState`], so two
//! hubs in one test process stay fully isolated.

use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use tideconf::{DeviceConfig, HubConfig};
use tideproto::{DeviceEntry, MonotonicClock};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::buffer::GlobalEventBuffer;
use crate::datastore::{EventSink, JsonlStore};
use crate::device::{DeviceError, MonitoredDevice};

/// Hub process lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubStatus {
    Starting,
    Ready,
    Running,
    ShuttingDown,
}

impl HubStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            HubStatus::Starting => "STARTING",
            HubStatus::Ready => "READY",
            HubStatus::Running => "RUNNING",
            HubStatus::ShuttingDown => "SHUTTING_DOWN",
        }
    }
}

/// Everything the hub process owns.
pub struct HubState {
    pub clock: MonotonicClock,
    pub devices: Vec<MonitoredDevice>,
    /// Devices that failed construction: (name, class). Reported as not
    /// connected rather than aborting startup.
    pub disabled: Vec<(String, String)>,
    pub buffer: GlobalEventBuffer,
    pub store: Option<Box<dyn EventSink>>,
    pub status: HubStatus,
    pub experiment_info: Option<Value>,
    pub session_info: Option<Value>,
    pub(crate) next_session_id: u64,
    pub(crate) next_event_id: u64,
}

/// Shared handle across the serve loop, pipeline tick, and monitors.
pub type SharedState = Arc<RwLock<HubState>>;

pub fn shared(state: HubState) -> SharedState {
    Arc::new(RwLock::new(state))
}

impl HubState {
    /// An empty hub: no devices, no store.
    pub fn new(clock: MonotonicClock, buffer_capacity: usize) -> Self {
        Self {
            clock,
            devices: Vec::new(),
            disabled: Vec::new(),
            buffer: GlobalEventBuffer::new(buffer_capacity),
            store: None,
            status: HubStatus::Starting,
            experiment_info: None,
            session_info: None,
            next_session_id: 0,
            next_event_id: 1,
        }
    }

    /// Build the hub from config. A device that fails construction is
    /// recorded as disabled and logged; it never aborts the rest. The
    /// datastore likewise degrades to disabled on creation failure.
    pub fn from_config(config: &HubConfig, clock: MonotonicClock, work_dir: &Path) -> Self {
        let mut state = Self::new(clock, config.global_event_buffer_length);

        for dev_config in &config.devices {
            if !dev_config.enabled {
                continue;
            }
            let name = dev_config.resolved_name();
            match state.add_device(dev_config) {
                Ok(_) => info!(device = %name, class = %dev_config.class, "device ready"),
                Err(e) => {
                    warn!(device = %name, error = %e, "device disabled: construction failed");
                    state
                        .disabled
                        .push((name, dev_config.class.as_str().to_string()));
                }
            }
        }

        if config.datastore.enable {
            match JsonlStore::create(work_dir, &config.datastore) {
                Ok(store) => {
                    info!(path = %store.path().display(), "datastore ready");
                    state.store = Some(Box::new(store));
                }
                Err(e) => {
                    warn!(error = %e, "datastore disabled: creation failed");
                }
            }
        }

        state
    }

    /// Construct and start monitoring a device. Used at startup and by the
    /// `ADD_DEVICE` request.
    pub fn add_device(&mut self, config: &DeviceConfig) -> Result<usize, DeviceError> {
        let name = config.resolved_name();
        if self.device_index(&name).is_some() {
            return Err(DeviceError::Config(format!(
                "duplicate device name: {name}"
            )));
        }
        if config.class.is_polled() {
            match config.poll_interval {
                None => {
                    return Err(DeviceError::Config(format!(
                        "poll_interval required for polled class {}",
                        config.class
                    )));
                }
                // Also guards Duration::from_secs_f64 against NaN/negative.
                Some(secs) if !(secs > 0.0 && secs.is_finite()) => {
                    return Err(DeviceError::Config(
                        "poll_interval must be a positive number of seconds".into(),
                    ));
                }
                Some(_) => {}
            }
        }

        let device = MonitoredDevice::from_config(config)?;
        self.devices.push(device);
        Ok(self.devices.len() - 1)
    }

    pub fn device_index(&self, name: &str) -> Option<usize> {
        self.devices.iter().position(|d| d.name() == name)
    }

    /// All devices, constructed and disabled alike, for `GET_DEVICE_LIST`.
    pub fn device_entries(&self) -> Vec<DeviceEntry> {
        let mut entries: Vec<DeviceEntry> = self
            .devices
            .iter()
            .map(|d| DeviceEntry {
                name: d.name().to_string(),
                class: d.class().as_str().to_string(),
                connected: true,
            })
            .collect();
        entries.extend(self.disabled.iter().map(|(name, class)| DeviceEntry {
            name: name.clone(),
            class: class.clone(),
            connected: false,
        }));
        entries
    }

    pub fn usable_device_count(&self) -> usize {
        self.devices.len()
    }

    /// Allocate the next hub-wide event id.
    pub(crate) fn take_event_id(&mut self) -> u64 {
        let id = self.next_event_id;
        self.next_event_id += 1;
        id
    }

    /// Orderly teardown: buffers dropped, store flushed and closed,
    /// devices closed.
    pub fn shutdown(&mut self) {
        self.status = HubStatus::ShuttingDown;
        self.buffer.clear();

        if let Some(mut store) = self.store.take() {
            if let Err(e) = store.flush() {
                warn!(error = %e, "datastore flush failed during shutdown");
            }
            if let Err(e) = store.close() {
                warn!(error = %e, "datastore close failed during shutdown");
            }
        }

        for device in &mut self.devices {
            device.close();
        }
    }
}
