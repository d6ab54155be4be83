//! Experiment device: the virtual device that receives message events from
//! the client process.
//!
//! It neither polls nor hooks anything; the `EVENT_TX` handler pushes
//! client-submitted messages into its ingress ring through the standard
//! sender, so they flow through the same pipeline (ids, buffers,
//! listeners, datastore) as hardware events.

use tideconf::DeviceClass;

use super::Device;

pub struct Experiment;

impl Experiment {
    pub fn new() -> Self {
        Self
    }
}

impl Default for Experiment {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for Experiment {
    fn class(&self) -> DeviceClass {
        DeviceClass::Experiment
    }
}
