//! Per-device poll scheduling.
//!
//! One cooperative task per polled device drives `poll_tick` at the
//! configured period, self-correcting for scheduling jitter: each tick
//! sleeps only the remainder of the period after the poll itself. A device
//! running slower than its period gets back-to-back ticks with a bare
//! yield; no error is raised, and the widened poll gap shows up in the
//! events' confidence intervals.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::state::SharedState;

/// Cooperative stop handle for one monitor task.
#[derive(Debug)]
pub struct MonitorHandle {
    device: String,
    running: Arc<AtomicBool>,
}

impl MonitorHandle {
    pub fn device_name(&self) -> &str {
        &self.device
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Ask the task to stop after its current tick.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

/// Spawn the poll loop for one device.
pub fn spawn_monitor(
    state: SharedState,
    device_index: usize,
    device_name: String,
    period: Duration,
) -> MonitorHandle {
    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    let name = device_name.clone();

    tokio::spawn(async move {
        debug!(device = %name, period_secs = period.as_secs_f64(), "monitor started");
        let clock = { state.read().await.clock };

        while flag.load(Ordering::Relaxed) {
            let start = clock.now();
            {
                let mut st = state.write().await;
                if let Some(device) = st.devices.get_mut(device_index) {
                    device.poll_tick(start);
                } else {
                    break;
                }
            }

            let remaining = period.as_secs_f64() - (clock.now() - start);
            if remaining > 0.0 {
                tokio::time::sleep(Duration::from_secs_f64(remaining)).await;
            } else {
                // Overrunning the period: keep the loop cooperative without
                // sleeping a full tick.
                tokio::task::yield_now().await;
            }
        }
        debug!(device = %name, "monitor stopped");
    });

    MonitorHandle {
        device: device_name,
        running,
    }
}

/// Spawn a monitor for every polled device in the hub. Callback-driven and
/// virtual devices get none.
pub async fn spawn_monitors(state: &SharedState) -> Vec<MonitorHandle> {
    let targets: Vec<(usize, String, Duration)> = {
        let st = state.read().await;
        st.devices
            .iter()
            .enumerate()
            .filter_map(|(idx, d)| {
                d.poll_interval()
                    .map(|period| (idx, d.name().to_string(), period))
            })
            .collect()
    };

    targets
        .into_iter()
        .map(|(idx, name, period)| spawn_monitor(Arc::clone(state), idx, name, period))
        .collect()
}
