//! The hub connection: process lifecycle, handshake, and the event API.
//!
//! `connect` owns the whole startup sequence: serialize the config to a
//! temp file, spawn the hub binary, watch its stdout for the readiness
//! sentinel (the socket is not bound before that line appears), measure
//! the clock offset with a sync round trip, and reflect the device list
//! into proxies. `quit` is the symmetric teardown and is safe to call any
//! number of times; dropping the connection kills an un-quit child.

use std::collections::HashMap;
use std::io::Write as _;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tideconf::HubConfig;
use tideproto::{
    DeviceRequest, ErrorKind, Event, MonotonicClock, Request, Response, FAILED_SENTINEL,
    READY_SENTINEL,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info, warn};

use crate::proxy::DeviceProxy;
use crate::replay::ReplayBuffer;
use crate::rpc::{RetryConfig, RpcClient};
use crate::ClientError;

/// How long `quit` waits for a clean child exit before killing it.
const QUIT_WAIT: Duration = Duration::from_secs(5);

/// Settings for spawning and talking to the hub.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub retry: RetryConfig,
    /// Hub executable; bare name resolves through PATH.
    pub hub_binary: PathBuf,
    /// Capacity of the replay buffer filled during `wait()`.
    pub replay_capacity: usize,
    /// Working directory handed to the hub (datastore paths resolve
    /// against it). Defaults to the client's current directory.
    pub work_dir: Option<PathBuf>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            hub_binary: PathBuf::from("eventide"),
            replay_capacity: 1024,
            work_dir: None,
        }
    }
}

/// Scope selector for [`Connection::clear_events`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClearScope {
    /// Only the client-side replay buffer.
    Local,
    /// One device's hub-side buffers.
    Device(String),
    /// Replay buffer, hub global buffer, and every device buffer.
    All,
}

/// A live connection to a hub process.
pub struct Connection {
    client: Arc<RpcClient>,
    clock: MonotonicClock,
    child: Option<Child>,
    /// Keeps the serialized config alive for the hub's lifetime.
    _config_file: Option<tempfile::NamedTempFile>,
    proxies: HashMap<String, DeviceProxy>,
    replay: ReplayBuffer,
    offset: f64,
    round_trip: f64,
    ping_seq: u64,
    quit_done: bool,
}

impl Connection {
    /// Spawn a hub for this config and connect to it.
    pub async fn connect(config: HubConfig) -> Result<Self, ClientError> {
        Self::connect_with(config, ClientOptions::default()).await
    }

    pub async fn connect_with(
        config: HubConfig,
        options: ClientOptions,
    ) -> Result<Self, ClientError> {
        config.validate()?;
        let clock = MonotonicClock::new();

        let mut config_file = tempfile::NamedTempFile::new()?;
        config_file.write_all(config.to_toml().as_bytes())?;
        config_file.flush()?;

        let work_dir = match &options.work_dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir()?,
        };

        let mut child = Command::new(&options.hub_binary)
            .arg("--time-base")
            .arg(format!("{:.6}", clock.now()))
            .arg("--work-dir")
            .arg(&work_dir)
            .arg("--config")
            .arg(config_file.path())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ClientError::Startup("hub stdout not captured".into()))?;

        let start_timeout = Duration::from_secs(config.start_timeout_secs);
        if let Err(e) = wait_for_ready(stdout, start_timeout).await {
            let _ = child.start_kill();
            return Err(e);
        }
        info!(pid = child.id(), "hub process ready");

        let mut conn =
            Self::attach_inner(([127, 0, 0, 1], config.udp_port).into(), options).await?;
        conn.clock = clock;
        conn.child = Some(child);
        conn._config_file = Some(config_file);
        conn.sync_clock().await?;
        conn.build_proxies().await?;
        Ok(conn)
    }

    /// Connect to a hub whose process is managed elsewhere.
    pub async fn attach(
        hub_addr: std::net::SocketAddr,
        options: ClientOptions,
    ) -> Result<Self, ClientError> {
        let mut conn = Self::attach_inner(hub_addr, options).await?;
        conn.sync_clock().await?;
        conn.build_proxies().await?;
        Ok(conn)
    }

    async fn attach_inner(
        hub_addr: std::net::SocketAddr,
        options: ClientOptions,
    ) -> Result<Self, ClientError> {
        let client = RpcClient::connect(hub_addr, options.retry.clone()).await?;
        Ok(Self {
            client: Arc::new(client),
            clock: MonotonicClock::new(),
            child: None,
            _config_file: None,
            proxies: HashMap::new(),
            replay: ReplayBuffer::new(options.replay_capacity),
            offset: 0.0,
            round_trip: 0.0,
            ping_seq: 0,
            quit_done: false,
        })
    }

    /// One sync round trip: measures residual offset (hub minus client at
    /// the request midpoint) and the round-trip delay.
    async fn sync_clock(&mut self) -> Result<(), ClientError> {
        let t0 = self.clock.now();
        let response = self
            .client
            .request(&Request::SyncReq { client_time: t0 })
            .await?;
        let t1 = self.clock.now();

        match response {
            Response::SyncReply { hub_time } => {
                self.round_trip = t1 - t0;
                self.offset = hub_time - (t0 + self.round_trip / 2.0);
                debug!(
                    offset = self.offset,
                    round_trip = self.round_trip,
                    "clock sync complete"
                );
                Ok(())
            }
            other => Err(ClientError::UnexpectedReply(format!("{other:?}"))),
        }
    }

    /// Reflect the hub's device list into proxies, one interface query per
    /// connected device, performed once here rather than per call.
    async fn build_proxies(&mut self) -> Result<(), ClientError> {
        let response = self
            .client
            .request(&Request::ExpDevice(DeviceRequest::GetDeviceList))
            .await?;
        let devices = match response {
            Response::DeviceList { devices } => devices,
            other => return Err(ClientError::UnexpectedReply(format!("{other:?}"))),
        };

        for entry in devices {
            if !entry.connected {
                warn!(device = %entry.name, "skipping proxy for disconnected device");
                continue;
            }
            let response = self
                .client
                .request(&Request::ExpDevice(DeviceRequest::GetDevInterface {
                    class: entry.name.clone(),
                }))
                .await?;
            let methods = match response {
                Response::DevInterface { methods, .. } => methods,
                other => return Err(ClientError::UnexpectedReply(format!("{other:?}"))),
            };
            self.proxies.insert(
                entry.name.clone(),
                DeviceProxy::new(entry.name, entry.class, methods, Arc::clone(&self.client)),
            );
        }
        Ok(())
    }

    pub fn device(&self, name: &str) -> Option<&DeviceProxy> {
        self.proxies.get(name)
    }

    pub fn device_names(&self) -> Vec<&str> {
        self.proxies.keys().map(String::as_str).collect()
    }

    /// Client-side clock reading (same timeline the hub timestamps on).
    pub fn time(&self) -> f64 {
        self.clock.now()
    }

    /// Residual clock offset measured at connect.
    pub fn measured_offset(&self) -> f64 {
        self.offset
    }

    pub fn round_trip(&self) -> f64 {
        self.round_trip
    }

    /// Invoke a hub-level method.
    pub async fn hub_rpc(&self, method: &str, args: Vec<Value>) -> Result<Value, ClientError> {
        let response = self
            .client
            .request(&Request::Rpc {
                method: method.to_string(),
                args,
            })
            .await?;
        match response {
            Response::RpcResult { result, .. } => Ok(result),
            other => Err(ClientError::UnexpectedReply(format!("{other:?}"))),
        }
    }

    pub async fn get_status(&self) -> Result<String, ClientError> {
        let result = self.hub_rpc("get_status", vec![]).await?;
        Ok(result.as_str().unwrap_or_default().to_string())
    }

    /// Liveness probe; returns the round-trip time in seconds.
    pub async fn ping(&mut self) -> Result<f64, ClientError> {
        self.ping_seq += 1;
        let seq = self.ping_seq;
        let t0 = self.clock.now();
        let response = self
            .client
            .request(&Request::Ping {
                client_time: t0,
                seq,
            })
            .await?;
        match response {
            Response::PingBack { seq: back, .. } if back == seq => Ok(self.clock.now() - t0),
            other => Err(ClientError::UnexpectedReply(format!("{other:?}"))),
        }
    }

    /// Retrieve all buffered events: anything accumulated in the replay
    /// buffer during waits (oldest first), then the fresh hub drain.
    pub async fn get_events(&mut self) -> Result<Vec<Event>, ClientError> {
        let fresh = self.fetch_events().await?;
        let mut events = self.replay.drain();
        events.extend(fresh);
        Ok(events)
    }

    async fn fetch_events(&self) -> Result<Vec<Event>, ClientError> {
        match self.client.request(&Request::GetEvents).await? {
            Response::EventsResult { events } => Ok(events),
            other => Err(ClientError::UnexpectedReply(format!("{other:?}"))),
        }
    }

    /// Block for `duration` seconds while fetching events into the replay
    /// buffer every `poll_interval` seconds, so hub buffers do not
    /// overflow during long pauses. Returns the actual elapsed time.
    pub async fn wait(&mut self, duration: f64, poll_interval: f64) -> f64 {
        let start = self.clock.now();
        let target = start + duration;
        let poll = poll_interval.max(0.0);

        if poll > 0.0 {
            while target - self.clock.now() > poll + 0.025 {
                tokio::time::sleep(Duration::from_secs_f64(poll)).await;
                match self.fetch_events().await {
                    Ok(events) => self.replay.extend(events),
                    Err(e) => warn!(error = %e, "background event fetch failed"),
                }
            }
        }

        let remaining = target - self.clock.now() - 0.002;
        if remaining > 0.0 {
            tokio::time::sleep(Duration::from_secs_f64(remaining)).await;
        }
        // Spin out the last sliver for precision.
        while self.clock.now() < target {
            std::hint::spin_loop();
        }

        self.clock.now() - start
    }

    pub async fn clear_events(&mut self, scope: ClearScope) -> Result<(), ClientError> {
        match scope {
            ClearScope::Local => {
                self.replay.clear();
                Ok(())
            }
            ClearScope::Device(name) => match self.proxies.get(&name) {
                Some(proxy) => proxy.clear_events().await,
                None => Err(ClientError::Rpc {
                    kind: ErrorKind::DeviceNotFound,
                    detail: format!("no device named {name}"),
                }),
            },
            ClearScope::All => {
                self.replay.clear();
                match self
                    .client
                    .request(&Request::ClearEvents {
                        device_buffers: true,
                    })
                    .await?
                {
                    Response::Cleared { .. } => Ok(()),
                    other => Err(ClientError::UnexpectedReply(format!("{other:?}"))),
                }
            }
        }
    }

    /// Send an experiment message event for timestamping and storage.
    pub async fn send_message_event(
        &self,
        text: impl Into<String>,
        category: impl Into<String>,
        msg_offset: f64,
        sec_time: Option<f64>,
    ) -> Result<(), ClientError> {
        let message = tideproto::MessageEvent {
            text: text.into(),
            category: category.into(),
            msg_offset,
            sec_time,
        };
        match self
            .client
            .request(&Request::ExpDevice(DeviceRequest::EventTx {
                messages: vec![message],
            }))
            .await?
        {
            Response::EventTxResult { .. } => Ok(()),
            other => Err(ClientError::UnexpectedReply(format!("{other:?}"))),
        }
    }

    pub async fn set_experiment_info(&self, info: Value) -> Result<(), ClientError> {
        self.hub_rpc("set_experiment_info", vec![info]).await?;
        Ok(())
    }

    /// Register session metadata; returns the hub-assigned session id.
    pub async fn create_session(&self, info: Value) -> Result<u64, ClientError> {
        let result = self.hub_rpc("create_session", vec![info]).await?;
        result
            .as_u64()
            .ok_or_else(|| ClientError::UnexpectedReply(format!("bad session id: {result}")))
    }

    /// Stop the hub and reap the child process. Idempotent: later calls
    /// are no-ops. A timeout waiting for exit escalates to a kill.
    pub async fn quit(&mut self) -> Result<(), ClientError> {
        if !self.quit_done {
            self.quit_done = true;
            match self.client.request(&Request::Stop).await {
                Ok(Response::Stopping) => debug!("hub acknowledged stop"),
                Ok(other) => warn!(reply = ?other, "unexpected stop reply"),
                // The hub may already be gone; proceed to reaping.
                Err(e) => warn!(error = %e, "stop request failed"),
            }
        }

        if let Some(mut child) = self.child.take() {
            match tokio::time::timeout(QUIT_WAIT, child.wait()).await {
                Ok(Ok(status)) => {
                    info!(%status, "hub process exited");
                }
                Ok(Err(e)) => return Err(e.into()),
                Err(_elapsed) => {
                    warn!("hub did not exit in time, killing");
                    child.kill().await?;
                }
            }
        }
        Ok(())
    }
}

/// Read the child's stdout until the readiness sentinel appears.
///
/// `EVENTIDE_FAILED`, stream end, and the deadline all count as startup
/// failure. After readiness, remaining stdout is drained to debug logs in
/// the background.
async fn wait_for_ready(stdout: ChildStdout, deadline: Duration) -> Result<(), ClientError> {
    let mut lines = BufReader::new(stdout).lines();

    let wait = async {
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim().to_string();
                    if line == READY_SENTINEL {
                        return Ok(());
                    }
                    if line == FAILED_SENTINEL {
                        return Err(ClientError::Startup(
                            "hub reported startup failure".into(),
                        ));
                    }
                    debug!(line = %line, "hub stdout before readiness");
                }
                Ok(None) => {
                    return Err(ClientError::Startup(
                        "hub exited before readiness".into(),
                    ))
                }
                Err(e) => return Err(ClientError::Io(e)),
            }
        }
    };

    let outcome = tokio::time::timeout(deadline, wait).await;
    match outcome {
        Ok(Ok(())) => {
            // Keep draining so the child never blocks on a full pipe.
            tokio::spawn(async move {
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(line = %line, "hub stdout");
                }
            });
            Ok(())
        }
        Ok(Err(e)) => Err(e),
        Err(_elapsed) => Err(ClientError::Startup(format!(
            "no readiness sentinel within {deadline:?}"
        ))),
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // kill_on_drop covers the child; flag unfinished teardown loudly.
        if self.child.is_some() && !self.quit_done {
            warn!("connection dropped without quit(); hub process killed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[tokio::test]
    async fn ready_sentinel_detected() {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg("echo EVENTIDE_READY; sleep 5")
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let stdout = child.stdout.take().unwrap();
        wait_for_ready(stdout, Duration::from_secs(5)).await.unwrap();
        let _ = child.start_kill();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_sentinel_is_startup_error() {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg("echo some log line; echo EVENTIDE_FAILED")
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let stdout = child.stdout.take().unwrap();
        let err = wait_for_ready(stdout, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Startup(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn early_exit_is_startup_error() {
        let mut child = Command::new("true")
            .stdout(Stdio::piped())
            .spawn()
            .unwrap();
        let stdout = child.stdout.take().unwrap();
        let err = wait_for_ready(stdout, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Startup(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn silent_child_times_out() {
        let mut child = Command::new("sleep")
            .arg("5")
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let stdout = child.stdout.take().unwrap();
        let err = wait_for_ready(stdout, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Startup(_)));
        let _ = child.start_kill();
    }
}
