//! The UDP serve loop.
//!
//! One task owns the socket: receive a datagram, decode, dispatch under
//! the state lock, reply, repeat. Malformed datagrams are logged, answered
//! with a transport error, and dropped - they never take the hub down.
//! Replies over the fragmentation threshold go out as a multipacket
//! announcement followed by raw fragments.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use tideproto::{codec, fragment, split_payload, ErrorKind, Request, Response, MAX_DATAGRAM};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dispatch;
use crate::monitor::{self, MonitorHandle};
use crate::pipeline::process_device_events;
use crate::state::{HubStatus, SharedState};

/// Cadence of the background pipeline tick. `GET_EVENTS` also flushes
/// eagerly, so this only bounds how long events sit in ingress rings
/// between client requests.
const PIPELINE_TICK: Duration = Duration::from_millis(10);

pub struct HubServer {
    socket: UdpSocket,
    state: SharedState,
    monitors: Vec<MonitorHandle>,
}

impl HubServer {
    /// Bind the hub endpoint on localhost.
    pub async fn bind(state: SharedState, port: u16) -> Result<Self> {
        let socket = UdpSocket::bind(("127.0.0.1", port))
            .await
            .with_context(|| format!("failed to bind UDP port {port}"))?;
        Ok(Self {
            socket,
            state,
            monitors: Vec::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Serve until a `STOP` request, then tear everything down in order:
    /// monitors stopped, pipeline cancelled, store flushed and closed,
    /// devices closed.
    pub async fn run(mut self) -> Result<()> {
        {
            let mut st = self.state.write().await;
            st.status = HubStatus::Running;
        }

        self.monitors = monitor::spawn_monitors(&self.state).await;
        info!(monitors = self.monitors.len(), "hub running");

        let cancel = CancellationToken::new();
        spawn_pipeline_tick(self.state.clone(), cancel.clone());

        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let (len, peer) = match self.socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    warn!(error = %e, "recv failed, continuing");
                    continue;
                }
            };

            let request: Request = match codec::decode(&buf[..len]) {
                Ok(req) => req,
                Err(e) => {
                    warn!(peer = %peer, error = %e, "dropping malformed datagram");
                    let reply = Response::Error {
                        kind: ErrorKind::Transport,
                        detail: e.to_string(),
                    };
                    if let Err(e) = self.send_response(&reply, peer).await {
                        warn!(peer = %peer, error = %e, "failed to send transport error");
                    }
                    continue;
                }
            };

            let stopping = matches!(request, Request::Stop);
            let response = {
                let mut st = self.state.write().await;
                dispatch::handle_request(&mut st, request)
            };

            // A device added at runtime needs its monitor started here;
            // dispatch itself cannot spawn tasks.
            if let Response::DeviceAdded { ref name, .. } = response {
                self.spawn_monitor_for(name).await;
            }

            if let Err(e) = self.send_response(&response, peer).await {
                warn!(peer = %peer, error = %e, "failed to send reply");
            }

            if stopping {
                break;
            }
        }

        cancel.cancel();
        for monitor in &self.monitors {
            monitor.stop();
        }
        {
            let mut st = self.state.write().await;
            st.shutdown();
        }
        info!("hub stopped");
        Ok(())
    }

    async fn spawn_monitor_for(&mut self, name: &str) {
        let target = {
            let st = self.state.read().await;
            st.device_index(name).and_then(|idx| {
                st.devices[idx]
                    .poll_interval()
                    .map(|period| (idx, period))
            })
        };
        if let Some((idx, period)) = target {
            debug!(device = %name, "starting monitor for added device");
            self.monitors.push(monitor::spawn_monitor(
                self.state.clone(),
                idx,
                name.to_string(),
                period,
            ));
        }
    }

    /// Encode and send one reply, fragmenting when it exceeds a single
    /// datagram's budget.
    async fn send_response(&self, response: &Response, peer: SocketAddr) -> Result<()> {
        let payload = codec::encode(response)?;

        if !fragment::needs_split(payload.len()) {
            self.socket.send_to(&payload, peer).await?;
            return Ok(());
        }

        let fragments = split_payload(&payload);
        let announce = codec::encode(&Response::Multipacket {
            count: fragments.len() as u32,
        })?;
        debug!(
            bytes = payload.len(),
            fragments = fragments.len(),
            "sending multipacket reply"
        );
        self.socket.send_to(&announce, peer).await?;
        for frag in &fragments {
            self.socket.send_to(frag, peer).await?;
            // Let the receiver drain between bursts.
            tokio::task::yield_now().await;
        }
        Ok(())
    }
}

/// Background pipeline tick: keeps ingress rings short even when the
/// client is not actively fetching.
fn spawn_pipeline_tick(state: SharedState, cancel: CancellationToken) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(PIPELINE_TICK) => {
                    let mut st = state.write().await;
                    process_device_events(&mut st);
                }
            }
        }
        debug!("pipeline tick stopped");
    });
}
