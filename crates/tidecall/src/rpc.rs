//! Lockstep request/reply over UDP with bounded retries.
//!
//! The protocol has no correlation ids: one request is in flight at a
//! time, and a timeout is answered by retrying the whole request with
//! capped exponential backoff. Health is judged by replies actually
//! arriving, not by socket state - UDP has none.

use std::time::Duration;

use bytes::Bytes;
use tideproto::{
    codec, Reassembler, Request, Response, DEFAULT_REQUEST_RETRIES, DEFAULT_REQUEST_TIMEOUT_MS,
    MAX_DATAGRAM,
};
use tokio::net::UdpSocket;
use tracing::{trace, warn};

use crate::ClientError;

/// Retry policy for one logical request.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Timeout per attempt.
    pub timeout: Duration,
    /// Attempts beyond the first.
    pub max_retries: u32,
    /// Initial backoff between attempts.
    pub backoff_base: Duration,
    /// Cap on the exponential backoff growth.
    pub backoff_max: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            max_retries: DEFAULT_REQUEST_RETRIES,
            backoff_base: Duration::from_millis(50),
            backoff_max: Duration::from_secs(2),
        }
    }
}

impl RetryConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Backoff before the given attempt (attempt 0 is the first send and
    /// has none): `base * 2^(n-1)`, capped.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let multiplier = 2u32.saturating_pow(attempt.saturating_sub(1));
        std::cmp::min(self.backoff_base.saturating_mul(multiplier), self.backoff_max)
    }
}

/// A connected client socket plus retry policy.
pub struct RpcClient {
    socket: UdpSocket,
    retry: RetryConfig,
}

impl RpcClient {
    /// Bind an ephemeral local socket and connect it to the hub endpoint.
    pub async fn connect(
        hub_addr: std::net::SocketAddr,
        retry: RetryConfig,
    ) -> Result<Self, ClientError> {
        let socket = UdpSocket::bind("127.0.0.1:0").await?;
        socket.connect(hub_addr).await?;
        Ok(Self { socket, retry })
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// One logical request: send, await the reply (reassembling
    /// multipacket responses), retry on timeout, surface hub error
    /// replies as [`ClientError::Rpc`].
    pub async fn request(&self, request: &Request) -> Result<Response, ClientError> {
        let payload = codec::encode_bounded(request)?;
        let attempts = self.retry.max_retries + 1;

        for attempt in 0..attempts {
            let backoff = self.retry.backoff_for_attempt(attempt);
            if !backoff.is_zero() {
                tokio::time::sleep(backoff).await;
            }

            self.socket.send(&payload).await?;
            trace!(attempt, "request sent");

            match tokio::time::timeout(self.retry.timeout, self.recv_reply()).await {
                Ok(Ok(Response::Error { kind, detail })) => {
                    return Err(ClientError::Rpc { kind, detail });
                }
                Ok(Ok(response)) => return Ok(response),
                Ok(Err(e)) => return Err(e),
                Err(_elapsed) => {
                    warn!(attempt, "request timed out");
                }
            }
        }

        Err(ClientError::ConnectionTimeout { attempts })
    }

    /// Receive one complete reply, following the multipacket path when
    /// announced.
    async fn recv_reply(&self) -> Result<Response, ClientError> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let len = self.socket.recv(&mut buf).await?;

        match codec::decode::<Response>(&buf[..len])? {
            Response::Multipacket { count } => {
                let mut asm = Reassembler::new(count)?;
                loop {
                    let len = self.socket.recv(&mut buf).await?;
                    if let Some(payload) = asm.push(Bytes::copy_from_slice(&buf[..len])) {
                        return Ok(codec::decode(&payload)?);
                    }
                }
            }
            response => Ok(response),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let retry = RetryConfig {
            backoff_base: Duration::from_millis(50),
            backoff_max: Duration::from_millis(300),
            ..Default::default()
        };
        assert_eq!(retry.backoff_for_attempt(0), Duration::ZERO);
        assert_eq!(retry.backoff_for_attempt(1), Duration::from_millis(50));
        assert_eq!(retry.backoff_for_attempt(2), Duration::from_millis(100));
        assert_eq!(retry.backoff_for_attempt(3), Duration::from_millis(200));
        assert_eq!(retry.backoff_for_attempt(4), Duration::from_millis(300));
        assert_eq!(retry.backoff_for_attempt(32), Duration::from_millis(300));
    }

    #[test]
    fn default_config_values() {
        let retry = RetryConfig::default();
        assert_eq!(retry.timeout, Duration::from_millis(2_000));
        assert_eq!(retry.max_retries, 3);
    }

    #[tokio::test]
    async fn timeout_against_dead_endpoint() {
        // Nothing listens on the peer socket; every attempt must time out.
        let dead = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = dead.local_addr().unwrap();

        let retry = RetryConfig::default()
            .with_timeout(Duration::from_millis(20))
            .with_retries(1);
        let client = RpcClient::connect(addr, retry).await.unwrap();

        let err = client
            .request(&Request::Ping {
                client_time: 0.0,
                seq: 0,
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::ConnectionTimeout { attempts: 2 }
        ));
    }
}
