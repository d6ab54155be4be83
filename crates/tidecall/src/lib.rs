//! tidecall - client connection to the eventide event hub
//!
//! Runs in the experiment process. A [`Connection`] spawns the hub as a
//! child process (or attaches to one already running), waits for its
//! readiness sentinel, synchronizes the clock offset, builds one
//! [`DeviceProxy`] per hub device, and from then on speaks strict
//! request/reply over UDP with bounded retries.
//!
//! ```no_run
//! use tideconf::{DeviceClass, DeviceConfig, HubConfig};
//! use tidecall::Connection;
//!
//! # async fn run() -> Result<(), tidecall::ClientError> {
//! let mut config = HubConfig::default();
//! config.devices.push(DeviceConfig::new(DeviceClass::Keyboard));
//!
//! let mut io = Connection::connect(config).await?;
//! let elapsed = io.wait(2.0, 0.02).await;
//! let events = io.get_events().await?;
//! println!("{elapsed:.3}s, {} events", events.len());
//! io.quit().await?;
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod proxy;
pub mod replay;
pub mod rpc;

pub use connection::{ClearScope, ClientOptions, Connection};
pub use proxy::DeviceProxy;
pub use replay::ReplayBuffer;
pub use rpc::{RetryConfig, RpcClient};

use tideproto::{ErrorKind, ProtoError};

/// Client-side failures.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The hub process never reached readiness, or reported failure.
    #[error("hub startup failed: {0}")]
    Startup(String),

    /// No reply within the timeout across every retry attempt.
    #[error("no reply from hub after {attempts} attempts")]
    ConnectionTimeout { attempts: u32 },

    /// The hub answered with a typed error reply.
    #[error("hub error {}: {detail}", .kind.wire_tag())]
    Rpc { kind: ErrorKind, detail: String },

    /// The hub answered with a reply the request cannot accept.
    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),

    #[error(transparent)]
    Proto(#[from] ProtoError),

    #[error(transparent)]
    Config(#[from] tideconf::ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ClientError {
    /// The error kind for hub-reported failures, None otherwise.
    pub fn rpc_kind(&self) -> Option<ErrorKind> {
        match self {
            ClientError::Rpc { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}
