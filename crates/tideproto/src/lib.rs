//! tideproto - Protocol types for the eventide event hub
//!
//! This crate defines the messages exchanged between an experiment process
//! and the eventide hub process over UDP, plus the event records both sides
//! share. All messages are MessagePack-encoded; replies larger than a single
//! datagram are fragmented (see the `fragment` module).
//!
//! ## Wire Format
//!
//! A message is one MessagePack-encoded [`Request`] or [`Response`] per
//! datagram. The encoding is self-describing (named fields), so a reply can
//! be decoded without knowing which request produced it.
//!
//! Oversized replies use a two-phase scheme: the hub first sends
//! [`Response::Multipacket`] announcing a fragment count, then that many raw
//! fragments in order. The client concatenates the fragments and decodes the
//! result exactly as it would a single-datagram reply.
//!
//! ## Startup Handshake
//!
//! The hub's listening socket is not bound until late in startup, so the
//! readiness signal travels over the child's stdout instead: a single
//! [`READY_SENTINEL`] or [`FAILED_SENTINEL`] line. No datagram is sent
//! before the sentinel is observed.

pub mod clock;
pub mod codec;
pub mod event;
pub mod fragment;
pub mod message;

pub use clock::MonotonicClock;
pub use codec::{decode, encode, ProtoError};
pub use event::{Event, EventData, EventKind, Modifiers, MouseButton};
pub use fragment::{split_payload, Reassembler};
pub use message::{
    BufferStats, DeviceEntry, DeviceRequest, ErrorKind, MessageEvent, Request, Response,
};

/// Maximum size of a single datagram payload, in bytes.
///
/// Chosen well under the 64 KiB UDP limit so a datagram never fragments at
/// the IP layer on loopback.
pub const MAX_DATAGRAM: usize = 32 * 1024;

/// Replies whose encoded size reaches this threshold are fragmented.
///
/// Half the datagram cap minus header slack, so a fragment plus any
/// transport framing always fits comfortably in one datagram.
pub const FRAGMENT_PAYLOAD: usize = MAX_DATAGRAM / 2 - 20;

/// Sentinel line printed on the hub's stdout once the UDP socket is bound
/// and every configured device has been constructed.
pub const READY_SENTINEL: &str = "EVENTIDE_READY";

/// Sentinel line printed on the hub's stdout when startup fails fatally
/// (transport bind failure or zero usable devices).
pub const FAILED_SENTINEL: &str = "EVENTIDE_FAILED";

/// Default per-attempt reply timeout for client requests, in milliseconds.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 2_000;

/// Default number of attempts before a client request fails.
pub const DEFAULT_REQUEST_RETRIES: u32 = 3;

/// Default time the client waits for the readiness sentinel, in seconds.
pub const DEFAULT_START_TIMEOUT_SECS: u64 = 30;
