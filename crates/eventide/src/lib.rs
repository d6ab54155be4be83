//! eventide - event hub process for experiment runtimes
//!
//! The hub owns a set of input devices, acquires their raw samples by
//! polling or OS/SDK callback, converts them into timestamped
//! [`Event`](tideproto::Event) records, buffers them, and serves them to the
//! experiment process over the `tideproto` UDP protocol.
//!
//! ## Process model
//!
//! The hub runs on a current-thread tokio runtime: a cooperative
//! single-threaded loop in which the UDP serve task, the pipeline tick task,
//! and one monitor task per polled device interleave at await points. No
//! locking is contended in steady state; the one genuinely concurrent
//! boundary is the lock-free ingress ring that OS hook / SDK callback
//! threads push into (see [`device::NativeEventSender`]).
//!
//! ## Module map
//!
//! - [`device`] - device trait, concrete devices, ingress/egress buffers
//! - [`filter`] - per-device event stream transforms
//! - [`monitor`] - per-device poll scheduling
//! - [`pipeline`] - drain/convert/filter/fan-out per tick
//! - [`buffer`] - the global event buffer the client drains
//! - [`state`] - all hub process state in one explicitly-passed struct
//! - [`dispatch`] - request handling against closed method tables
//! - [`server`] - the UDP serve loop and reply fragmentation
//! - [`datastore`] - append-only event sink boundary
//! - [`telemetry`] - tracing subscriber setup (stderr; stdout carries the
//!   readiness sentinel)

pub mod buffer;
pub mod datastore;
pub mod device;
pub mod dispatch;
pub mod filter;
pub mod monitor;
pub mod pipeline;
pub mod server;
pub mod state;
pub mod telemetry;

pub use buffer::GlobalEventBuffer;
pub use state::{HubState, HubStatus, SharedState};
