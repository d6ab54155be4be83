//! Request and response messages for the hub's UDP endpoint.
//!
//! The protocol is strict request/reply: the client sends one [`Request`]
//! per datagram and blocks for the matching [`Response`]. There are no
//! correlation ids; a connection has at most one request in flight.
//!
//! Free-form RPC arguments and results travel as `serde_json::Value` so the
//! dispatch layer stays generic while concrete handlers decode what they
//! expect.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event::Event;

/// A request datagram, client to hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Request {
    /// Clock sync probe; the reply carries the hub's current time.
    SyncReq { client_time: f64 },
    /// Liveness probe with an echo payload.
    Ping { client_time: f64, seq: u64 },
    /// Flush the pipeline and drain the global event buffer.
    GetEvents,
    /// Clear the global event buffer; optionally every device's egress
    /// buffer as well.
    ClearEvents { device_buffers: bool },
    /// Invoke a hub-level method from the closed hub dispatch table.
    Rpc { method: String, args: Vec<Value> },
    /// Device-scoped sub-request.
    ExpDevice(DeviceRequest),
    /// Begin hub shutdown. The reply is sent before the process exits.
    Stop,
}

/// Device-scoped requests, nested under [`Request::ExpDevice`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceRequest {
    /// Invoke a method from the named device's dispatch table.
    DevRpc {
        device: String,
        method: String,
        args: Vec<Value>,
    },
    /// Submit experiment message events for timestamping and storage.
    EventTx { messages: Vec<MessageEvent> },
    /// List the RPC methods a device class accepts (queried once at client
    /// connect to synthesize proxies).
    GetDevInterface { class: String },
    /// Construct and start monitoring a new device after startup.
    AddDevice { class: String, config: Value },
    GetDeviceList,
}

/// An experiment-sourced message event, pre-timestamping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEvent {
    pub text: String,
    #[serde(default)]
    pub category: String,
    /// Offset in seconds applied to the final event time.
    #[serde(default)]
    pub msg_offset: f64,
    /// Caller-supplied event time; hub receipt time is used when absent.
    #[serde(default)]
    pub sec_time: Option<f64>,
}

/// A response datagram, hub to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Response {
    SyncReply { hub_time: f64 },
    PingBack {
        hub_time: f64,
        client_time: f64,
        seq: u64,
    },
    /// Reply to `GET_EVENTS`; events are in ascending hub-time order.
    EventsResult { events: Vec<Event> },
    /// Reply to `CLEAR_EVENTS`; counts the events discarded hub-side.
    Cleared { dropped: usize },
    RpcResult { method: String, result: Value },
    DevRpcResult { result: Value },
    EventTxResult { count: usize },
    DevInterface { class: String, methods: Vec<String> },
    DeviceList { devices: Vec<DeviceEntry> },
    DeviceAdded {
        name: String,
        class: String,
        methods: Vec<String>,
    },
    /// Acknowledgement of `STOP`; the hub exits after sending it.
    Stopping,
    /// Announces a fragmented reply: `count` raw fragments follow, in
    /// order, which concatenate to one encoded `Response`.
    Multipacket { count: u32 },
    /// Typed failure reply.
    Error { kind: ErrorKind, detail: String },
}

/// One device as reported by `GET_DEVICE_LIST`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceEntry {
    pub name: String,
    pub class: String,
    /// False when the device failed construction and was disabled rather
    /// than aborting hub startup.
    pub connected: bool,
}

/// Global event buffer statistics, returned by the `get_buffer_stats` hub
/// method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferStats {
    pub len: usize,
    pub capacity: usize,
    pub total_pushed: u64,
    pub dropped: u64,
}

/// Failure category carried by [`Response::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Named method does not exist in the dispatch table.
    Attribute,
    /// Method exists but cannot be invoked with the given arguments.
    NotCallable,
    /// Method ran and failed.
    Runtime,
    DeviceNotFound,
    /// Pipeline flush failed while servicing `GET_EVENTS`.
    GetEvents,
    /// Request datagram could not be decoded.
    Transport,
}

impl ErrorKind {
    /// Legacy-style wire tag, used in logs and error displays.
    pub fn wire_tag(self) -> &'static str {
        match self {
            ErrorKind::Attribute => "RPC_ATTRIBUTE_ERROR",
            ErrorKind::NotCallable => "RPC_NOT_CALLABLE_ERROR",
            ErrorKind::Runtime => "RPC_RUNTIME_ERROR",
            ErrorKind::DeviceNotFound => "DEVICE_NOT_FOUND_ERROR",
            ErrorKind::GetEvents => "GET_EVENTS_ERROR",
            ErrorKind::Transport => "TRANSPORT_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.wire_tag())
    }
}
