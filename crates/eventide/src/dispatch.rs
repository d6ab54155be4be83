//! Request dispatch against closed method tables.
//!
//! Nothing here reflects over arbitrary names from the network: hub-level
//! RPC goes through one match, device RPC goes through each device's
//! declared table, and anything else is a typed error reply. Device and
//! event failures never escape as panics; the worst outcome of a request
//! is an [`ErrorKind`]-tagged error response.

use serde_json::Value;
use tideconf::{DeviceClass, DeviceConfig};
use tideproto::{DeviceRequest, ErrorKind, EventData, MessageEvent, Request, Response};
use tracing::{debug, warn};

use crate::device::NativeEvent;
use crate::pipeline::process_device_events;
use crate::state::{HubState, HubStatus};

/// Handle one decoded request. Pure state transformation: sending the
/// reply (and fragmenting it) is the serve loop's job.
pub fn handle_request(state: &mut HubState, request: Request) -> Response {
    match request {
        Request::SyncReq { client_time: _ } => Response::SyncReply {
            hub_time: state.clock.now(),
        },

        Request::Ping { client_time, seq } => Response::PingBack {
            hub_time: state.clock.now(),
            client_time,
            seq,
        },

        Request::GetEvents => {
            process_device_events(state);
            Response::EventsResult {
                events: state.buffer.drain_sorted(),
            }
        }

        Request::ClearEvents { device_buffers } => {
            // Drain pending natives first so the clear wins over anything
            // produced earlier in program order.
            process_device_events(state);
            let mut dropped = state.buffer.clear();
            if device_buffers {
                for device in &mut state.devices {
                    dropped += device.clear_events();
                }
            }
            Response::Cleared { dropped }
        }

        Request::Rpc { method, args } => handle_hub_rpc(state, &method, &args),

        Request::ExpDevice(sub) => handle_device_request(state, sub),

        Request::Stop => {
            debug!("stop requested");
            state.status = HubStatus::ShuttingDown;
            Response::Stopping
        }
    }
}

/// The closed hub-level method table.
fn handle_hub_rpc(state: &mut HubState, method: &str, args: &[Value]) -> Response {
    let result = match method {
        "get_time" => Ok(Value::from(state.clock.now())),

        "get_status" => Ok(Value::from(state.status.as_str())),

        "get_buffer_stats" => {
            serde_json::to_value(state.buffer.stats()).map_err(|e| runtime(method, e))
        }

        "clear_event_buffer" => {
            let device_level = match args.first() {
                None => false,
                Some(Value::Bool(b)) => *b,
                Some(other) => {
                    return error_response(
                        ErrorKind::NotCallable,
                        format!("clear_event_buffer expects a bool, got {other}"),
                    )
                }
            };
            process_device_events(state);
            let mut dropped = state.buffer.clear();
            if device_level {
                for device in &mut state.devices {
                    dropped += device.clear_events();
                }
            }
            Ok(Value::from(dropped))
        }

        "set_experiment_info" => match args.first() {
            Some(info) => {
                state.experiment_info = Some(info.clone());
                forward_metadata(state, serde_json::json!({ "experiment": info }));
                Ok(Value::Bool(true))
            }
            None => {
                return error_response(
                    ErrorKind::NotCallable,
                    "set_experiment_info expects an info object",
                )
            }
        },

        "create_session" => match args.first() {
            Some(info) => {
                state.next_session_id += 1;
                let session_id = state.next_session_id;
                state.session_info = Some(info.clone());
                forward_metadata(
                    state,
                    serde_json::json!({ "session": info, "session_id": session_id }),
                );
                Ok(Value::from(session_id))
            }
            None => {
                return error_response(
                    ErrorKind::NotCallable,
                    "create_session expects a session object",
                )
            }
        },

        "flush_data_store" => match state.store.as_deref_mut() {
            Some(sink) => match sink.flush() {
                Ok(()) => Ok(Value::Bool(true)),
                Err(e) => return error_response(ErrorKind::Runtime, format!("flush failed: {e}")),
            },
            None => Ok(Value::Bool(false)),
        },

        _ => {
            return error_response(
                ErrorKind::Attribute,
                format!("no hub method named {method}"),
            )
        }
    };

    match result {
        Ok(result) => Response::RpcResult {
            method: method.to_string(),
            result,
        },
        Err(resp) => resp,
    }
}

fn handle_device_request(state: &mut HubState, request: DeviceRequest) -> Response {
    match request {
        DeviceRequest::DevRpc {
            device,
            method,
            args,
        } => {
            // Buffer-level reads must observe everything produced so far.
            if method == "get_events" || method == "clear_events" {
                process_device_events(state);
            }

            let Some(idx) = state.device_index(&device) else {
                return device_not_found(state, &device);
            };
            match state.devices[idx].call_method(&method, &args) {
                Ok(result) => Response::DevRpcResult { result },
                Err(e) => {
                    warn!(device = %device, method = %method, error = %e, "device RPC failed");
                    error_response(e.error_kind(), e.to_string())
                }
            }
        }

        DeviceRequest::EventTx { messages } => {
            let Some(idx) = state
                .devices
                .iter()
                .position(|d| d.class() == DeviceClass::Experiment)
            else {
                return error_response(
                    ErrorKind::DeviceNotFound,
                    "no experiment device configured",
                );
            };

            let now = state.clock.now();
            let sender = state.devices[idx].sender();
            let count = messages.len();
            for msg in messages {
                sender.send(message_native(msg, now));
            }
            // Flush eagerly: message batches can outsize the ingress ring,
            // and callers expect their markers buffered on return.
            process_device_events(state);
            Response::EventTxResult { count }
        }

        DeviceRequest::GetDevInterface { class } => {
            let found = state
                .devices
                .iter()
                .find(|d| d.class().as_str() == class || d.name() == class);
            match found {
                Some(device) => Response::DevInterface {
                    class: class.clone(),
                    methods: device.rpc_interface(),
                },
                None => device_not_found(state, &class),
            }
        }

        DeviceRequest::GetDeviceList => Response::DeviceList {
            devices: state.device_entries(),
        },

        DeviceRequest::AddDevice { class, config } => {
            let dev_config = match parse_device_config(&class, config) {
                Ok(cfg) => cfg,
                Err(detail) => return error_response(ErrorKind::Runtime, detail),
            };
            match state.add_device(&dev_config) {
                Ok(idx) => {
                    let device = &state.devices[idx];
                    Response::DeviceAdded {
                        name: device.name().to_string(),
                        class: device.class().as_str().to_string(),
                        methods: device.rpc_interface(),
                    }
                }
                Err(e) => error_response(e.error_kind(), e.to_string()),
            }
        }
    }
}

/// Convert a client message into a native event on the experiment device's
/// timeline: the caller-supplied time wins when present, and the offset is
/// applied to the final hub time.
fn message_native(msg: MessageEvent, now: f64) -> NativeEvent {
    let base_time = msg.sec_time.unwrap_or(now);
    let mut native = NativeEvent::new(
        base_time,
        now,
        EventData::Message {
            text: msg.text,
            category: msg.category,
        },
    );
    native.time_override = Some(base_time + msg.msg_offset);
    native
}

fn parse_device_config(class: &str, config: Value) -> Result<DeviceConfig, String> {
    let mut map = match config {
        Value::Object(map) => map,
        Value::Null => serde_json::Map::new(),
        other => return Err(format!("device config must be an object, got {other}")),
    };
    map.insert("class".to_string(), Value::from(class));
    serde_json::from_value(Value::Object(map)).map_err(|e| format!("invalid device config: {e}"))
}

fn forward_metadata(state: &mut HubState, meta: Value) {
    if let Some(sink) = state.store.as_deref_mut() {
        if let Err(e) = sink.write_session_metadata(&meta) {
            warn!(error = %e, "metadata write failed");
        }
    }
}

/// Disabled devices answer as not connected; unknown names as missing.
fn device_not_found(state: &HubState, name: &str) -> Response {
    let detail = if state.disabled.iter().any(|(n, c)| n == name || c == name) {
        format!("device {name} is not connected")
    } else {
        format!("no device named {name}")
    };
    error_response(ErrorKind::DeviceNotFound, detail)
}

fn error_response(kind: ErrorKind, detail: impl Into<String>) -> Response {
    Response::Error {
        kind,
        detail: detail.into(),
    }
}

fn runtime(method: &str, e: impl std::fmt::Display) -> Response {
    error_response(ErrorKind::Runtime, format!("{method}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tideproto::MonotonicClock;
    use crate::state::HubState;
    use tideconf::DeviceConfig;
    use tideproto::EventKind;

    fn hub() -> HubState {
        let mut state = HubState::new(MonotonicClock::resumed_from(100.0), 256);
        state
            .add_device(
                &DeviceConfig::new(DeviceClass::Pulse)
                    .with_name("pulse")
                    .with_poll_interval(0.01),
            )
            .unwrap();
        state
            .add_device(&DeviceConfig::new(DeviceClass::Experiment))
            .unwrap();
        state
    }

    #[test]
    fn sync_and_ping() {
        let mut state = hub();
        match handle_request(&mut state, Request::SyncReq { client_time: 99.0 }) {
            Response::SyncReply { hub_time } => assert!(hub_time >= 100.0),
            other => panic!("unexpected: {other:?}"),
        }
        match handle_request(
            &mut state,
            Request::Ping {
                client_time: 99.5,
                seq: 3,
            },
        ) {
            Response::PingBack {
                client_time, seq, ..
            } => {
                assert_eq!(client_time, 99.5);
                assert_eq!(seq, 3);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn get_events_flushes_pipeline() {
        let mut state = hub();
        state.devices[0].poll_tick(100.0);
        state.devices[0].poll_tick(100.01);

        match handle_request(&mut state, Request::GetEvents) {
            Response::EventsResult { events } => {
                assert_eq!(events.len(), 2);
                assert!(events.windows(2).all(|p| p[0].time <= p[1].time));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn clear_wins_over_same_tick_production() {
        let mut state = hub();
        state.devices[0].poll_tick(100.0);

        match handle_request(
            &mut state,
            Request::ClearEvents {
                device_buffers: true,
            },
        ) {
            Response::Cleared { dropped } => assert!(dropped >= 1),
            other => panic!("unexpected: {other:?}"),
        }
        match handle_request(&mut state, Request::GetEvents) {
            Response::EventsResult { events } => assert!(events.is_empty()),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn unknown_hub_method_is_attribute_error() {
        let mut state = hub();
        match handle_request(
            &mut state,
            Request::Rpc {
                method: "reticulate_splines".into(),
                args: vec![],
            },
        ) {
            Response::Error { kind, .. } => assert_eq!(kind, ErrorKind::Attribute),
            other => panic!("unexpected: {other:?}"),
        }
        // The hub keeps serving afterwards.
        assert!(matches!(
            handle_request(
                &mut state,
                Request::Ping {
                    client_time: 0.0,
                    seq: 0
                }
            ),
            Response::PingBack { .. }
        ));
    }

    #[test]
    fn unknown_device_is_device_not_found() {
        let mut state = hub();
        match handle_request(
            &mut state,
            Request::ExpDevice(DeviceRequest::DevRpc {
                device: "theremin".into(),
                method: "get_events".into(),
                args: vec![],
            }),
        ) {
            Response::Error { kind, detail } => {
                assert_eq!(kind, ErrorKind::DeviceNotFound);
                assert!(detail.contains("theremin"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn disabled_device_reports_not_connected() {
        let mut state = hub();
        state
            .disabled
            .push(("tracker".into(), "analog_input".into()));
        match handle_request(
            &mut state,
            Request::ExpDevice(DeviceRequest::DevRpc {
                device: "tracker".into(),
                method: "get_events".into(),
                args: vec![],
            }),
        ) {
            Response::Error { kind, detail } => {
                assert_eq!(kind, ErrorKind::DeviceNotFound);
                assert!(detail.contains("not connected"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn device_get_events_sees_pending_natives() {
        let mut state = hub();
        state.devices[0].poll_tick(100.0);

        match handle_request(
            &mut state,
            Request::ExpDevice(DeviceRequest::DevRpc {
                device: "pulse".into(),
                method: "get_events".into(),
                args: vec![],
            }),
        ) {
            Response::DevRpcResult { result } => {
                let events = result.as_array().unwrap();
                assert_eq!(events.len(), 1);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn event_tx_honors_caller_times() {
        let mut state = hub();
        let resp = handle_request(
            &mut state,
            Request::ExpDevice(DeviceRequest::EventTx {
                messages: vec![
                    MessageEvent {
                        text: "trial start".into(),
                        category: "trial".into(),
                        msg_offset: 0.0,
                        sec_time: Some(42.0),
                    },
                    MessageEvent {
                        text: "nudge".into(),
                        category: String::new(),
                        msg_offset: -0.5,
                        sec_time: Some(50.0),
                    },
                ],
            }),
        );
        assert!(matches!(resp, Response::EventTxResult { count: 2 }));

        match handle_request(&mut state, Request::GetEvents) {
            Response::EventsResult { events } => {
                assert_eq!(events.len(), 2);
                assert_eq!(events[0].kind, EventKind::Message);
                assert_eq!(events[0].time, 42.0);
                assert_eq!(events[1].time, 49.5);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn get_dev_interface_lists_methods() {
        let mut state = hub();
        match handle_request(
            &mut state,
            Request::ExpDevice(DeviceRequest::GetDevInterface {
                class: "pulse".into(),
            }),
        ) {
            Response::DevInterface { methods, .. } => {
                assert!(methods.contains(&"get_events".to_string()));
                assert!(methods.contains(&"get_count".to_string()));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn add_device_then_use_it() {
        let mut state = hub();
        let resp = handle_request(
            &mut state,
            Request::ExpDevice(DeviceRequest::AddDevice {
                class: "analog_input".into(),
                config: serde_json::json!({
                    "name": "daq",
                    "poll_interval": 0.002,
                    "settings": { "channel_count": 4 },
                }),
            }),
        );
        match resp {
            Response::DeviceAdded { name, .. } => assert_eq!(name, "daq"),
            other => panic!("unexpected: {other:?}"),
        }

        match handle_request(
            &mut state,
            Request::ExpDevice(DeviceRequest::DevRpc {
                device: "daq".into(),
                method: "get_channel_count".into(),
                args: vec![],
            }),
        ) {
            Response::DevRpcResult { result } => assert_eq!(result, Value::from(4)),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn add_device_duplicate_name_fails() {
        let mut state = hub();
        let resp = handle_request(
            &mut state,
            Request::ExpDevice(DeviceRequest::AddDevice {
                class: "pulse".into(),
                config: serde_json::json!({ "poll_interval": 0.01 }),
            }),
        );
        match resp {
            Response::Error { kind, detail } => {
                assert_eq!(kind, ErrorKind::Runtime);
                assert!(detail.contains("duplicate"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn stop_transitions_status() {
        let mut state = hub();
        assert!(matches!(
            handle_request(&mut state, Request::Stop),
            Response::Stopping
        ));
        assert_eq!(state.status, HubStatus::ShuttingDown);
    }

    #[test]
    fn create_session_increments_id() {
        let mut state = hub();
        let first = handle_request(
            &mut state,
            Request::Rpc {
                method: "create_session".into(),
                args: vec![serde_json::json!({"code": "S1"})],
            },
        );
        let second = handle_request(
            &mut state,
            Request::Rpc {
                method: "create_session".into(),
                args: vec![serde_json::json!({"code": "S2"})],
            },
        );
        match (first, second) {
            (
                Response::RpcResult { result: a, .. },
                Response::RpcResult { result: b, .. },
            ) => {
                assert_eq!(a, Value::from(1u64));
                assert_eq!(b, Value::from(2u64));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
