//! Per-device proxies.
//!
//! The connection queries each device's RPC interface once at connect
//! time; a proxy refuses unknown method names locally, with no round
//! trip, so a typo costs microseconds instead of a network timeout.

use std::sync::Arc;

use serde_json::Value;
use tideproto::{DeviceRequest, ErrorKind, Event, EventKind, Request, Response};

use crate::rpc::RpcClient;
use crate::ClientError;

/// Client-side handle to one hub device.
#[derive(Clone)]
pub struct DeviceProxy {
    name: String,
    class: String,
    methods: Arc<Vec<String>>,
    client: Arc<RpcClient>,
}

impl DeviceProxy {
    pub(crate) fn new(
        name: String,
        class: String,
        methods: Vec<String>,
        client: Arc<RpcClient>,
    ) -> Self {
        Self {
            name,
            class,
            methods: Arc::new(methods),
            client,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    /// Methods the hub accepts for this device.
    pub fn methods(&self) -> &[String] {
        &self.methods
    }

    /// Invoke a device method. Unknown names fail locally with an
    /// attribute-kind error before any datagram is sent.
    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, ClientError> {
        if !self.methods.iter().any(|m| m == method) {
            return Err(ClientError::Rpc {
                kind: ErrorKind::Attribute,
                detail: format!("device {} has no method {method}", self.name),
            });
        }

        let response = self
            .client
            .request(&Request::ExpDevice(DeviceRequest::DevRpc {
                device: self.name.clone(),
                method: method.to_string(),
                args,
            }))
            .await?;

        match response {
            Response::DevRpcResult { result } => Ok(result),
            other => Err(ClientError::UnexpectedReply(format!("{other:?}"))),
        }
    }

    /// Drain this device's egress buffer, optionally one kind only.
    pub async fn get_events(&self, kind: Option<EventKind>) -> Result<Vec<Event>, ClientError> {
        let args = match kind {
            Some(kind) => vec![Value::from(kind.name())],
            None => vec![],
        };
        let result = self.call("get_events", args).await?;
        serde_json::from_value(result)
            .map_err(|e| ClientError::UnexpectedReply(format!("bad event payload: {e}")))
    }

    /// Discard this device's queued and buffered events.
    pub async fn clear_events(&self) -> Result<(), ClientError> {
        self.call("clear_events", vec![]).await.map(|_| ())
    }

    pub async fn enable_event_reporting(&self, enabled: bool) -> Result<bool, ClientError> {
        let result = self
            .call("enable_event_reporting", vec![Value::from(enabled)])
            .await?;
        Ok(result.as_bool().unwrap_or(enabled))
    }

    pub async fn is_reporting_events(&self) -> Result<bool, ClientError> {
        let result = self.call("is_reporting_events", vec![]).await?;
        Ok(result.as_bool().unwrap_or(false))
    }
}

impl std::fmt::Debug for DeviceProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceProxy")
            .field("name", &self.name)
            .field("class", &self.class)
            .field("methods", &self.methods.len())
            .finish()
    }
}
