//! MessagePack encode/decode for wire messages.
//!
//! Encoding uses named fields (`to_vec_named`) so payloads stay
//! self-describing; optional fields can be added without breaking older
//! peers.

use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};

use crate::MAX_DATAGRAM;

/// Errors at the serialization boundary.
#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    #[error("MsgPack encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("MsgPack decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    #[error("encoded request is {size} bytes, over the {max} byte datagram cap")]
    TooLarge { size: usize, max: usize },
    #[error("empty datagram")]
    EmptyDatagram,
    #[error("fragment count {0} is out of range")]
    BadFragmentCount(u32),
}

/// Encode a message to MessagePack bytes.
pub fn encode<T: Serialize>(value: &T) -> Result<Bytes, ProtoError> {
    let buf = rmp_serde::to_vec_named(value)?;
    Ok(Bytes::from(buf))
}

/// Encode a message that must fit in a single datagram (requests).
pub fn encode_bounded<T: Serialize>(value: &T) -> Result<Bytes, ProtoError> {
    let buf = encode(value)?;
    if buf.len() > MAX_DATAGRAM {
        return Err(ProtoError::TooLarge {
            size: buf.len(),
            max: MAX_DATAGRAM,
        });
    }
    Ok(buf)
}

/// Decode a message from MessagePack bytes.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtoError> {
    if bytes.is_empty() {
        return Err(ProtoError::EmptyDatagram);
    }
    Ok(rmp_serde::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Request, Response};

    #[test]
    fn ping_roundtrip() {
        let req = Request::Ping {
            client_time: 12.5,
            seq: 7,
        };
        let bytes = encode(&req).unwrap();
        let back: Request = decode(&bytes).unwrap();
        assert_eq!(back, req);
    }

    #[test]
    fn empty_datagram_rejected() {
        let err = decode::<Request>(&[]).unwrap_err();
        assert!(matches!(err, ProtoError::EmptyDatagram));
    }

    #[test]
    fn garbage_rejected() {
        let err = decode::<Response>(&[0xc1, 0x00, 0xff]).unwrap_err();
        assert!(matches!(err, ProtoError::Decode(_)));
    }

    #[test]
    fn bounded_encode_rejects_oversize() {
        let req = Request::Rpc {
            method: "set_experiment_info".into(),
            args: vec![serde_json::json!("x".repeat(MAX_DATAGRAM))],
        };
        let err = encode_bounded(&req).unwrap_err();
        assert!(matches!(err, ProtoError::TooLarge { .. }));
    }
}
