//! Large-reply fragmentation.
//!
//! A reply that reaches [`FRAGMENT_PAYLOAD`](crate::FRAGMENT_PAYLOAD) bytes
//! is split into raw chunks and announced with
//! [`Response::Multipacket`](crate::Response::Multipacket). Fragments carry
//! no framing of their own; the client concatenates them in arrival order
//! and decodes the result. UDP on loopback preserves ordering in practice;
//! a lost or reordered fragment surfaces as a decode failure and the
//! client's retry path re-issues the request.

use bytes::Bytes;

use crate::codec::ProtoError;
use crate::FRAGMENT_PAYLOAD;

/// Upper bound on fragments per reply; anything larger indicates a corrupt
/// announcement rather than a real payload.
const MAX_FRAGMENTS: u32 = 4096;

/// Whether an encoded reply must take the multipacket path.
pub fn needs_split(len: usize) -> bool {
    len >= FRAGMENT_PAYLOAD
}

/// Split an encoded reply into raw fragments of at most
/// [`FRAGMENT_PAYLOAD`](crate::FRAGMENT_PAYLOAD) bytes each.
pub fn split_payload(payload: &Bytes) -> Vec<Bytes> {
    let mut fragments = Vec::with_capacity(payload.len() / FRAGMENT_PAYLOAD + 1);
    let mut offset = 0;
    while offset < payload.len() {
        let end = usize::min(offset + FRAGMENT_PAYLOAD, payload.len());
        fragments.push(payload.slice(offset..end));
        offset = end;
    }
    fragments
}

/// Client-side reassembly state for one multipacket reply.
#[derive(Debug)]
pub struct Reassembler {
    expected: u32,
    parts: Vec<Bytes>,
}

impl Reassembler {
    /// Start reassembly from a multipacket announcement.
    pub fn new(count: u32) -> Result<Self, ProtoError> {
        if count == 0 || count > MAX_FRAGMENTS {
            return Err(ProtoError::BadFragmentCount(count));
        }
        Ok(Self {
            expected: count,
            parts: Vec::with_capacity(count as usize),
        })
    }

    /// Feed the next fragment. Returns the concatenated payload once all
    /// fragments have arrived, None while more are expected.
    pub fn push(&mut self, fragment: Bytes) -> Option<Bytes> {
        self.parts.push(fragment);
        if self.parts.len() as u32 == self.expected {
            let total: usize = self.parts.iter().map(|p| p.len()).sum();
            let mut buf = Vec::with_capacity(total);
            for part in &self.parts {
                buf.extend_from_slice(part);
            }
            Some(Bytes::from(buf))
        } else {
            None
        }
    }

    pub fn remaining(&self) -> u32 {
        self.expected - self.parts.len() as u32
    }
}
