//! The message envelope producers encode into the bytes the disk queue
//! persists (spec's wire layout: `id[16] ‖ traceId[8 BE] ‖ timestamp[8
//! BE] ‖ attempts[2 BE] ‖ body`), and the 16-byte message id assigned at
//! publish time and carried unchanged across requeue.

use std::sync::atomic::{AtomicU64, Ordering};

pub const ENVELOPE_HEADER_LEN: usize = 16 + 8 + 8 + 2;

/// A 16-byte message identifier, stable across requeue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub [u8; 16]);

impl MessageId {
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

/// Produces message ids with no dependency on wall-clock time, so tests
/// can supply a deterministic sequence. Production code uses
/// [`CounterIdSource`], seeded with a per-process random salt so ids
/// from distinct processes don't collide even at the same counter value.
pub trait IdSource: Send + Sync {
    fn next_id(&self) -> MessageId;
}

#[derive(Debug)]
pub struct CounterIdSource {
    salt: [u8; 8],
    counter: AtomicU64,
}

impl CounterIdSource {
    pub fn new(salt: [u8; 8]) -> Self {
        Self {
            salt,
            counter: AtomicU64::new(0),
        }
    }
}

impl IdSource for CounterIdSource {
    fn next_id(&self) -> MessageId {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        let mut bytes = [0u8; 16];
        bytes[0..8].copy_from_slice(&self.salt);
        bytes[8..16].copy_from_slice(&seq.to_be_bytes());
        MessageId(bytes)
    }
}

/// A message in flight between publish and acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub body: Vec<u8>,
    pub attempts: u16,
    pub timestamp_ns: i64,
    pub trace_id: u64,
    pub delivery_ts_ns: i64,
}

impl Message {
    pub fn new(id: MessageId, body: Vec<u8>, timestamp_ns: i64, trace_id: u64) -> Self {
        Self {
            id,
            body,
            attempts: 0,
            timestamp_ns,
            trace_id,
            delivery_ts_ns: 0,
        }
    }

    /// Encodes the envelope to the exact byte layout the disk queue
    /// persists as a frame's payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(ENVELOPE_HEADER_LEN + self.body.len());
        buf.extend_from_slice(&self.id.0);
        buf.extend_from_slice(&self.trace_id.to_be_bytes());
        buf.extend_from_slice(&self.timestamp_ns.to_be_bytes());
        buf.extend_from_slice(&self.attempts.to_be_bytes());
        buf.extend_from_slice(&self.body);
        buf
    }

    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < ENVELOPE_HEADER_LEN {
            return None;
        }
        let mut id = [0u8; 16];
        id.copy_from_slice(&buf[0..16]);
        let trace_id = u64::from_be_bytes(buf[16..24].try_into().ok()?);
        let timestamp_ns = i64::from_be_bytes(buf[24..32].try_into().ok()?);
        let attempts = u16::from_be_bytes(buf[32..34].try_into().ok()?);
        let body = buf[34..].to_vec();
        Some(Self {
            id: MessageId(id),
            body,
            attempts,
            timestamp_ns,
            trace_id,
            delivery_ts_ns: 0,
        })
    }
}
