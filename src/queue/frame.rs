//! The on-disk wire frame: `u32` big-endian length prefix, followed by
//! exactly that many payload bytes. No embedded header or checksum —
//! the payload is opaque to the disk queue; see [`crate::message`] for
//! the envelope producers/channels put inside it.

use super::error::{Error, Result};

pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Encodes `payload` as a disk frame, validating it falls within
/// `[min_msg_size, max_msg_size]` first.
pub fn encode(payload: &[u8], min_msg_size: usize, max_msg_size: usize) -> Result<Vec<u8>> {
    validate_len(payload.len(), min_msg_size, max_msg_size)?;
    let mut framed = Vec::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    framed.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    framed.extend_from_slice(payload);
    Ok(framed)
}

pub fn validate_len(len: usize, min_msg_size: usize, max_msg_size: usize) -> Result<()> {
    if len == 0 || len < min_msg_size || len > max_msg_size {
        return Err(Error::PayloadOutOfBounds {
            size: len,
            min: min_msg_size,
            max: max_msg_size,
        });
    }
    Ok(())
}

/// Decodes a single length prefix. Returns `None` on a short read (EOF
/// with fewer than 4 bytes available) rather than an error — the caller
/// distinguishes "nothing more to read yet" from "this length is
/// nonsense" itself.
pub fn decode_length_prefix(buf: &[u8]) -> Option<u32> {
    if buf.len() < LENGTH_PREFIX_SIZE {
        return None;
    }
    Some(u32::from_be_bytes(buf[0..LENGTH_PREFIX_SIZE].try_into().expect("4 bytes")))
}
