//! Minimal XDR primitives used by the RPC header codec.
//!
//! Only the shapes that appear in call and reply headers are supported:
//! unsigned 32-bit integers and variable-length opaque data padded to a
//! four-byte boundary.

use bytes::{BufMut, Bytes, BytesMut};

use super::error::DecodeError;
use crate::byte_order::{XDR_UNIT, read_network_u32_at, write_network_u32, xdr_padding};

/// Append a `u32` in network order.
pub(crate) fn put_u32(dst: &mut BytesMut, value: u32) { dst.put_slice(&write_network_u32(value)); }

/// Append variable-length opaque data with its length prefix and padding.
///
/// Callers bound `data` to protocol limits before encoding, so the length
/// always fits in a `u32`.
pub(crate) fn put_opaque(dst: &mut BytesMut, data: &[u8]) {
    let len = u32::try_from(data.len()).unwrap_or(u32::MAX);
    put_u32(dst, len);
    dst.put_slice(data);
    dst.put_bytes(0, xdr_padding(data.len()));
}

/// Bounds-checked cursor over a received message.
///
/// The reader holds the message as [`Bytes`] so opaque fields and trailing
/// bodies can be handed out without copying.
#[derive(Debug)]
pub(crate) struct XdrReader {
    buf: Bytes,
    pos: usize,
}

impl XdrReader {
    pub(crate) fn new(buf: Bytes) -> Self { Self { buf, pos: 0 } }

    pub(crate) fn position(&self) -> usize { self.pos }

    pub(crate) fn u32(&mut self) -> Result<u32, DecodeError> {
        let value = read_network_u32_at(&self.buf, self.pos).ok_or(DecodeError::Truncated {
            offset: self.pos,
            needed: XDR_UNIT,
            available: self.remaining(),
        })?;
        self.pos += XDR_UNIT;
        Ok(value)
    }

    /// Read length-prefixed opaque data no longer than `max` bytes.
    pub(crate) fn opaque(&mut self, max: usize) -> Result<Bytes, DecodeError> {
        let len = self.u32()? as usize;
        if len > max {
            return Err(DecodeError::AuthTooLong { len, max });
        }
        let padded = len + xdr_padding(len);
        if padded > self.remaining() {
            return Err(DecodeError::Truncated {
                offset: self.pos,
                needed: padded,
                available: self.remaining(),
            });
        }
        let data = self.buf.slice(self.pos..self.pos + len);
        self.pos += padded;
        Ok(data)
    }

    /// Consume the reader, returning every unread byte.
    pub(crate) fn into_rest(self) -> Bytes { self.buf.slice(self.pos..) }

    fn remaining(&self) -> usize { self.buf.len().saturating_sub(self.pos) }
}
