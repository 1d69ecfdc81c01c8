//! Record-marking codec for ONC-RPC over byte streams.
//!
//! A stream transport carries each RPC message as a *record* made of one or
//! more fragments. Every fragment starts with a four-byte big-endian marker:
//! bit 31 flags the last fragment of the record and bits 0..=30 hold the
//! fragment's payload length.
//!
//! [`RecordDecoder`] reassembles records from an arbitrarily chunked byte
//! stream and [`RecordEncoder`] (or the free function [`frame`]) emits each
//! outbound message as exactly one last fragment. Both implement the
//! `tokio_util::codec` traits so they also compose with `Framed`.
//!
//! The [`message`] module encodes and decodes the RPC call/reply headers
//! carried inside records.
//!
//! # Error Handling
//!
//! Framing failures are reported as [`FramingError`]. Once framing is lost
//! the stream cannot be resynchronised, so callers must treat any framing
//! error as fatal to the connection.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::byte_order::{read_network_u32, write_network_u32};

pub mod error;
pub mod message;
pub(crate) mod xdr;

pub use error::{DecodeError, FramingError};
pub use message::{
    AcceptedStatus,
    CallHeader,
    Direction,
    InboundCall,
    OpaqueAuth,
    Rejection,
    ReplyBody,
    decode_call,
    decode_reply,
    decode_reply_body,
    encode_call,
    encode_reply,
    peek_xid_and_direction,
};

/// Size of a fragment marker in bytes.
pub const MARKER_SIZE: usize = 4;

/// Bit flagging the last fragment of a record.
pub const LAST_FRAGMENT: u32 = 0x8000_0000;

/// Largest payload a single fragment can announce.
pub const MAX_FRAGMENT_LENGTH: u32 = !LAST_FRAGMENT;

/// Record cap used when none is configured (16 MiB).
pub const DEFAULT_RECORD_SIZE: usize = 16 * 1024 * 1024;

/// Upper bound on buffer space reserved ahead of fragment payload arrival.
const RESERVE_CHUNK: usize = 64 * 1024;

/// Smallest accepted record cap.
pub const MIN_RECORD_SIZE: usize = 1024;

/// Largest accepted record cap.
pub const MAX_RECORD_SIZE: usize = MAX_FRAGMENT_LENGTH as usize;

pub(crate) fn clamp_record_size(value: usize) -> usize {
    value.clamp(MIN_RECORD_SIZE, MAX_RECORD_SIZE)
}

/// Parsed fragment marker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordMarker {
    is_last: bool,
    length: u32,
}

impl RecordMarker {
    /// Build a marker for a fragment of `length` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`FramingError::FragmentTooLarge`] when `length` does not fit
    /// in 31 bits.
    pub fn new(is_last: bool, length: usize) -> Result<Self, FramingError> {
        let length = u32::try_from(length)
            .ok()
            .filter(|len| *len <= MAX_FRAGMENT_LENGTH)
            .ok_or(FramingError::FragmentTooLarge { size: length })?;
        Ok(Self { is_last, length })
    }

    /// Whether this fragment completes its record.
    #[must_use]
    pub const fn is_last(self) -> bool { self.is_last }

    /// Payload length announced by the marker.
    #[must_use]
    pub const fn length(self) -> u32 { self.length }

    /// Encode the marker as it appears on the wire.
    #[must_use]
    pub fn to_bytes(self) -> [u8; MARKER_SIZE] {
        let flag = if self.is_last { LAST_FRAGMENT } else { 0 };
        write_network_u32(flag | self.length)
    }
}

/// Split a raw marker into its last-fragment flag and 31-bit length.
///
/// # Examples
///
/// ```
/// use rpcwire::codec::parse_marker;
///
/// let marker = parse_marker([0x80, 0x00, 0x00, 0x2c]);
/// assert!(marker.is_last());
/// assert_eq!(marker.length(), 44);
/// ```
#[must_use]
pub fn parse_marker(bytes: [u8; MARKER_SIZE]) -> RecordMarker {
    let word = read_network_u32(bytes);
    RecordMarker {
        is_last: word & LAST_FRAGMENT != 0,
        length: word & MAX_FRAGMENT_LENGTH,
    }
}

/// Prepend a last-fragment marker to `message`.
///
/// # Errors
///
/// Returns [`FramingError::FragmentTooLarge`] if the message is longer than a
/// single fragment can describe.
///
/// # Examples
///
/// ```
/// use rpcwire::codec::frame;
///
/// let framed = frame(b"abc").expect("small messages fit in one fragment");
/// assert_eq!(&framed[..], &[0x80, 0, 0, 3, b'a', b'b', b'c']);
/// ```
pub fn frame(message: &[u8]) -> Result<Bytes, FramingError> {
    let mut dst = BytesMut::with_capacity(MARKER_SIZE + message.len());
    <RecordEncoder as Encoder<&[u8]>>::encode(&mut RecordEncoder, message, &mut dst)?;
    Ok(dst.freeze())
}

/// Outbound half of the record-marking codec.
///
/// Every message becomes exactly one last fragment.
#[derive(Clone, Copy, Debug, Default)]
pub struct RecordEncoder;

impl Encoder<&[u8]> for RecordEncoder {
    type Error = FramingError;

    fn encode(&mut self, item: &[u8], dst: &mut BytesMut) -> Result<(), Self::Error> {
        let marker = RecordMarker::new(true, item.len())?;
        dst.reserve(MARKER_SIZE + item.len());
        dst.put_slice(&marker.to_bytes());
        dst.put_slice(item);
        Ok(())
    }
}

impl Encoder<Bytes> for RecordEncoder {
    type Error = FramingError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        <Self as Encoder<&[u8]>>::encode(self, item.as_ref(), dst)
    }
}

/// Inbound half of the record-marking codec.
///
/// The decoder owns the in-progress record and the number of payload bytes
/// still expected in the current fragment. `record_resid() == 0` holds
/// exactly when the decoder is waiting for the next fragment marker.
#[derive(Debug)]
pub struct RecordDecoder {
    max_record_size: usize,
    record: BytesMut,
    resid: u32,
    is_last: bool,
}

impl RecordDecoder {
    /// Create a decoder that rejects records larger than `max_record_size`.
    ///
    /// The cap is clamped to [`MIN_RECORD_SIZE`]..=[`MAX_RECORD_SIZE`].
    #[must_use]
    pub fn new(max_record_size: usize) -> Self {
        Self {
            max_record_size: clamp_record_size(max_record_size),
            record: BytesMut::new(),
            resid: 0,
            is_last: false,
        }
    }

    /// Maximum record size accepted by this decoder.
    #[must_use]
    pub const fn max_record_size(&self) -> usize { self.max_record_size }

    /// Payload bytes still expected in the current fragment.
    #[must_use]
    pub const fn record_resid(&self) -> u32 { self.resid }

    /// Last-fragment flag of the most recently parsed marker.
    #[must_use]
    pub const fn record_is_last(&self) -> bool { self.is_last }

    /// Bytes accumulated for the record in progress.
    #[must_use]
    pub fn buffered_len(&self) -> usize { self.record.len() }

    /// Discard any partial record.
    pub fn reset(&mut self) {
        self.record.clear();
        self.resid = 0;
        self.is_last = false;
    }

    fn take_marker(&mut self, src: &mut BytesMut) -> Result<bool, FramingError> {
        let Some(raw) = src
            .get(..MARKER_SIZE)
            .and_then(|slice| <[u8; MARKER_SIZE]>::try_from(slice).ok())
        else {
            return Ok(false);
        };
        let marker = parse_marker(raw);
        let size = self.record.len().saturating_add(marker.length() as usize);
        if size > self.max_record_size {
            return Err(FramingError::OversizedRecord {
                size,
                max: self.max_record_size,
            });
        }
        src.advance(MARKER_SIZE);
        self.resid = marker.length();
        self.is_last = marker.is_last();
        self.record
            .reserve((marker.length() as usize).min(RESERVE_CHUNK));
        Ok(true)
    }
}

impl Default for RecordDecoder {
    fn default() -> Self { Self::new(DEFAULT_RECORD_SIZE) }
}

impl Decoder for RecordDecoder {
    type Item = Bytes;
    type Error = FramingError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            if self.resid == 0 && !self.take_marker(src)? {
                return Ok(None);
            }

            let take = src.len().min(self.resid as usize);
            self.record.put_slice(&src[..take]);
            src.advance(take);
            // `take` never exceeds `resid`, which is a u32.
            self.resid -= u32::try_from(take).unwrap_or(self.resid);

            if self.resid > 0 {
                return Ok(None);
            }
            if self.is_last {
                return Ok(Some(self.record.split().freeze()));
            }
        }
    }
}
