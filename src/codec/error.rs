//! Error types for the codec layer.
//!
//! The codec distinguishes two failure families:
//!
//! - [`FramingError`]: the record-marking layer lost track of record
//!   boundaries. On a byte stream there is no resynchronisation point after
//!   this, so the connection treats every framing error as fatal.
//! - [`DecodeError`]: a complete record was extracted but its RPC header is
//!   malformed. Reply decode errors are returned to the single caller that
//!   owns the reply.

use std::io;

use thiserror::Error;

/// Record-marking errors raised while splitting a byte stream into records.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FramingError {
    /// A fragment marker announced more bytes than the record cap allows.
    #[error("record exceeds max size: {size} > {max}")]
    OversizedRecord {
        /// Size the record would reach once the fragment is appended.
        size: usize,
        /// Configured maximum record size.
        max: usize,
    },

    /// An outbound message does not fit in a single fragment.
    #[error("message of {size} bytes does not fit in one fragment")]
    FragmentTooLarge {
        /// Size of the message that was to be framed.
        size: usize,
    },

    /// The underlying reader failed while the decoder held partial state.
    #[error("I/O error while framing: {0:?}")]
    Io(io::ErrorKind),
}

impl From<io::Error> for FramingError {
    fn from(error: io::Error) -> Self { Self::Io(error.kind()) }
}

/// Errors produced while decoding RPC message headers.
///
/// Every length read from the wire is checked against the remaining buffer,
/// so adversarial input surfaces here instead of panicking.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// The message ended before a complete field could be read.
    #[error("truncated message: needed {needed} bytes at offset {offset}, {available} available")]
    Truncated {
        /// Offset of the field being read.
        offset: usize,
        /// Bytes required for the field.
        needed: usize,
        /// Bytes remaining in the buffer.
        available: usize,
    },

    /// The direction discriminant was neither call nor reply.
    #[error("unknown message direction {0}")]
    UnknownDirection(u32),

    /// A reply was expected but the record carries a call (or vice versa).
    #[error("unexpected message direction {0}")]
    UnexpectedDirection(u32),

    /// The call header names an RPC protocol version other than 2.
    #[error("unsupported RPC version {0}")]
    UnsupportedRpcVersion(u32),

    /// The reply status was neither accepted nor denied.
    #[error("unknown reply status {0}")]
    UnknownReplyStatus(u32),

    /// The accept status of an accepted reply is not defined.
    #[error("unknown accept status {0}")]
    UnknownAcceptStatus(u32),

    /// The reject status of a denied reply is not defined.
    #[error("unknown reject status {0}")]
    UnknownRejectStatus(u32),

    /// The authentication status of an `AUTH_ERROR` reply is not defined.
    #[error("unknown auth status {0}")]
    UnknownAuthStatus(u32),

    /// An opaque authentication body exceeds the protocol limit.
    #[error("auth body of {len} bytes exceeds {max}")]
    AuthTooLong {
        /// Announced body length.
        len: usize,
        /// Protocol maximum.
        max: usize,
    },
}
