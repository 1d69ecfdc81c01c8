//! Canonical error and result types for the crate.
//!
//! [`RpcError`] is the single surface returned by connection operations. It
//! separates per-call outcomes (timeouts, interruption, decode and
//! authentication failures, RPC-level reply statuses) from connection-level
//! failures that terminate every pending call on the connection.
//!
//! A connection-level failure is delivered to many waiters at once, so the
//! whole taxonomy is `Clone` and carries I/O causes as [`io::ErrorKind`].

use std::io;

use thiserror::Error;

use crate::{
    codec::{DecodeError, FramingError},
    tls::TlsError,
};

/// Authentication status reported by a server that denied a call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthStat {
    /// No error.
    Ok,
    /// Bad credential (seal broken).
    BadCred,
    /// The client must begin a new session.
    RejectedCred,
    /// Bad verifier (seal broken).
    BadVerf,
    /// Verifier expired or replayed.
    RejectedVerf,
    /// Rejected for security reasons.
    TooWeak,
    /// The reply verifier failed validation.
    InvalidResp,
    /// Unspecified failure.
    Failed,
}

impl AuthStat {
    pub(crate) const fn to_wire(self) -> u32 {
        match self {
            Self::Ok => 0,
            Self::BadCred => 1,
            Self::RejectedCred => 2,
            Self::BadVerf => 3,
            Self::RejectedVerf => 4,
            Self::TooWeak => 5,
            Self::InvalidResp => 6,
            Self::Failed => 7,
        }
    }

    pub(crate) const fn from_wire(value: u32) -> Option<Self> {
        Some(match value {
            0 => Self::Ok,
            1 => Self::BadCred,
            2 => Self::RejectedCred,
            3 => Self::BadVerf,
            4 => Self::RejectedVerf,
            5 => Self::TooWeak,
            6 => Self::InvalidResp,
            7 => Self::Failed,
            _ => return None,
        })
    }
}

impl std::fmt::Display for AuthStat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Ok => "ok",
            Self::BadCred => "bad credential",
            Self::RejectedCred => "credential rejected",
            Self::BadVerf => "bad verifier",
            Self::RejectedVerf => "verifier rejected",
            Self::TooWeak => "too weak",
            Self::InvalidResp => "invalid reply verifier",
            Self::Failed => "failed",
        };
        f.write_str(text)
    }
}

/// Why a request could not be written to the socket.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SendFailure {
    /// The connection is closing or closed.
    #[error("connection closed")]
    Closed,
    /// The socket stayed full for the whole send-retry budget.
    #[error("send retry budget exhausted")]
    RetryBudgetExhausted,
    /// The socket reported an error.
    #[error("socket error: {0:?}")]
    Io(io::ErrorKind),
    /// The xid is already pending on this connection.
    #[error("xid {0:#x} is already pending")]
    DuplicateXid(u32),
    /// The request does not fit in one record fragment.
    #[error("request of {0} bytes is too large to frame")]
    RecordTooLarge(usize),
}

/// Why the connection stopped receiving.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ReceiveFailure {
    /// The peer closed the stream.
    #[error("connection closed by peer")]
    Eof,
    /// The socket reported an error.
    #[error("socket error: {0:?}")]
    Io(io::ErrorKind),
    /// Record framing was lost.
    #[error("framing lost: {0}")]
    Framing(FramingError),
    /// A record too short to hold an xid and direction arrived.
    #[error("record of {len} bytes is too short for an RPC header")]
    ShortMessage {
        /// Length of the offending record.
        len: usize,
    },
}

/// Errors returned by connection operations.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RpcError {
    /// The request could not be sent.
    #[error("cannot send: {0}")]
    CantSend(SendFailure),
    /// The connection failed while the call was pending.
    #[error("cannot receive: {0}")]
    CantReceive(ReceiveFailure),
    /// No reply arrived within the call timeout.
    #[error("call timed out")]
    TimedOut,
    /// The caller's wait was cancelled.
    #[error("call interrupted")]
    Interrupted,
    /// The connection was closed while the call was pending.
    #[error("connection shutting down")]
    ShuttingDown,
    /// Authentication failed and credential refresh was exhausted.
    #[error("authentication error: {0}")]
    Auth(AuthStat),
    /// The reply header was malformed.
    #[error("cannot decode reply: {0}")]
    Decode(#[from] DecodeError),
    /// The external TLS agent reported a failure.
    #[error("tls error: {0}")]
    Tls(#[from] TlsError),
    /// The server does not export the program.
    #[error("program unavailable")]
    ProgramUnavailable,
    /// The server does not support the requested program version.
    #[error("program version mismatch; server supports {low}..={high}")]
    ProgramMismatch {
        /// Lowest supported version.
        low: u32,
        /// Highest supported version.
        high: u32,
    },
    /// The server does not implement the procedure.
    #[error("procedure unavailable")]
    ProcedureUnavailable,
    /// The server could not decode the arguments.
    #[error("server could not decode arguments")]
    GarbageArgs,
    /// The server reported an internal error.
    #[error("remote system error")]
    SystemError,
    /// The server does not speak RPC version 2.
    #[error("RPC version mismatch; server supports {low}..={high}")]
    VersionMismatch {
        /// Lowest supported RPC version.
        low: u32,
        /// Highest supported RPC version.
        high: u32,
    },
}

impl RpcError {
    /// Returns true when the error terminated the whole connection rather
    /// than a single call.
    ///
    /// # Examples
    ///
    /// ```
    /// use rpcwire::{ReceiveFailure, RpcError};
    ///
    /// assert!(RpcError::CantReceive(ReceiveFailure::Eof).is_connection_fatal());
    /// assert!(!RpcError::TimedOut.is_connection_fatal());
    /// ```
    #[must_use]
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            Self::CantReceive(_)
                | Self::ShuttingDown
                | Self::Tls(_)
                | Self::CantSend(SendFailure::Closed)
        )
    }
}

impl From<FramingError> for RpcError {
    fn from(error: FramingError) -> Self { Self::CantReceive(ReceiveFailure::Framing(error)) }
}

/// Canonical result alias used by `rpcwire` public APIs.
pub type Result<T> = std::result::Result<T, RpcError>;
