//! Byte-stream socket abstraction consumed by a connection.
//!
//! The connection never blocks inside a socket call. Sends and receives are
//! non-blocking attempts; readiness is awaited separately through
//! [`StreamSocket::readable`] and [`StreamSocket::writable`]. This mirrors
//! the split between a socket's send/receive primitives and its readiness
//! upcalls, and lets tests substitute a scripted in-memory socket.

use std::{io, net::SocketAddr};

use async_trait::async_trait;
use bytes::BytesMut;

mod options;
mod tcp;

pub use options::SocketOptions;

/// Result of a non-blocking send attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendStatus {
    /// `n` bytes from the front of the buffer were accepted.
    Sent(usize),
    /// The send buffer has no room; retry once the socket is writable.
    WouldBlock,
}

/// Non-application record kinds a TLS-capable transport can surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlRecord {
    /// A TLS alert record.
    Alert,
    /// A TLS handshake record (for example a renegotiation or key update).
    Handshake,
    /// Any other non-application record type.
    Other(u8),
}

/// Result of a non-blocking receive attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Received {
    /// `n` application bytes were appended to the buffer.
    Data(usize),
    /// A non-application record is waiting; the external TLS agent must
    /// consume it before application data can flow again.
    Control(ControlRecord),
    /// Nothing is ready right now.
    WouldBlock,
    /// The peer performed an orderly shutdown.
    Closed,
}

/// A connected byte-stream socket.
#[async_trait]
pub trait StreamSocket: Send + Sync + 'static {
    /// Attempt to send the front of `buf` without blocking.
    ///
    /// # Errors
    ///
    /// Returns any hard socket error.
    fn try_send(&self, buf: &[u8]) -> io::Result<SendStatus>;

    /// Attempt to append available bytes to `buf` without blocking.
    ///
    /// # Errors
    ///
    /// Returns any hard socket error.
    fn try_recv(&self, buf: &mut BytesMut) -> io::Result<Received>;

    /// Wait until the socket is likely readable.
    ///
    /// # Errors
    ///
    /// Returns any error the readiness source reports.
    async fn readable(&self) -> io::Result<()>;

    /// Wait until the socket is likely writable.
    ///
    /// # Errors
    ///
    /// Returns any error the readiness source reports.
    async fn writable(&self) -> io::Result<()>;

    /// Shut down both directions of the stream.
    ///
    /// # Errors
    ///
    /// Returns any error reported by the operating system.
    fn shutdown(&self) -> io::Result<()>;

    /// Address of the remote peer, if known.
    fn peer_addr(&self) -> Option<SocketAddr>;

    /// Local address of the socket, if known.
    fn local_addr(&self) -> Option<SocketAddr>;
}
