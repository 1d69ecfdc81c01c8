//! TCP options applied before a connection is opened.

use std::{io, time::Duration};

use socket2::{SockRef, TcpKeepalive};
use tokio::net::TcpSocket;

/// Socket options applied when [`ConnectionBuilder::connect`] opens a TCP
/// stream.
///
/// Unset options keep the operating system defaults. Buffer sizes fall back
/// to the connection's size hints.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use rpcwire::SocketOptions;
///
/// let options = SocketOptions::default()
///     .nodelay(true)
///     .keepalive(Some(Duration::from_secs(60)));
/// assert_eq!(options, SocketOptions::default().nodelay(true).keepalive(Some(Duration::from_secs(60))));
/// ```
///
/// [`ConnectionBuilder::connect`]: crate::ConnectionBuilder::connect
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SocketOptions {
    nodelay: Option<bool>,
    keepalive: Option<Option<Duration>>,
    linger: Option<Option<Duration>>,
    send_buffer_size: Option<u32>,
    recv_buffer_size: Option<u32>,
}

impl SocketOptions {
    /// Configure `TCP_NODELAY`.
    #[must_use]
    pub fn nodelay(mut self, enabled: bool) -> Self {
        self.nodelay = Some(enabled);
        self
    }

    /// Enable `SO_KEEPALIVE` with the given idle time, or disable it with
    /// `None`.
    #[must_use]
    pub fn keepalive(mut self, idle: Option<Duration>) -> Self {
        self.keepalive = Some(idle);
        self
    }

    /// Configure `SO_LINGER`; `None` disables lingering.
    #[must_use]
    pub fn linger(mut self, duration: Option<Duration>) -> Self {
        self.linger = Some(duration);
        self
    }

    /// Configure `SO_SNDBUF`.
    #[must_use]
    pub fn send_buffer_size(mut self, size: u32) -> Self {
        self.send_buffer_size = Some(size);
        self
    }

    /// Configure `SO_RCVBUF`.
    #[must_use]
    pub fn recv_buffer_size(mut self, size: u32) -> Self {
        self.recv_buffer_size = Some(size);
        self
    }

    /// Fill unset buffer sizes from the connection's size hints.
    pub(crate) fn with_size_hints(mut self, send_hint: usize, recv_hint: usize) -> Self {
        let clamp = |hint: usize| u32::try_from(hint).unwrap_or(u32::MAX);
        self.send_buffer_size = self.send_buffer_size.or(Some(clamp(send_hint)));
        self.recv_buffer_size = self.recv_buffer_size.or(Some(clamp(recv_hint)));
        self
    }

    pub(crate) fn apply(&self, socket: &TcpSocket) -> io::Result<()> {
        if let Some(enabled) = self.nodelay {
            socket.set_nodelay(enabled)?;
        }
        match self.keepalive {
            Some(Some(idle)) => {
                socket.set_keepalive(true)?;
                SockRef::from(socket).set_tcp_keepalive(&TcpKeepalive::new().with_time(idle))?;
            }
            Some(None) => socket.set_keepalive(false)?,
            None => {}
        }
        if let Some(linger) = self.linger {
            socket.set_linger(linger)?;
        }
        if let Some(size) = self.send_buffer_size {
            socket.set_send_buffer_size(size)?;
        }
        if let Some(size) = self.recv_buffer_size {
            socket.set_recv_buffer_size(size)?;
        }
        Ok(())
    }
}
