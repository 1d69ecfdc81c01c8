//! Construction of connections.

use std::{net::SocketAddr, sync::Arc};

use tokio::net::TcpSocket;
use tracing::info;

use super::Connection;
use crate::{
    auth::{Auth, AuthNone},
    config::ConnectionConfig,
    error::{Result, RpcError, SendFailure},
    socket::{SocketOptions, StreamSocket},
};

/// Builder for [`Connection`].
///
/// # Examples
///
/// ```no_run
/// use std::{net::SocketAddr, time::Duration};
///
/// use rpcwire::{Connection, ConnectionConfig, SocketOptions};
///
/// # #[tokio::main]
/// # async fn main() -> rpcwire::Result<()> {
/// let addr: SocketAddr = "127.0.0.1:2049".parse().expect("valid socket address");
/// let connection = Connection::builder(100_003, 3)
///     .config(ConnectionConfig::default().with_default_timeout(Duration::from_secs(10)))
///     .socket_options(SocketOptions::default().nodelay(true))
///     .connect(addr)
///     .await?;
/// connection.destroy().await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ConnectionBuilder {
    program: u32,
    version: u32,
    config: ConnectionConfig,
    auth: Arc<dyn Auth>,
    socket_options: SocketOptions,
}

impl ConnectionBuilder {
    /// Start building a connection for `program`/`version` with default
    /// configuration and `AUTH_NONE` credentials.
    #[must_use]
    pub fn new(program: u32, version: u32) -> Self {
        Self {
            program,
            version,
            config: ConnectionConfig::default(),
            auth: Arc::new(AuthNone),
            socket_options: SocketOptions::default(),
        }
    }

    /// Use `config` for the connection.
    #[must_use]
    pub fn config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    /// Attach credentials to every call.
    #[must_use]
    pub fn auth(mut self, auth: Arc<dyn Auth>) -> Self {
        self.auth = auth;
        self
    }

    /// Socket options applied by [`connect`](Self::connect).
    #[must_use]
    pub fn socket_options(mut self, options: SocketOptions) -> Self {
        self.socket_options = options;
        self
    }

    /// Open a TCP connection to `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::CantSend`] if the socket cannot be configured or
    /// the connection is refused.
    pub async fn connect(self, addr: SocketAddr) -> Result<Connection> {
        let io_error = |error: std::io::Error| RpcError::CantSend(SendFailure::Io(error.kind()));
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(io_error)?;
        self.socket_options
            .with_size_hints(self.config.send_size_hint(), self.config.recv_size_hint())
            .apply(&socket)
            .map_err(io_error)?;
        let stream = socket.connect(addr).await.map_err(io_error)?;
        info!(peer = %addr, "connected");
        Ok(self.build(stream, Some(addr)))
    }

    /// Create a connection over an already connected socket.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn build<S: StreamSocket>(self, socket: S, peer_addr: Option<SocketAddr>) -> Connection {
        self.build_shared(Arc::new(socket), peer_addr)
    }

    /// Like [`build`](Self::build) for a socket that is already shared.
    pub fn build_shared(
        self,
        socket: Arc<dyn StreamSocket>,
        peer_addr: Option<SocketAddr>,
    ) -> Connection {
        Connection::from_parts(
            socket,
            peer_addr,
            self.program,
            self.version,
            self.config,
            self.auth,
        )
    }
}
