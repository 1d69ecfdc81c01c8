//! [`StreamSocket`] for Tokio TCP streams.

use std::{
    io,
    net::{Shutdown, SocketAddr},
};

use async_trait::async_trait;
use bytes::BytesMut;
use socket2::SockRef;
use tokio::net::TcpStream;

use super::{Received, SendStatus, StreamSocket};

#[async_trait]
impl StreamSocket for TcpStream {
    fn try_send(&self, buf: &[u8]) -> io::Result<SendStatus> {
        match self.try_write(buf) {
            Ok(n) => Ok(SendStatus::Sent(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(SendStatus::WouldBlock),
            Err(e) => Err(e),
        }
    }

    fn try_recv(&self, buf: &mut BytesMut) -> io::Result<Received> {
        buf.reserve(4096);
        match self.try_read_buf(buf) {
            Ok(0) => Ok(Received::Closed),
            Ok(n) => Ok(Received::Data(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(Received::WouldBlock),
            Err(e) => Err(e),
        }
    }

    async fn readable(&self) -> io::Result<()> { TcpStream::readable(self).await }

    async fn writable(&self) -> io::Result<()> { TcpStream::writable(self).await }

    fn shutdown(&self) -> io::Result<()> {
        match SockRef::from(self).shutdown(Shutdown::Both) {
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }

    fn peer_addr(&self) -> Option<SocketAddr> { TcpStream::peer_addr(self).ok() }

    fn local_addr(&self) -> Option<SocketAddr> { TcpStream::local_addr(self).ok() }
}
