//! In-memory scripted socket.

use std::{
    collections::VecDeque,
    io,
    net::SocketAddr,
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use rpcwire::{
    ControlRecord,
    Received,
    SendStatus,
    StreamSocket,
    codec::RecordDecoder,
};
use tokio::sync::Notify;
use tokio_util::codec::Decoder;

/// Scripted outcome of one `try_send` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendStep {
    /// Accept at most this many bytes.
    Accept(usize),
    /// Report a full send buffer.
    WouldBlock,
    /// Fail with this error kind.
    Error(io::ErrorKind),
}

#[derive(Debug)]
enum Inbound {
    Bytes(Bytes),
    Control(ControlRecord),
    Eof,
    Error(io::ErrorKind),
}

#[derive(Debug, Default)]
struct State {
    inbound: VecDeque<Inbound>,
    plan: VecDeque<SendStep>,
    stalled: bool,
    sent: BytesMut,
    unread: BytesMut,
    records: RecordDecoder,
    shut_down: bool,
    recv_calls: usize,
}

#[derive(Debug, Default)]
struct Inner {
    state: Mutex<State>,
    inbound_ready: Notify,
    send_ready: Notify,
    sent_ready: Notify,
    peer: Option<SocketAddr>,
    local: Option<SocketAddr>,
}

/// Cloneable handle to an in-memory socket.
///
/// Every clone refers to the same socket, so a test keeps one clone to
/// script the peer while the connection owns another.
#[derive(Clone, Debug, Default)]
pub struct ScriptedSocket {
    inner: Arc<Inner>,
}

impl ScriptedSocket {
    /// A socket with nothing to read that accepts every write.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// A socket reporting the given addresses.
    #[must_use]
    pub fn with_addrs(peer: SocketAddr, local: SocketAddr) -> Self {
        Self {
            inner: Arc::new(Inner {
                peer: Some(peer),
                local: Some(local),
                ..Inner::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> { self.inner.state.lock().expect("socket state") }

    fn push(&self, item: Inbound) {
        self.state().inbound.push_back(item);
        self.inner.inbound_ready.notify_waiters();
    }

    /// Deliver `bytes` on one future read.
    pub fn push_bytes(&self, bytes: impl Into<Bytes>) { self.push(Inbound::Bytes(bytes.into())); }

    /// Deliver each chunk on its own read.
    pub fn push_chunks<I, B>(&self, chunks: I)
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        for chunk in chunks {
            self.push_bytes(chunk);
        }
    }

    /// Surface a non-application record on a future read.
    pub fn push_control(&self, record: ControlRecord) { self.push(Inbound::Control(record)); }

    /// Report an orderly shutdown by the peer once earlier reads are consumed.
    pub fn push_eof(&self) { self.push(Inbound::Eof); }

    /// Fail a future read with `kind`.
    pub fn push_error(&self, kind: io::ErrorKind) { self.push(Inbound::Error(kind)); }

    /// Script the next `try_send` results. Once the plan is exhausted every
    /// send is accepted in full.
    pub fn plan_sends(&self, steps: impl IntoIterator<Item = SendStep>) {
        self.state().plan.extend(steps);
    }

    /// While stalled, sends past the scripted plan report a full buffer and
    /// `writable` never resolves.
    pub fn set_stalled(&self, stalled: bool) {
        self.state().stalled = stalled;
        self.inner.send_ready.notify_waiters();
    }

    /// Every byte the connection has written so far.
    #[must_use]
    pub fn sent_bytes(&self) -> Bytes { Bytes::copy_from_slice(&self.state().sent) }

    /// Wait for the next complete record written by the connection.
    ///
    /// # Panics
    ///
    /// Panics if the connection wrote malformed framing.
    pub async fn next_record(&self) -> Bytes {
        loop {
            let notified = self.inner.sent_ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.state();
                let State {
                    unread, records, ..
                } = &mut *state;
                if let Some(record) = records.decode(unread).expect("valid outbound framing") {
                    return record;
                }
            }
            notified.await;
        }
    }

    /// Whether inbound items are still queued.
    #[must_use]
    pub fn has_unread_input(&self) -> bool { !self.state().inbound.is_empty() }

    /// Whether `shutdown` was called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool { self.state().shut_down }

    /// Number of `try_recv` calls observed.
    #[must_use]
    pub fn recv_calls(&self) -> usize { self.state().recv_calls }

    fn accept(&self, state: &mut State, bytes: &[u8]) {
        state.sent.extend_from_slice(bytes);
        state.unread.extend_from_slice(bytes);
        self.inner.sent_ready.notify_waiters();
    }
}

#[async_trait]
impl StreamSocket for ScriptedSocket {
    fn try_send(&self, buf: &[u8]) -> io::Result<SendStatus> {
        let mut state = self.state();
        if state.shut_down {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        match state.plan.pop_front() {
            Some(SendStep::WouldBlock) => Ok(SendStatus::WouldBlock),
            Some(SendStep::Error(kind)) => Err(kind.into()),
            Some(SendStep::Accept(limit)) => {
                let n = limit.min(buf.len());
                self.accept(&mut state, &buf[..n]);
                Ok(SendStatus::Sent(n))
            }
            None if state.stalled => Ok(SendStatus::WouldBlock),
            None => {
                self.accept(&mut state, buf);
                Ok(SendStatus::Sent(buf.len()))
            }
        }
    }

    fn try_recv(&self, buf: &mut BytesMut) -> io::Result<Received> {
        let mut state = self.state();
        state.recv_calls += 1;
        if state.shut_down {
            Ok(Received::Closed)
        } else {
            match state.inbound.pop_front() {
                Some(Inbound::Bytes(bytes)) => {
                    buf.extend_from_slice(&bytes);
                    Ok(Received::Data(bytes.len()))
                }
                Some(Inbound::Control(record)) => Ok(Received::Control(record)),
                Some(Inbound::Eof) => {
                    state.inbound.push_front(Inbound::Eof);
                    Ok(Received::Closed)
                }
                Some(Inbound::Error(kind)) => Err(kind.into()),
                None => Ok(Received::WouldBlock),
            }
        }
    }

    async fn readable(&self) -> io::Result<()> {
        loop {
            let notified = self.inner.inbound_ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let state = self.state();
                if state.shut_down || !state.inbound.is_empty() {
                    return Ok(());
                }
            }
            notified.await;
        }
    }

    async fn writable(&self) -> io::Result<()> {
        loop {
            let notified = self.inner.send_ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            let stalled = self.state().stalled;
            if !stalled {
                return Ok(());
            }
            notified.await;
        }
    }

    fn shutdown(&self) -> io::Result<()> {
        self.state().shut_down = true;
        self.inner.inbound_ready.notify_waiters();
        self.inner.send_ready.notify_waiters();
        Ok(())
    }

    fn peer_addr(&self) -> Option<SocketAddr> { self.inner.peer }

    fn local_addr(&self) -> Option<SocketAddr> { self.inner.local }
}
