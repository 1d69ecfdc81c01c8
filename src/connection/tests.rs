//! Unit tests for connection state handling that need crate internals.

use std::{
    collections::VecDeque,
    io,
    net::SocketAddr,
    sync::{
        Arc,
        Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use rstest::{fixture, rstest};
use tracing_test::traced_test;

use super::{Connection, ReceivePass, ReceiveState, initial_xid};
use crate::{
    codec::{ReplyBody, encode_reply, frame},
    socket::{Received, SendStatus, StreamSocket},
};

/// Socket that accepts every write and yields queued reads only when a
/// test drives the receive pass itself.
#[derive(Default)]
struct QueueSocket {
    inbound: Mutex<VecDeque<Bytes>>,
}

impl QueueSocket {
    fn push(&self, bytes: Bytes) { self.inbound.lock().expect("queue").push_back(bytes); }
}

#[async_trait]
impl StreamSocket for QueueSocket {
    fn try_send(&self, buf: &[u8]) -> io::Result<SendStatus> { Ok(SendStatus::Sent(buf.len())) }

    fn try_recv(&self, buf: &mut BytesMut) -> io::Result<Received> {
        match self.inbound.lock().expect("queue").pop_front() {
            Some(bytes) => {
                buf.extend_from_slice(&bytes);
                Ok(Received::Data(bytes.len()))
            }
            None => Ok(Received::WouldBlock),
        }
    }

    async fn readable(&self) -> io::Result<()> { std::future::pending().await }

    async fn writable(&self) -> io::Result<()> { Ok(()) }

    fn shutdown(&self) -> io::Result<()> { Ok(()) }

    fn peer_addr(&self) -> Option<SocketAddr> { None }

    fn local_addr(&self) -> Option<SocketAddr> { None }
}

/// Socket readable once, until its first `try_recv`; counts readiness
/// polls.
#[derive(Default)]
struct OnceReadable {
    ready: AtomicBool,
    polls: AtomicUsize,
}

#[async_trait]
impl StreamSocket for OnceReadable {
    fn try_send(&self, buf: &[u8]) -> io::Result<SendStatus> { Ok(SendStatus::Sent(buf.len())) }

    fn try_recv(&self, _buf: &mut BytesMut) -> io::Result<Received> {
        self.ready.store(false, Ordering::SeqCst);
        Ok(Received::WouldBlock)
    }

    async fn readable(&self) -> io::Result<()> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        if self.ready.load(Ordering::SeqCst) {
            Ok(())
        } else {
            std::future::pending().await
        }
    }

    async fn writable(&self) -> io::Result<()> { Ok(()) }

    fn shutdown(&self) -> io::Result<()> { Ok(()) }

    fn peer_addr(&self) -> Option<SocketAddr> { None }

    fn local_addr(&self) -> Option<SocketAddr> { None }
}

#[fixture]
fn socket() -> Arc<QueueSocket> { Arc::new(QueueSocket::default()) }

fn connect(socket: &Arc<QueueSocket>) -> Connection {
    Connection::builder(1, 1).build_shared(socket.clone(), None)
}

#[test]
fn initial_xids_differ_between_connections() {
    assert_ne!(initial_xid(), initial_xid());
}

#[rstest]
#[tokio::test]
async fn overlapping_pass_is_refused(socket: Arc<QueueSocket>) {
    let connection = connect(&socket);
    connection.shared.lock().active_receivers = 1;
    assert_eq!(connection.notify_readable(), ReceivePass::Busy);
    assert_eq!(connection.stats().receive_passes, 0);

    connection.shared.lock().active_receivers = 0;
    assert_eq!(connection.notify_readable(), ReceivePass::Drained);
    assert_eq!(connection.stats().receive_passes, 1);
}

#[tokio::test]
async fn busy_readiness_waits_for_the_running_pass() {
    let socket = Arc::new(OnceReadable::default());
    socket.ready.store(true, Ordering::SeqCst);
    let connection = Connection::builder(1, 1).build_shared(socket.clone(), None);
    connection.shared.lock().active_receivers = 1;

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(socket.polls.load(Ordering::SeqCst), 1);
    assert_eq!(connection.stats().receive_passes, 0);

    connection.shared.lock().active_receivers = 0;
    connection.shared.notify_state_changed();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(connection.stats().receive_passes, 1);
    // One poll for the pass, one that now waits for new data.
    assert_eq!(socket.polls.load(Ordering::SeqCst), 3);
}

#[rstest]
#[tokio::test]
async fn gated_pass_is_deferred(socket: Arc<QueueSocket>) {
    let connection = connect(&socket);
    connection.shared.lock().receive_state = ReceiveState::UpcallNeeded;
    assert_eq!(connection.notify_readable(), ReceivePass::Gated);

    let state = connection.shared.lock();
    assert!(state.deferred_drain);
    assert_eq!(state.active_receivers, 0);
}

#[rstest]
#[tokio::test]
async fn close_is_idempotent(socket: Arc<QueueSocket>) {
    let connection = connect(&socket);
    let other = connection.clone();
    tokio::join!(connection.close(), other.close());
    assert!(connection.is_closed());
    assert_eq!(connection.notify_readable(), ReceivePass::Closed);
    assert_eq!(connection.shared.lock().in_flight, 0);
}

#[rstest]
#[traced_test]
#[tokio::test]
async fn unmatched_reply_is_logged(socket: Arc<QueueSocket>) {
    let connection = connect(&socket);
    let reply = encode_reply(99, &ReplyBody::success(Bytes::new()));
    socket.push(frame(&reply).expect("reply fits in one fragment"));
    assert_eq!(connection.notify_readable(), ReceivePass::Drained);
    assert_eq!(connection.stats().replies_dropped, 1);

    logs_assert(|lines: &[&str]| {
        lines
            .iter()
            .find(|line| line.contains("discarding unmatched reply") && line.contains("xid=99"))
            .map(|_| ())
            .ok_or_else(|| format!("unmatched reply not logged in:\n{}", lines.join("\n")))
    });
}

#[rstest]
#[traced_test]
#[tokio::test]
async fn fatal_record_is_logged_once(socket: Arc<QueueSocket>) {
    let connection = connect(&socket);
    socket.push(frame(&[0, 0, 0, 1]).expect("record fits in one fragment"));
    assert_eq!(connection.notify_readable(), ReceivePass::Failed);
    assert_eq!(connection.notify_readable(), ReceivePass::Failed);

    logs_assert(|lines: &[&str]| {
        match lines
            .iter()
            .filter(|line| line.contains("connection failed"))
            .count()
        {
            1 => Ok(()),
            n => Err(format!("expected one failure line, found {n}")),
        }
    });
}
