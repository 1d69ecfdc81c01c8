//! Integration tests for record reassembly and reply demultiplexing.

use std::{
    io,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::BytesMut;
use rpcwire::{
    Connection,
    ConnectionConfig,
    ReceiveFailure,
    ReceivePass,
    Received,
    RpcError,
    SendStatus,
    StreamSocket,
    codec::{FramingError, RecordMarker, ReplyBody, encode_reply},
};
use rpcwire_testing::{ScriptedPeer, ScriptedSocket, fragmented, framed, reply_record};
use rstest::rstest;

mod common;
use common::{Harness, PROGRAM, TestResult, VERSION, eventually, harness};

#[rstest]
#[tokio::test]
async fn record_split_across_reads_is_reassembled(harness: Harness) -> TestResult {
    let Harness {
        connection,
        socket,
        peer,
    } = harness;
    let call = {
        let connection = connection.clone();
        tokio::spawn(async move { connection.call(PROGRAM, VERSION, 0, &[], None).await })
    };
    let xid = peer.next_call().await.header.xid;

    let record = reply_record(xid, &[7; 72]);
    assert_eq!(record.len(), 100);
    socket.push_chunks([record.slice(..10), record.slice(10..60), record.slice(60..)]);

    let results = call.await??;
    assert_eq!(&results[..], &[7; 72]);
    Ok(())
}

#[rstest]
#[tokio::test]
async fn multi_fragment_record_is_joined(harness: Harness) -> TestResult {
    let Harness {
        connection,
        socket,
        peer,
    } = harness;
    let call = {
        let connection = connection.clone();
        tokio::spawn(async move { connection.call(PROGRAM, VERSION, 0, &[], None).await })
    };
    let xid = peer.next_call().await.header.xid;

    let message = encode_reply(xid, &ReplyBody::success(vec![3; 16]));
    socket.push_bytes(fragmented(&message, &[12, 0, 20, 8]));

    assert_eq!(&call.await??[..], &[3; 16]);
    Ok(())
}

#[rstest]
#[tokio::test]
async fn replies_in_one_read_reach_their_callers(harness: Harness) -> TestResult {
    let Harness {
        connection,
        socket,
        peer,
    } = harness;
    let first = {
        let connection = connection.clone();
        tokio::spawn(async move { connection.call(PROGRAM, VERSION, 1, &[], None).await })
    };
    let a = peer.next_call().await.header.xid;
    let second = {
        let connection = connection.clone();
        tokio::spawn(async move { connection.call(PROGRAM, VERSION, 2, &[], None).await })
    };
    let b = peer.next_call().await.header.xid;

    let mut both = reply_record(b, &[2; 4]).to_vec();
    both.extend_from_slice(&reply_record(a, &[1; 4]));
    socket.push_bytes(both);

    assert_eq!(&first.await??[..], &[1; 4]);
    assert_eq!(&second.await??[..], &[2; 4]);
    Ok(())
}

#[rstest]
#[tokio::test]
async fn unmatched_reply_is_counted_and_dropped(harness: Harness) -> TestResult {
    let Harness {
        connection,
        socket,
        peer,
    } = harness;
    socket.push_bytes(reply_record(99, &[0; 8]));
    eventually(|| connection.stats().replies_dropped == 1).await;
    assert!(connection.last_error().is_none());

    // The stream stays aligned for the next exchange.
    let server = tokio::spawn(async move {
        let call = peer.next_call().await;
        peer.reply_success(call.header.xid, &[5; 4]);
    });
    let results = connection.call(PROGRAM, VERSION, 0, &[], None).await?;
    server.await?;
    assert_eq!(&results[..], &[5; 4]);
    Ok(())
}

#[rstest]
#[tokio::test]
async fn unknown_direction_is_discarded(harness: Harness) {
    harness
        .socket
        .push_bytes(framed(&[0, 0, 0, 5, 0, 0, 0, 7]));
    eventually(|| !harness.socket.has_unread_input()).await;
    assert!(harness.connection.last_error().is_none());
    assert_eq!(harness.connection.notify_readable(), ReceivePass::Drained);
}

/// Issue a call, inject a fault once the request is on the wire and check
/// that the fault fails the call and the connection.
async fn pending_call_fails_with(
    harness: Harness,
    inject: impl FnOnce(&ScriptedSocket),
    expected: RpcError,
) -> TestResult {
    let Harness {
        connection,
        socket,
        peer,
    } = harness;
    let call = {
        let connection = connection.clone();
        tokio::spawn(async move { connection.call(PROGRAM, VERSION, 0, &[], None).await })
    };
    peer.next_call().await;
    inject(&socket);
    assert_eq!(call.await?, Err(expected.clone()));
    assert_eq!(connection.last_error(), Some(expected));
    assert!(socket.is_shut_down());
    assert_eq!(connection.pending_calls(), 0);
    Ok(())
}

#[rstest]
#[tokio::test]
async fn short_record_is_fatal(harness: Harness) -> TestResult {
    pending_call_fails_with(
        harness,
        |socket| socket.push_bytes(framed(&[0, 0, 0, 1])),
        RpcError::CantReceive(ReceiveFailure::ShortMessage { len: 4 }),
    )
    .await
}

#[rstest]
#[tokio::test]
async fn peer_eof_fails_pending_calls(harness: Harness) -> TestResult {
    pending_call_fails_with(
        harness,
        ScriptedSocket::push_eof,
        RpcError::CantReceive(ReceiveFailure::Eof),
    )
    .await
}

#[rstest]
#[tokio::test]
async fn socket_error_fails_pending_calls(harness: Harness) -> TestResult {
    pending_call_fails_with(
        harness,
        |socket| socket.push_error(io::ErrorKind::ConnectionReset),
        RpcError::CantReceive(ReceiveFailure::Io(io::ErrorKind::ConnectionReset)),
    )
    .await
}

#[tokio::test]
async fn oversized_record_is_fatal() -> TestResult {
    let marker = RecordMarker::new(true, 2000)?.to_bytes();
    pending_call_fails_with(
        Harness::with_config(ConnectionConfig::default().with_max_record_size(1024)),
        |socket| socket.push_bytes(marker.to_vec()),
        RpcError::CantReceive(ReceiveFailure::Framing(FramingError::OversizedRecord {
            size: 2000,
            max: 1024,
        })),
    )
    .await
}

/// Socket counting `try_recv` calls that begin while another is running.
#[derive(Debug)]
struct OverlapDetector {
    inner: ScriptedSocket,
    active: AtomicUsize,
    overlaps: AtomicUsize,
}

impl OverlapDetector {
    fn new(inner: ScriptedSocket) -> Self {
        Self {
            inner,
            active: AtomicUsize::new(0),
            overlaps: AtomicUsize::new(0),
        }
    }

    fn overlaps(&self) -> usize { self.overlaps.load(Ordering::SeqCst) }
}

#[async_trait]
impl StreamSocket for OverlapDetector {
    fn try_send(&self, buf: &[u8]) -> io::Result<SendStatus> { self.inner.try_send(buf) }

    fn try_recv(&self, buf: &mut BytesMut) -> io::Result<Received> {
        if self.active.fetch_add(1, Ordering::SeqCst) != 0 {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        // Widen the window in which a second receiver could enter.
        std::thread::yield_now();
        let received = self.inner.try_recv(buf);
        self.active.fetch_sub(1, Ordering::SeqCst);
        received
    }

    async fn readable(&self) -> io::Result<()> { self.inner.readable().await }

    async fn writable(&self) -> io::Result<()> { self.inner.writable().await }

    fn shutdown(&self) -> io::Result<()> { self.inner.shutdown() }

    fn peer_addr(&self) -> Option<SocketAddr> { self.inner.peer_addr() }

    fn local_addr(&self) -> Option<SocketAddr> { self.inner.local_addr() }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_notifications_deliver_every_reply() -> TestResult {
    let socket = ScriptedSocket::new();
    let detector = Arc::new(OverlapDetector::new(socket.clone()));
    let connection = Connection::builder(PROGRAM, VERSION).build_shared(detector.clone(), None);
    let peer = ScriptedPeer::new(socket.clone());
    let calls: Vec<_> = (0..16_u32)
        .map(|procedure| {
            let connection = connection.clone();
            tokio::spawn(async move {
                connection
                    .call(PROGRAM, VERSION, procedure, &[], Some(Duration::from_secs(5)))
                    .await
                    .map(|results| (procedure, results))
            })
        })
        .collect();
    let mut inbound = Vec::new();
    for _ in 0..16 {
        inbound.push(peer.next_call().await);
    }

    let notifiers: Vec<_> = (0..4)
        .map(|_| {
            let connection = connection.clone();
            tokio::task::spawn_blocking(move || {
                for _ in 0..64 {
                    let pass = connection.notify_readable();
                    assert_ne!(pass, ReceivePass::Failed);
                }
            })
        })
        .collect();
    for call in &inbound {
        socket.push_bytes(reply_record(
            call.header.xid,
            &call.header.procedure.to_be_bytes(),
        ));
    }
    for notifier in notifiers {
        notifier.await?;
    }
    for call in calls {
        let (procedure, results) = call.await??;
        assert_eq!(&results[..], &procedure.to_be_bytes());
    }
    assert_eq!(connection.stats().replies_dropped, 0);
    assert_eq!(detector.overlaps(), 0);
    Ok(())
}
