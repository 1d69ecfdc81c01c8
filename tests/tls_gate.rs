//! Integration tests for the TLS control task and the receive gate.

use std::{sync::Arc, time::Duration};

use rpcwire::{
    ConnectionConfig,
    Control,
    ControlRecord,
    ReceivePass,
    ReceiveState,
    RpcError,
    TlsError,
    TlsState,
};
use rpcwire_testing::{ScriptedTlsAgent, reply_record};
use rstest::rstest;

mod common;
use common::{Harness, PROGRAM, TestResult, VERSION, eventually, harness};

/// Start TLS and wait for the handshake to finish.
async fn establish(harness: &Harness, agent: &Arc<ScriptedTlsAgent>) -> TestResult {
    harness.connection.control(Control::StartTls(agent.clone()))?;
    agent.release(1);
    eventually(|| harness.connection.tls_state() == TlsState::Established).await;
    Ok(())
}

#[rstest]
#[tokio::test]
async fn calls_wait_for_the_handshake(harness: Harness) -> TestResult {
    let Harness {
        connection,
        socket,
        peer,
    } = harness;
    let agent = Arc::new(ScriptedTlsAgent::gated());
    connection.control(Control::StartTls(agent.clone()))?;
    assert_eq!(connection.receive_state(), ReceiveState::TlsHandshakeInProgress);

    let call = {
        let connection = connection.clone();
        tokio::spawn(async move { connection.call(PROGRAM, VERSION, 0, &[], None).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(socket.sent_bytes().is_empty());

    agent.release(1);
    let request = peer.next_call().await;
    peer.reply_success(request.header.xid, &[1; 4]);
    assert_eq!(&call.await??[..], &[1; 4]);
    assert_eq!(connection.tls_state(), TlsState::Established);
    assert_eq!(agent.handshakes(), 1);
    Ok(())
}

#[rstest]
#[tokio::test]
async fn quiet_handshake_needs_no_drain(harness: Harness) -> TestResult {
    let agent = Arc::new(ScriptedTlsAgent::new());
    establish(&harness, &agent).await?;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(harness.connection.stats().deferred_drains, 0);
    assert_eq!(harness.connection.receive_state(), ReceiveState::Normal);
    Ok(())
}

/// Data refused while the handshake owns the socket is drained once after.
#[rstest]
#[tokio::test]
async fn data_during_handshake_is_drained_once(harness: Harness) -> TestResult {
    let agent = Arc::new(ScriptedTlsAgent::gated());
    harness.connection.control(Control::StartTls(agent.clone()))?;
    harness.socket.push_bytes(reply_record(77, &[]));
    assert_eq!(harness.connection.notify_readable(), ReceivePass::Gated);
    assert_eq!(harness.connection.stats().replies_dropped, 0);

    agent.release(1);
    eventually(|| harness.connection.stats().replies_dropped == 1).await;
    assert_eq!(harness.connection.stats().deferred_drains, 1);
    Ok(())
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn handshake_wait_respects_call_timeout(harness: Harness) -> TestResult {
    let agent = Arc::new(ScriptedTlsAgent::gated());
    harness.connection.control(Control::StartTls(agent))?;
    let result = harness
        .connection
        .call(PROGRAM, VERSION, 0, &[], Some(Duration::from_secs(1)))
        .await;
    assert_eq!(result, Err(RpcError::TimedOut));
    assert!(harness.socket.sent_bytes().is_empty());
    Ok(())
}

/// A reply that arrives while the agent owns the socket is delivered by
/// exactly one deferred drain once the record is resolved.
#[rstest]
#[tokio::test]
async fn reply_during_upcall_is_drained_once(harness: Harness) -> TestResult {
    let agent = Arc::new(ScriptedTlsAgent::gated());
    establish(&harness, &agent).await?;
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

    socket.push_control(ControlRecord::Alert);
    eventually(|| connection.receive_state() == ReceiveState::UpcallInProgress).await;

    socket.push_bytes(reply_record(xid, &[9; 8]));
    assert_eq!(connection.notify_readable(), ReceivePass::Gated);
    assert_eq!(connection.pending_calls(), 1);

    agent.release(1);
    assert_eq!(&call.await??[..], &[9; 8]);
    assert_eq!(connection.receive_state(), ReceiveState::Normal);
    assert_eq!(connection.stats().deferred_drains, 1);
    assert_eq!(agent.records_handled(), 1);
    Ok(())
}

#[rstest]
#[tokio::test]
async fn handshake_record_keeps_gate_for_non_app_data(harness: Harness) -> TestResult {
    let agent = Arc::new(ScriptedTlsAgent::new());
    agent.queue_record(Ok(rpcwire::RecordDisposition::MoreHandshake));
    establish(&harness, &agent).await?;

    harness.socket.push_control(ControlRecord::Handshake);
    eventually(|| harness.connection.receive_state() == ReceiveState::NonAppData).await;
    assert_eq!(agent.records_handled(), 1);

    // Application data still flows through the non-app-data state.
    let Harness {
        connection, peer, ..
    } = harness;
    let server = tokio::spawn(async move {
        let call = peer.next_call().await;
        peer.reply_success(call.header.xid, &[]);
    });
    connection.call(PROGRAM, VERSION, 0, &[], None).await?;
    server.await?;
    Ok(())
}

#[rstest]
#[tokio::test]
async fn failed_record_fails_the_connection(harness: Harness) -> TestResult {
    let agent = Arc::new(ScriptedTlsAgent::new());
    agent.queue_record(Err(TlsError::Record("bad mac".into())));
    establish(&harness, &agent).await?;

    harness.socket.push_control(ControlRecord::Alert);
    eventually(|| harness.connection.last_error().is_some()).await;
    assert_eq!(
        harness.connection.last_error(),
        Some(RpcError::Tls(TlsError::Record("bad mac".into())))
    );
    assert_eq!(harness.connection.receive_state(), ReceiveState::Normal);
    assert!(harness.socket.is_shut_down());
    Ok(())
}

#[rstest]
#[tokio::test]
async fn failed_handshake_fails_the_connection(harness: Harness) -> TestResult {
    let failure = TlsError::Handshake("unknown ca".into());
    let agent = Arc::new(ScriptedTlsAgent::new().failing_handshake(failure.clone()));
    harness.connection.control(Control::StartTls(agent))?;

    eventually(|| harness.connection.last_error().is_some()).await;
    assert_eq!(harness.connection.last_error(), Some(RpcError::Tls(failure)));
    assert_eq!(harness.connection.tls_state(), TlsState::None);
    assert_eq!(harness.connection.receive_state(), ReceiveState::Normal);
    assert!(harness.socket.is_shut_down());
    Ok(())
}

/// Callers held back by a handshake that fails see the failure and never
/// write to the socket.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_handshake_releases_waiting_callers_without_sending() -> TestResult {
    let failure = TlsError::Handshake("unknown ca".into());
    for _ in 0..50 {
        let Harness {
            connection,
            socket,
            ..
        } = Harness::with_config(ConnectionConfig::default());
        let agent = Arc::new(ScriptedTlsAgent::gated().failing_handshake(failure.clone()));
        connection.control(Control::StartTls(agent.clone()))?;

        let calls: Vec<_> = (0..4)
            .map(|procedure| {
                let connection = connection.clone();
                tokio::spawn(async move {
                    connection
                        .call(PROGRAM, VERSION, procedure, &[], Some(Duration::from_secs(5)))
                        .await
                })
            })
            .collect();
        tokio::time::sleep(Duration::from_millis(1)).await;
        agent.release(1);

        for call in calls {
            let result = tokio::time::timeout(Duration::from_secs(1), call).await??;
            assert_eq!(result, Err(RpcError::Tls(failure.clone())));
        }
        assert!(socket.sent_bytes().is_empty());
        assert_eq!(connection.pending_calls(), 0);
        connection.destroy().await;
    }
    Ok(())
}

#[rstest]
#[tokio::test]
async fn second_start_tls_is_refused(harness: Harness) -> TestResult {
    let agent = Arc::new(ScriptedTlsAgent::new());
    establish(&harness, &agent).await?;
    let again = harness.connection.control(Control::StartTls(agent.clone()));
    assert_eq!(again, Err(RpcError::Tls(TlsError::AlreadyStarted)));
    assert_eq!(agent.handshakes(), 1);
    Ok(())
}

#[rstest]
#[tokio::test]
async fn destroy_notifies_the_agent(harness: Harness) -> TestResult {
    let agent = Arc::new(ScriptedTlsAgent::new());
    establish(&harness, &agent).await?;
    let Harness {
        connection, socket, ..
    } = harness;
    connection.destroy().await;
    assert_eq!(agent.disconnects(), 1);
    assert!(socket.is_shut_down());
    Ok(())
}
