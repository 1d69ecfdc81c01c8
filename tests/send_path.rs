//! Integration tests for writing records under socket back-pressure.

use std::{io, time::Duration};

use rpcwire::{ConnectionConfig, RpcError, SendFailure};
use rpcwire_testing::SendStep;
use rstest::rstest;

mod common;
use common::{Harness, PROGRAM, TestResult, VERSION, harness};

fn budget(budget: Duration) -> Harness {
    Harness::with_config(ConnectionConfig::default().with_send_retry_budget(budget))
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn short_writes_send_each_byte_once(harness: Harness) -> TestResult {
    let Harness {
        connection,
        socket,
        peer,
    } = harness;
    socket.plan_sends([
        SendStep::WouldBlock,
        SendStep::Accept(3),
        SendStep::Accept(0),
        SendStep::Accept(10),
        SendStep::WouldBlock,
    ]);
    let args = [0xab; 32];
    let server = tokio::spawn(async move {
        let call = peer.next_call().await;
        peer.reply_success(call.header.xid, &[]);
        call
    });
    connection.call(PROGRAM, VERSION, 6, &args, None).await?;
    let call = server.await?;
    assert_eq!(&call.args[..], &args);
    // Marker, 40-byte header with empty credentials, arguments.
    assert_eq!(socket.sent_bytes().len(), 4 + 40 + args.len());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn stalled_socket_exhausts_retry_budget() {
    let harness = budget(Duration::from_secs(2));
    harness.socket.set_stalled(true);
    let result = harness.connection.call(PROGRAM, VERSION, 0, &[], None).await;
    assert_eq!(
        result,
        Err(RpcError::CantSend(SendFailure::RetryBudgetExhausted))
    );
    // Nothing reached the wire, so the connection survives.
    assert!(harness.connection.last_error().is_none());
    assert_eq!(harness.connection.pending_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn zero_budget_on_full_socket_times_out() {
    let harness = budget(Duration::ZERO);
    harness.socket.set_stalled(true);
    let result = harness.connection.call(PROGRAM, VERSION, 0, &[], None).await;
    assert_eq!(result, Err(RpcError::TimedOut));
    assert!(harness.connection.last_error().is_none());
}

#[tokio::test(start_paused = true)]
async fn partial_record_then_stall_fails_connection() {
    let harness = budget(Duration::from_secs(1));
    harness.socket.plan_sends([SendStep::Accept(10)]);
    harness.socket.set_stalled(true);
    let result = harness.connection.call(PROGRAM, VERSION, 0, &[], None).await;
    let expected = RpcError::CantSend(SendFailure::RetryBudgetExhausted);
    assert_eq!(result, Err(expected.clone()));
    assert_eq!(harness.connection.last_error(), Some(expected));
    assert!(harness.socket.is_shut_down());
}

#[rstest]
#[case(&[SendStep::Error(io::ErrorKind::BrokenPipe)], false)]
#[case(&[SendStep::Accept(8), SendStep::Error(io::ErrorKind::BrokenPipe)], true)]
#[tokio::test]
async fn socket_error_while_sending(
    harness: Harness,
    #[case] plan: &'static [SendStep],
    #[case] fatal: bool,
) {
    harness.socket.plan_sends(plan.iter().copied());
    let result = harness.connection.call(PROGRAM, VERSION, 0, &[], None).await;
    let expected = RpcError::CantSend(SendFailure::Io(io::ErrorKind::BrokenPipe));
    assert_eq!(result, Err(expected.clone()));
    assert_eq!(harness.connection.last_error(), fatal.then_some(expected));
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn concurrent_senders_do_not_interleave(harness: Harness) -> TestResult {
    let Harness {
        connection,
        socket,
        peer,
    } = harness;
    socket.plan_sends((0..40).map(|i| {
        if i % 2 == 0 {
            SendStep::Accept(7)
        } else {
            SendStep::WouldBlock
        }
    }));
    let calls: Vec<_> = (0..3_u8)
        .map(|tag| {
            let connection = connection.clone();
            tokio::spawn(async move {
                connection
                    .call(PROGRAM, VERSION, u32::from(tag), &[tag; 12], None)
                    .await
            })
        })
        .collect();
    for _ in 0..3 {
        let call = peer.next_call().await;
        let tag = u8::try_from(call.header.procedure)?;
        assert_eq!(&call.args[..], &[tag; 12]);
        peer.reply_success(call.header.xid, &[]);
    }
    for call in calls {
        call.await??;
    }
    Ok(())
}
