#![cfg(feature = "metrics")]
//! Tests for `rpcwire` metrics helpers.
//!
//! These tests verify that counters and gauges update as expected using
//! `metrics_util::debugging::DebuggingRecorder`.

use metrics::{SharedString, Unit};
use metrics_util::{
    CompositeKey,
    debugging::{DebugValue, DebuggingRecorder, Snapshotter},
};
use rpcwire::metrics::{CALL_ERRORS, CALLS_SENT, CONNECTION_FAILURES, REPLIES_DROPPED};
use rpcwire_testing::reply_record;
use rstest::rstest;

mod common;
use common::{Harness, PROGRAM, VERSION, eventually};

/// Creates a debugging recorder and snapshotter for metrics testing.
fn debugging_recorder_setup() -> (Snapshotter, DebuggingRecorder) {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    (snapshotter, recorder)
}

/// One snapshot entry; reading a snapshot resets the recorded counters.
type Entry = (CompositeKey, Option<Unit>, Option<SharedString>, DebugValue);

fn counter_value(metrics: &[Entry], name: &str, label: Option<(&str, &str)>) -> u64 {
    metrics
        .iter()
        .filter(|(key, _, _, _)| {
            key.key().name() == name
                && label.is_none_or(|(k, v)| {
                    key.key().labels().any(|l| l.key() == k && l.value() == v)
                })
        })
        .map(|(_, _, _, value)| match value {
            DebugValue::Counter(count) => *count,
            _ => 0,
        })
        .sum()
}

#[rstest]
#[case(1)]
#[case(3)]
fn call_error_counter_is_labelled(#[case] expected: u64) {
    let (snapshotter, recorder) = debugging_recorder_setup();
    metrics::with_local_recorder(&recorder, || {
        (0..expected).for_each(|_| rpcwire::metrics::inc_call_errors("timed_out"));
    });
    let metrics = snapshotter.snapshot().into_vec();
    assert_eq!(
        counter_value(&metrics, CALL_ERRORS, Some(("kind", "timed_out"))),
        expected
    );
}

#[test]
fn connection_traffic_is_recorded() {
    let (snapshotter, recorder) = debugging_recorder_setup();
    metrics::with_local_recorder(&recorder, || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");
        runtime.block_on(async {
            let Harness {
                connection,
                socket,
                peer,
            } = Harness::with_config(rpcwire::ConnectionConfig::default());
            let server = tokio::spawn(async move {
                let call = peer.next_call().await;
                peer.reply_success(call.header.xid, &[]);
            });
            connection
                .call(PROGRAM, VERSION, 0, &[], None)
                .await
                .expect("call succeeds");
            server.await.expect("server task");

            socket.push_bytes(reply_record(12_345, &[]));
            eventually(|| connection.stats().replies_dropped == 1).await;
            socket.push_eof();
            eventually(|| connection.last_error().is_some()).await;
            connection.destroy().await;
        });
    });

    let metrics = snapshotter.snapshot().into_vec();
    assert_eq!(counter_value(&metrics, CALLS_SENT, None), 1);
    assert_eq!(counter_value(&metrics, REPLIES_DROPPED, None), 1);
    assert_eq!(counter_value(&metrics, CONNECTION_FAILURES, None), 1);
}
