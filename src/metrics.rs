//! Metric helpers for `rpcwire`.
//!
//! This module defines metric names and thin helpers over the
//! [`metrics`](https://docs.rs/metrics) crate. Without the `metrics` feature
//! the helpers compile to nothing.

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

/// Name of the gauge tracking live connections.
pub const CONNECTIONS_ACTIVE: &str = "rpcwire_connections_active";
/// Name of the counter tracking requests written to sockets.
pub const CALLS_SENT: &str = "rpcwire_calls_sent_total";
/// Name of the counter tracking call outcomes other than success.
pub const CALL_ERRORS: &str = "rpcwire_call_errors_total";
/// Name of the counter tracking replies nobody was waiting for.
pub const REPLIES_DROPPED: &str = "rpcwire_replies_dropped_total";
/// Name of the counter tracking inbound backchannel calls.
pub const BACKCHANNEL_CALLS: &str = "rpcwire_backchannel_calls_total";
/// Name of the counter tracking connection-level failures.
pub const CONNECTION_FAILURES: &str = "rpcwire_connection_failures_total";

/// Increment the live connections gauge.
pub fn inc_connections() {
    #[cfg(feature = "metrics")]
    gauge!(CONNECTIONS_ACTIVE).increment(1.0);
}

/// Decrement the live connections gauge.
pub fn dec_connections() {
    #[cfg(feature = "metrics")]
    gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a request written to the socket.
pub fn inc_calls_sent() {
    #[cfg(feature = "metrics")]
    counter!(CALLS_SENT).increment(1);
}

/// Record a failed call, labelled with a short error kind.
pub fn inc_call_errors(kind: &'static str) {
    #[cfg(feature = "metrics")]
    counter!(CALL_ERRORS, "kind" => kind).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = kind;
}

/// Record a discarded reply.
pub fn inc_replies_dropped() {
    #[cfg(feature = "metrics")]
    counter!(REPLIES_DROPPED).increment(1);
}

/// Record an inbound backchannel call.
pub fn inc_backchannel_calls() {
    #[cfg(feature = "metrics")]
    counter!(BACKCHANNEL_CALLS).increment(1);
}

/// Record a connection-level failure.
pub fn inc_connection_failures() {
    #[cfg(feature = "metrics")]
    counter!(CONNECTION_FAILURES).increment(1);
}
