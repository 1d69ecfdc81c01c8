//! Per-connection counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of a connection's counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Receive passes that drained the socket.
    pub receive_passes: u64,
    /// Receive passes re-driven by the TLS control task.
    pub deferred_drains: u64,
    /// Replies discarded because no call was waiting for their xid.
    pub replies_dropped: u64,
    /// Inbound calls queued on the backchannel.
    pub backchannel_calls: u64,
    /// Requests written to the socket.
    pub calls_sent: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    receive_passes: AtomicU64,
    deferred_drains: AtomicU64,
    replies_dropped: AtomicU64,
    backchannel_calls: AtomicU64,
    calls_sent: AtomicU64,
}

// Counters are independent; relaxed ordering is enough for a snapshot.
impl StatsCounters {
    pub(crate) fn record_receive_pass(&self) {
        self.receive_passes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_deferred_drain(&self) {
        self.deferred_drains.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped_reply(&self) {
        self.replies_dropped.fetch_add(1, Ordering::Relaxed);
        crate::metrics::inc_replies_dropped();
    }

    pub(crate) fn record_backchannel_call(&self) {
        self.backchannel_calls.fetch_add(1, Ordering::Relaxed);
        crate::metrics::inc_backchannel_calls();
    }

    pub(crate) fn record_call_sent(&self) {
        self.calls_sent.fetch_add(1, Ordering::Relaxed);
        crate::metrics::inc_calls_sent();
    }

    pub(crate) fn snapshot(&self) -> ConnectionStats {
        ConnectionStats {
            receive_passes: self.receive_passes.load(Ordering::Relaxed),
            deferred_drains: self.deferred_drains.load(Ordering::Relaxed),
            replies_dropped: self.replies_dropped.load(Ordering::Relaxed),
            backchannel_calls: self.backchannel_calls.load(Ordering::Relaxed),
            calls_sent: self.calls_sent.load(Ordering::Relaxed),
        }
    }
}
