//! Receive pipeline.
//!
//! A pass drains the socket without blocking, reassembles records and
//! routes each one: replies complete pending calls, calls go to the attached
//! backchannel. At most one pass runs per connection; a concurrent
//! notification is refused and relies on the running pass to keep draining.

use bytes::Bytes;
use tokio_util::codec::Decoder;
use tracing::{debug, debug_span, trace, warn};

use super::{ConnectionState, ReceiveEvent, Shared};
use crate::{
    codec::{Direction, decode_call, message::XID_AND_DIRECTION_LEN, peek_xid_and_direction},
    error::{ReceiveFailure, RpcError},
    registry::Outcome,
    socket::Received,
};

/// Result of one receive pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReceivePass {
    /// The socket had no more data.
    Drained,
    /// Another pass is running.
    Busy,
    /// The TLS control plane owns the socket; the pass is deferred.
    Gated,
    /// A non-application record was found and handed to the TLS task.
    ControlRecord,
    /// The connection failed during this or an earlier pass.
    Failed,
    /// The connection is closed.
    Closed,
}

impl Shared {
    pub(crate) fn receive_pass(&self) -> ReceivePass {
        {
            let mut state = self.lock();
            if state.closed {
                return ReceivePass::Closed;
            }
            if state.last_error.is_some() {
                return ReceivePass::Failed;
            }
            if !state.receive_state.accepts_data() {
                state.deferred_drain = true;
                drop(state);
                self.tls_wake.notify_one();
                return ReceivePass::Gated;
            }
            if state.active_receivers != 0 {
                return ReceivePass::Busy;
            }
            state.active_receivers = 1;
        }
        self.stats.record_receive_pass();

        let outcome = debug_span!("rpc.receive").in_scope(|| self.drain());

        let wake_tls = {
            let mut state = self.lock();
            state.active_receivers = 0;
            state.deferred_drain
        };
        self.notify_state_changed();
        if wake_tls {
            self.tls_wake.notify_one();
        }
        outcome
    }

    fn drain(&self) -> ReceivePass {
        loop {
            let mut state = self.lock();
            if !state.receive_state.accepts_data() {
                // A TLS upgrade closed the gate mid-pass.
                state.deferred_drain = true;
                return ReceivePass::Gated;
            }
            let received = {
                let ConnectionState { raw, .. } = &mut *state;
                self.socket.try_recv(raw)
            };
            let failure = match received {
                Ok(Received::Data(_)) => match self.demultiplex(&mut state) {
                    Ok(()) => continue,
                    Err(failure) => failure,
                },
                Ok(Received::WouldBlock) => return ReceivePass::Drained,
                Ok(Received::Control(kind)) => {
                    debug!(?kind, "control record pending");
                    Self::apply_event(&mut state, ReceiveEvent::ControlRecord);
                    drop(state);
                    self.notify_state_changed();
                    self.tls_wake.notify_one();
                    return ReceivePass::ControlRecord;
                }
                Ok(Received::Closed) => ReceiveFailure::Eof,
                Err(error) => ReceiveFailure::Io(error.kind()),
            };
            drop(state);
            self.fail_connection(RpcError::CantReceive(failure));
            return ReceivePass::Failed;
        }
    }

    /// Route every complete record buffered in `state`.
    fn demultiplex(&self, state: &mut ConnectionState) -> Result<(), ReceiveFailure> {
        loop {
            let record = {
                let ConnectionState { decoder, raw, .. } = &mut *state;
                decoder.decode(raw).map_err(ReceiveFailure::Framing)?
            };
            let Some(record) = record else {
                return Ok(());
            };
            self.dispatch(state, record)?;
        }
    }

    fn dispatch(&self, state: &mut ConnectionState, record: Bytes) -> Result<(), ReceiveFailure> {
        if record.len() < XID_AND_DIRECTION_LEN {
            return Err(ReceiveFailure::ShortMessage { len: record.len() });
        }
        let (xid, direction) = match peek_xid_and_direction(&record) {
            Ok(header) => header,
            Err(error) => {
                warn!(%error, len = record.len(), "discarding record");
                return Ok(());
            }
        };
        trace!(xid, ?direction, len = record.len(), "record received");
        match direction {
            Direction::Reply => {
                if !state.pending.resolve(xid, Outcome::Reply(record)) {
                    debug!(xid, "discarding unmatched reply");
                    self.stats.record_dropped_reply();
                }
            }
            Direction::Call => self.queue_backchannel_call(state, xid, record),
        }
        Ok(())
    }

    fn queue_backchannel_call(&self, state: &mut ConnectionState, xid: u32, record: Bytes) {
        let Some(backchannel) = state.backchannel.as_ref().and_then(|weak| weak.upgrade()) else {
            state.backchannel = None;
            debug!(xid, "no backchannel attached; discarding call");
            return;
        };
        match decode_call(record) {
            Ok(call) => {
                self.stats.record_backchannel_call();
                backchannel.push(call);
            }
            Err(error) => warn!(xid, %error, "discarding malformed backchannel call"),
        }
    }
}
