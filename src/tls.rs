//! Control plane for connections upgraded to TLS.
//!
//! The record layer itself lives outside this crate. A [`TlsAgent`] performs
//! the handshake and consumes non-application records (alerts, handshake
//! messages) on the connection's behalf. While it does so the receive
//! pipeline is gated, and a dedicated control task per connection
//! serialises the agent's work with the data path.

use std::{
    fmt,
    sync::{Arc, Weak},
};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::{
    connection::{ReceiveEvent, ReceivePass, Shared, TlsWork},
    error::RpcError,
    socket::StreamSocket,
};

/// Failures reported by a [`TlsAgent`] or by the TLS control plane.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TlsError {
    /// The handshake did not complete.
    #[error("handshake failed: {0}")]
    Handshake(String),
    /// A non-application record could not be processed.
    #[error("record layer failure: {0}")]
    Record(String),
    /// The agent could not be reached.
    #[error("tls agent unavailable")]
    AgentUnavailable,
    /// The connection has already been upgraded.
    #[error("tls already started on this connection")]
    AlreadyStarted,
}

/// TLS status of a connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TlsState {
    /// Plain transport.
    #[default]
    None,
    /// The agent is performing the handshake; calls and receives wait.
    HandshakeInProgress,
    /// The session is established.
    Established,
}

/// What the agent reports after consuming a pending control record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordDisposition {
    /// The record was handled; application data may flow again.
    Resolved,
    /// A multi-step exchange continues; further non-application records are
    /// expected.
    MoreHandshake,
}

/// External TLS handshake agent.
///
/// All methods run on the connection's TLS control task, never on a caller's
/// task or the receive pipeline.
#[async_trait]
pub trait TlsAgent: Send + Sync + fmt::Debug + 'static {
    /// Perform the initial handshake over `socket`.
    ///
    /// # Errors
    ///
    /// Returns [`TlsError`] if the session cannot be established.
    async fn handshake(&self, socket: &dyn StreamSocket) -> Result<(), TlsError>;

    /// Consume the non-application record waiting on `socket`.
    ///
    /// # Errors
    ///
    /// Returns [`TlsError`] if the record cannot be processed; the
    /// connection then fails.
    async fn handle_pending_record(
        &self,
        socket: &dyn StreamSocket,
    ) -> Result<RecordDisposition, TlsError>;

    /// Tell the agent an established session is going away.
    ///
    /// # Errors
    ///
    /// Returns [`TlsError`] if the agent could not be notified.
    async fn disconnect_notify(&self, socket: &dyn StreamSocket) -> Result<(), TlsError>;

    /// Transform a framed outbound record into the transport's record
    /// representation. The default passes it through untouched.
    fn wrap_outbound(&self, framed: Bytes) -> Bytes { framed }
}

/// Body of the per-connection TLS control task.
///
/// Holds only a weak reference between iterations so a connection dropped
/// without `close` still lets the task exit.
pub(crate) async fn control_thread(connection: Weak<Shared>, agent: Arc<dyn TlsAgent>) {
    async move {
        if !handshake(&connection, agent.as_ref()).await {
            return;
        }
        while let Some(shared) = connection.upgrade() {
            match shared.next_tls_work() {
                TlsWork::Upcall => service_record(&shared, agent.as_ref()).await,
                TlsWork::Drain => {
                    shared.stats.record_deferred_drain();
                    if shared.receive_pass() == ReceivePass::Busy {
                        shared.request_deferred_drain();
                    }
                }
                TlsWork::Idle => {
                    let interval = shared.config.tls_poll_interval();
                    tokio::select! {
                        () = shared.tls_wake.notified() => {}
                        () = sleep(interval) => {}
                    }
                }
                TlsWork::Exit { established } => {
                    if established {
                        if let Err(error) = agent.disconnect_notify(shared.socket.as_ref()).await {
                            warn!(%error, "tls disconnect notification failed");
                        }
                    }
                    debug!("tls control task exiting");
                    break;
                }
            }
        }
    }
    .instrument(info_span!("rpc.tls"))
    .await;
}

async fn handshake(connection: &Weak<Shared>, agent: &dyn TlsAgent) -> bool {
    let Some(shared) = connection.upgrade() else {
        return false;
    };
    // The agent owns the socket for the handshake; let any running pass end.
    shared.wait_until(|state| state.active_receivers == 0).await;
    match agent.handshake(shared.socket.as_ref()).await {
        Ok(()) => {
            shared.finish_handshake();
            info!("tls session established");
            true
        }
        Err(error) => {
            shared.fail_handshake(error);
            false
        }
    }
}

async fn service_record(shared: &Arc<Shared>, agent: &dyn TlsAgent) {
    match agent.handle_pending_record(shared.socket.as_ref()).await {
        Ok(RecordDisposition::Resolved) => shared.finish_upcall(ReceiveEvent::RecordResolved),
        Ok(RecordDisposition::MoreHandshake) => shared.finish_upcall(ReceiveEvent::MoreHandshake),
        Err(error) => shared.fail_with(RpcError::Tls(error), |state| {
            Shared::apply_event(state, ReceiveEvent::UpcallFailed);
        }),
    }
}
