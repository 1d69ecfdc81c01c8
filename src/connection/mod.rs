//! Connection-oriented RPC client transport.
//!
//! A [`Connection`] turns one [`StreamSocket`] into a full-duplex RPC
//! channel. Many tasks may [`call`](Connection::call) concurrently; their
//! requests are serialised onto the socket and their replies demultiplexed
//! by xid. A readiness task drives the receive pipeline, and a TLS control
//! task (once [`Control::StartTls`] is issued) owns the socket whenever the
//! external agent needs it.
//!
//! All mutable per-connection state sits behind one mutex. Socket sends and
//! agent calls never run while it is held.

mod builder;
mod call;
mod control;
mod receive;
mod shutdown;
mod state;
mod stats;
mod upcall;

use std::{
    fmt,
    net::SocketAddr,
    sync::{
        Arc,
        Mutex,
        MutexGuard,
        PoisonError,
        Weak,
        atomic::{AtomicU32, Ordering},
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

pub use builder::ConnectionBuilder;
use bytes::BytesMut;
pub use call::CallArgs;
pub use control::{Control, ControlValue};
pub use receive::ReceivePass;
pub use state::{InvalidTransition, ReceiveEvent, ReceiveState};
pub use stats::ConnectionStats;
use stats::StatsCounters;
use tokio::{sync::Notify, task::JoinHandle};
use tracing::warn;
pub use upcall::UpcallRegistration;

use crate::{
    auth::Auth,
    backchannel::Backchannel,
    codec::RecordDecoder,
    config::ConnectionConfig,
    error::RpcError,
    registry::PendingCalls,
    socket::StreamSocket,
    tls::{TlsAgent, TlsError, TlsState},
};

/// Handle to a connection.
///
/// Clones share the same connection. [`close`](Self::close) fails every
/// pending call and stops the receive pipeline;
/// [`destroy`](Self::destroy) additionally joins the TLS control task and
/// shuts the socket down.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

/// Mutable state guarded by the connection mutex.
pub(crate) struct ConnectionState {
    pub(crate) pending: PendingCalls,
    pub(crate) decoder: RecordDecoder,
    pub(crate) raw: BytesMut,
    pub(crate) receive_state: ReceiveState,
    /// A readiness notification was refused and must be replayed.
    pub(crate) deferred_drain: bool,
    pub(crate) tls_state: TlsState,
    pub(crate) tls_agent: Option<Arc<dyn TlsAgent>>,
    pub(crate) active_receivers: u32,
    pub(crate) in_flight: usize,
    pub(crate) closing: bool,
    pub(crate) closed: bool,
    pub(crate) next_xid: u32,
    pub(crate) last_xid: u32,
    pub(crate) backchannel: Option<Weak<Backchannel>>,
    pub(crate) last_error: Option<RpcError>,
    pub(crate) timeout: Duration,
    pub(crate) program: u32,
    pub(crate) version: u32,
    pub(crate) interruptible: bool,
    pub(crate) peer_addr: Option<SocketAddr>,
    pub(crate) auth: Arc<dyn Auth>,
}

/// State shared by every handle, the readiness task and the TLS task.
pub(crate) struct Shared {
    pub(crate) socket: Arc<dyn StreamSocket>,
    pub(crate) config: ConnectionConfig,
    state: Mutex<ConnectionState>,
    /// Held for the whole transmission of one record.
    send_lock: tokio::sync::Mutex<()>,
    /// Woken on any change callers or the closer may be waiting for.
    state_changed: Notify,
    pub(crate) tls_wake: Notify,
    pub(crate) stats: StatsCounters,
    upcall: Mutex<Option<UpcallRegistration>>,
    tls_task: Mutex<Option<JoinHandle<()>>>,
}

/// Next step for the TLS control task.
pub(crate) enum TlsWork {
    Upcall,
    Drain,
    Idle,
    Exit { established: bool },
}

/// Pick a starting xid unlikely to collide with other connections.
fn initial_xid() -> u32 {
    static SEQUENCE: AtomicU32 = AtomicU32::new(0);
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    #[expect(
        clippy::cast_possible_truncation,
        reason = "only the low bits of the clock seed the xid"
    )]
    let seconds = now.as_secs() as u32;
    let sequence = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    seconds ^ now.subsec_micros() ^ sequence.wrapping_mul(0x9e37_79b9)
}

impl Connection {
    /// Create a connection over `socket` with default configuration.
    ///
    /// Must be called from within a Tokio runtime; the readiness task is
    /// spawned immediately.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use rpcwire::Connection;
    /// use tokio::net::TcpStream;
    ///
    /// # #[tokio::main]
    /// # async fn main() -> std::io::Result<()> {
    /// let stream = TcpStream::connect("127.0.0.1:2049").await?;
    /// let peer = stream.peer_addr().ok();
    /// let connection = Connection::create(stream, peer, 100_003, 3, 65_536, 65_536);
    /// connection.close().await;
    /// # Ok(())
    /// # }
    /// ```
    pub fn create<S: StreamSocket>(
        socket: S,
        peer_addr: Option<SocketAddr>,
        program: u32,
        version: u32,
        send_size_hint: usize,
        recv_size_hint: usize,
    ) -> Self {
        ConnectionBuilder::new(program, version)
            .config(ConnectionConfig::default().with_size_hints(send_size_hint, recv_size_hint))
            .build(socket, peer_addr)
    }

    /// Start configuring a connection for `program`/`version`.
    #[must_use]
    pub fn builder(program: u32, version: u32) -> ConnectionBuilder {
        ConnectionBuilder::new(program, version)
    }

    pub(crate) fn from_parts(
        socket: Arc<dyn StreamSocket>,
        peer_addr: Option<SocketAddr>,
        program: u32,
        version: u32,
        config: ConnectionConfig,
        auth: Arc<dyn Auth>,
    ) -> Self {
        let state = ConnectionState {
            pending: PendingCalls::new(),
            decoder: RecordDecoder::new(config.max_record_size()),
            raw: BytesMut::with_capacity(config.recv_size_hint()),
            receive_state: ReceiveState::Normal,
            deferred_drain: false,
            tls_state: TlsState::None,
            tls_agent: None,
            active_receivers: 0,
            in_flight: 0,
            closing: false,
            closed: false,
            next_xid: initial_xid(),
            last_xid: 0,
            backchannel: None,
            last_error: None,
            timeout: config.default_timeout(),
            program,
            version,
            interruptible: config.interruptible(),
            peer_addr: peer_addr.or_else(|| socket.peer_addr()),
            auth,
        };
        let shared = Arc::new(Shared {
            socket,
            config,
            state: Mutex::new(state),
            send_lock: tokio::sync::Mutex::new(()),
            state_changed: Notify::new(),
            tls_wake: Notify::new(),
            stats: StatsCounters::default(),
            upcall: Mutex::new(None),
            tls_task: Mutex::new(None),
        });
        let registration = UpcallRegistration::register(&shared);
        *lock_slot(&shared.upcall) = Some(registration);
        crate::metrics::inc_connections();
        Self { shared }
    }

    /// Counters accumulated since the connection was created.
    #[must_use]
    pub fn stats(&self) -> ConnectionStats { self.shared.stats.snapshot() }

    /// Most recent connection-level error, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<RpcError> { self.shared.lock().last_error.clone() }

    /// Current TLS status.
    #[must_use]
    pub fn tls_state(&self) -> TlsState { self.shared.lock().tls_state }

    /// Current receive gate.
    #[must_use]
    pub fn receive_state(&self) -> ReceiveState { self.shared.lock().receive_state }

    /// Number of calls waiting for a reply.
    #[must_use]
    pub fn pending_calls(&self) -> usize { self.shared.lock().pending.len() }

    /// Whether [`close`](Self::close) has completed.
    #[must_use]
    pub fn is_closed(&self) -> bool { self.shared.lock().closed }

    /// Replace the credential provider used for subsequent calls.
    pub fn set_auth(&self, auth: Arc<dyn Auth>) { self.shared.lock().auth = auth; }

    /// Run one receive pass now, as a socket readiness callback would.
    ///
    /// The readiness task calls this whenever the socket becomes readable;
    /// it is exposed for transports that deliver readiness out of band.
    pub fn notify_readable(&self) -> ReceivePass { self.shared.receive_pass() }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("Connection")
            .field("peer_addr", &state.peer_addr)
            .field("program", &state.program)
            .field("version", &state.version)
            .field("pending", &state.pending.len())
            .field("receive_state", &state.receive_state)
            .field("tls_state", &state.tls_state)
            .field("closed", &state.closed)
            .finish_non_exhaustive()
    }
}

fn lock_slot<T>(slot: &Mutex<T>) -> MutexGuard<'_, T> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    pub(crate) fn lock(&self) -> MutexGuard<'_, ConnectionState> { lock_slot(&self.state) }

    /// Wait until `condition` holds for the connection state.
    pub(crate) async fn wait_until(&self, mut condition: impl FnMut(&ConnectionState) -> bool) {
        loop {
            let notified = self.state_changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            let done = condition(&self.lock());
            if done {
                return;
            }
            notified.await;
        }
    }

    pub(crate) fn notify_state_changed(&self) { self.state_changed.notify_waiters(); }

    /// Apply a receive gate event; an impossible event is logged and ignored.
    pub(crate) fn apply_event(state: &mut ConnectionState, event: ReceiveEvent) {
        match state.receive_state.transition(event) {
            Ok(next) => state.receive_state = next,
            Err(error) => warn!(%error, "receive gate unchanged"),
        }
    }

    /// Fail every pending call with `error` and stop using the socket.
    pub(crate) fn fail_connection(&self, error: RpcError) { self.fail_with(error, |_| {}); }

    /// Fail the connection and apply `settle` to its state under the same
    /// lock, so no caller observes the settled state before the failure.
    pub(crate) fn fail_with(&self, error: RpcError, settle: impl FnOnce(&mut ConnectionState)) {
        let failed = {
            let mut state = self.lock();
            state.last_error = Some(error.clone());
            state.decoder.reset();
            state.raw.clear();
            settle(&mut state);
            state.pending.fail_all(&error)
        };
        warn!(%error, failed, "connection failed");
        crate::metrics::inc_connection_failures();
        if let Err(e) = self.socket.shutdown() {
            tracing::debug!(error = %e, "socket shutdown after failure");
        }
        self.notify_state_changed();
    }

    pub(crate) fn request_deferred_drain(&self) {
        self.lock().deferred_drain = true;
        self.tls_wake.notify_one();
    }

    pub(crate) fn next_tls_work(&self) -> TlsWork {
        let mut state = self.lock();
        if state.closed {
            return TlsWork::Exit {
                established: state.tls_state == TlsState::Established,
            };
        }
        if state.receive_state == ReceiveState::UpcallNeeded {
            Self::apply_event(&mut state, ReceiveEvent::UpcallStarted);
            return TlsWork::Upcall;
        }
        if state.deferred_drain && state.receive_state.accepts_data() {
            state.deferred_drain = false;
            return TlsWork::Drain;
        }
        TlsWork::Idle
    }

    /// Reopen the gate after a successful handshake. A pass refused while
    /// the gate was closed left `deferred_drain` set for the TLS task.
    pub(crate) fn finish_handshake(&self) {
        {
            let mut state = self.lock();
            state.tls_state = TlsState::Established;
            Self::apply_event(&mut state, ReceiveEvent::HandshakeFinished);
        }
        self.notify_state_changed();
    }

    /// Fail the connection with the handshake error before any waiting
    /// caller can see the gate reopen.
    pub(crate) fn fail_handshake(&self, error: TlsError) {
        self.fail_with(RpcError::Tls(error), |state| {
            state.tls_state = TlsState::None;
            Self::apply_event(state, ReceiveEvent::HandshakeFinished);
        });
    }

    pub(crate) fn finish_upcall(&self, event: ReceiveEvent) {
        {
            let mut state = self.lock();
            Self::apply_event(&mut state, event);
        }
        self.notify_state_changed();
    }

    fn set_tls_task(&self, task: JoinHandle<()>) { *lock_slot(&self.tls_task) = Some(task); }

    fn take_tls_task(&self) -> Option<JoinHandle<()>> { lock_slot(&self.tls_task).take() }

    fn take_upcall(&self) -> Option<UpcallRegistration> { lock_slot(&self.upcall).take() }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let state = self
            .state
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(backchannel) = state.backchannel.take().and_then(|weak| weak.upgrade()) {
            backchannel.detach();
        }
        crate::metrics::dec_connections();
    }
}

#[cfg(test)]
mod tests;
