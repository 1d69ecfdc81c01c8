//! Runtime inspection and adjustment of a connection.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use tracing::info;

use super::{Connection, ReceiveEvent, Shared};
use crate::{
    auth::Auth,
    backchannel::Backchannel,
    error::{Result, RpcError, SendFailure},
    tls::{self, TlsAgent, TlsError, TlsState},
};

/// Operations accepted by [`Connection::control`].
#[derive(Clone, Debug)]
pub enum Control {
    /// Read the default call timeout.
    GetTimeout,
    /// Replace the default call timeout.
    SetTimeout(Duration),
    /// Read the peer address.
    GetPeerAddr,
    /// Record a different peer address.
    SetPeerAddr(SocketAddr),
    /// Read the socket's local address.
    GetLocalAddr,
    /// Read the xid of the most recent call.
    GetXid,
    /// Make the next call use this xid.
    SetXid(u32),
    /// Read the default program number.
    GetProgram,
    /// Replace the default program number.
    SetProgram(u32),
    /// Read the default program version.
    GetVersion,
    /// Replace the default program version.
    SetVersion(u32),
    /// Read whether waits are interruptible.
    GetInterruptible,
    /// Allow or forbid cancellation tokens to interrupt waits.
    SetInterruptible(bool),
    /// Attach a backchannel, or detach the current one with `None`.
    SetBackchannel(Option<Arc<Backchannel>>),
    /// Replace the credential provider.
    SetAuth(Arc<dyn Auth>),
    /// Upgrade the connection to TLS through `agent`.
    StartTls(Arc<dyn TlsAgent>),
    /// Read the TLS status.
    GetTlsState,
    /// Read the most recent connection-level error.
    GetLastError,
}

/// Values returned by [`Connection::control`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlValue {
    /// The operation only changed state.
    Unit,
    /// A timeout.
    Timeout(Duration),
    /// An address, if known.
    Addr(Option<SocketAddr>),
    /// An xid.
    Xid(u32),
    /// A program number.
    Program(u32),
    /// A program version.
    Version(u32),
    /// The interruptibility flag.
    Interruptible(bool),
    /// The TLS status.
    TlsState(TlsState),
    /// The most recent connection-level error.
    LastError(Option<RpcError>),
}

impl Connection {
    /// Get or set a connection parameter.
    ///
    /// # Errors
    ///
    /// [`Control::StartTls`] fails with [`RpcError::CantSend`] on a closing
    /// connection and with [`TlsError::AlreadyStarted`] when TLS was already
    /// requested. Other operations never fail.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// use rpcwire::{Connection, Control, ControlValue};
    /// use rpcwire_testing::ScriptedSocket;
    ///
    /// # #[tokio::main]
    /// # async fn main() -> rpcwire::Result<()> {
    /// let connection = Connection::builder(100_003, 3).build(ScriptedSocket::new(), None);
    /// connection.control(Control::SetXid(41))?;
    /// connection.control(Control::SetTimeout(Duration::from_secs(3)))?;
    /// assert_eq!(
    ///     connection.control(Control::GetTimeout)?,
    ///     ControlValue::Timeout(Duration::from_secs(3))
    /// );
    /// # Ok(())
    /// # }
    /// ```
    pub fn control(&self, op: Control) -> Result<ControlValue> {
        let shared = &self.shared;
        let value = match op {
            Control::StartTls(agent) => return self.start_tls(agent),
            Control::SetBackchannel(Some(backchannel)) => {
                self.attach_backchannel(&backchannel);
                ControlValue::Unit
            }
            Control::SetBackchannel(None) => {
                self.detach_backchannel();
                ControlValue::Unit
            }
            Control::GetLocalAddr => ControlValue::Addr(shared.socket.local_addr()),
            op => {
                let mut state = shared.lock();
                match op {
                    Control::GetTimeout => ControlValue::Timeout(state.timeout),
                    Control::SetTimeout(timeout) => {
                        state.timeout = timeout;
                        ControlValue::Unit
                    }
                    Control::GetPeerAddr => ControlValue::Addr(state.peer_addr),
                    Control::SetPeerAddr(addr) => {
                        state.peer_addr = Some(addr);
                        ControlValue::Unit
                    }
                    Control::GetXid => ControlValue::Xid(state.last_xid),
                    Control::SetXid(xid) => {
                        state.next_xid = xid;
                        ControlValue::Unit
                    }
                    Control::GetProgram => ControlValue::Program(state.program),
                    Control::SetProgram(program) => {
                        state.program = program;
                        ControlValue::Unit
                    }
                    Control::GetVersion => ControlValue::Version(state.version),
                    Control::SetVersion(version) => {
                        state.version = version;
                        ControlValue::Unit
                    }
                    Control::GetInterruptible => ControlValue::Interruptible(state.interruptible),
                    Control::SetInterruptible(interruptible) => {
                        state.interruptible = interruptible;
                        ControlValue::Unit
                    }
                    Control::SetAuth(auth) => {
                        state.auth = auth;
                        ControlValue::Unit
                    }
                    Control::GetTlsState => ControlValue::TlsState(state.tls_state),
                    Control::GetLastError => ControlValue::LastError(state.last_error.clone()),
                    Control::StartTls(_)
                    | Control::SetBackchannel(_)
                    | Control::GetLocalAddr => ControlValue::Unit,
                }
            }
        };
        Ok(value)
    }

    /// Queue inbound calls on `backchannel`, replacing any attached one.
    pub fn attach_backchannel(&self, backchannel: &Arc<Backchannel>) {
        let previous = self
            .shared
            .lock()
            .backchannel
            .replace(Arc::downgrade(backchannel));
        if let Some(previous) = previous.and_then(|weak| weak.upgrade()) {
            if !Arc::ptr_eq(&previous, backchannel) {
                previous.detach();
            }
        }
        backchannel.attach(Arc::downgrade(&self.shared));
    }

    /// Stop queuing inbound calls; they are discarded from now on.
    pub fn detach_backchannel(&self) {
        let previous = self.shared.lock().backchannel.take();
        if let Some(backchannel) = previous.and_then(|weak| weak.upgrade()) {
            backchannel.detach();
        }
    }

    fn start_tls(&self, agent: Arc<dyn TlsAgent>) -> Result<ControlValue> {
        {
            let mut state = self.shared.lock();
            if state.closing || state.closed {
                return Err(RpcError::CantSend(SendFailure::Closed));
            }
            if state.tls_state != TlsState::None || state.tls_agent.is_some() {
                return Err(TlsError::AlreadyStarted.into());
            }
            Shared::apply_event(&mut state, ReceiveEvent::HandshakeStarted);
            state.tls_state = TlsState::HandshakeInProgress;
            state.tls_agent = Some(Arc::clone(&agent));
        }
        self.shared.notify_state_changed();
        let task = tokio::spawn(tls::control_thread(Arc::downgrade(&self.shared), agent));
        self.shared.set_tls_task(task);
        info!("tls upgrade started");
        Ok(ControlValue::Unit)
    }
}
