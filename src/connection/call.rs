//! Call path: encode, register, send, wait, decode.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use tokio::time::{Instant, sleep_until, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, field, info_span};

use super::{Connection, Shared};
use crate::{
    auth::Auth,
    codec::{CallHeader, decode_reply, encode_call, frame},
    error::{AuthStat, Result, RpcError, SendFailure},
    registry::{Outcome, PendingCallHandle},
    socket::SendStatus,
    tls::TlsState,
};

/// A request and its per-call options.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use rpcwire::CallArgs;
///
/// let request = CallArgs::new(1, vec![0, 0, 0, 42]).with_timeout(Duration::from_secs(2));
/// assert_eq!(request.procedure(), 1);
/// ```
#[derive(Clone, Debug)]
pub struct CallArgs {
    procedure: u32,
    args: Bytes,
    timeout: Option<Duration>,
    program: Option<(u32, u32)>,
    cancel: Option<CancellationToken>,
}

impl CallArgs {
    /// Call `procedure` with caller-serialised XDR arguments.
    #[must_use]
    pub fn new(procedure: u32, args: impl Into<Bytes>) -> Self {
        Self {
            procedure,
            args: args.into(),
            timeout: None,
            program: None,
            cancel: None,
        }
    }

    /// Override the connection's timeout for this call. Zero sends the
    /// request without waiting for a reply.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Address a program and version other than the connection's.
    #[must_use]
    pub fn with_program(mut self, program: u32, version: u32) -> Self {
        self.program = Some((program, version));
        self
    }

    /// Let `token` interrupt the wait for a reply.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Procedure number.
    #[must_use]
    pub const fn procedure(&self) -> u32 { self.procedure }
}

/// Call parameters resolved against the connection state.
struct Resolved {
    program: u32,
    version: u32,
    timeout: Duration,
    interruptible: bool,
    auth: Arc<dyn Auth>,
}

/// Keeps the connection's in-flight count accurate however a call ends.
struct InFlightGuard<'a> {
    shared: &'a Shared,
}

impl<'a> InFlightGuard<'a> {
    fn enter(shared: &'a Shared, request: &CallArgs) -> Result<(Self, Resolved)> {
        let mut state = shared.lock();
        if state.closing || state.closed {
            return Err(RpcError::CantSend(SendFailure::Closed));
        }
        state.in_flight += 1;
        let (program, version) = request.program.unwrap_or((state.program, state.version));
        let resolved = Resolved {
            program,
            version,
            timeout: request.timeout.unwrap_or(state.timeout),
            interruptible: state.interruptible,
            auth: Arc::clone(&state.auth),
        };
        Ok((Self { shared }, resolved))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.shared.lock().in_flight -= 1;
        self.shared.notify_state_changed();
    }
}

/// Owns a registry entry until the call has observed its outcome.
struct PendingGuard<'a> {
    shared: &'a Shared,
    handle: PendingCallHandle,
    armed: bool,
}

impl PendingGuard<'_> {
    /// Stop waiting. Returns the outcome if it was delivered concurrently.
    fn abandon(mut self) -> Option<Outcome> {
        self.armed = false;
        let removed = self.shared.lock().pending.remove(self.handle.xid());
        if removed {
            None
        } else {
            self.handle.try_outcome()
        }
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.shared.lock().pending.remove(self.handle.xid());
        }
    }
}

enum Wake {
    Outcome(Outcome),
    TimedOut,
    Interrupted,
}

async fn interrupted(token: Option<&CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

fn error_label(error: &RpcError) -> &'static str {
    match error {
        RpcError::CantSend(_) => "cant_send",
        RpcError::CantReceive(_) => "cant_receive",
        RpcError::TimedOut => "timed_out",
        RpcError::Interrupted => "interrupted",
        RpcError::ShuttingDown => "shutting_down",
        RpcError::Auth(_) => "auth",
        RpcError::Decode(_) => "decode",
        RpcError::Tls(_) => "tls",
        _ => "rejected",
    }
}

impl Connection {
    /// Call `procedure` of `program`/`version` and return its XDR-encoded
    /// results.
    ///
    /// `timeout` falls back to the connection timeout. A zero timeout sends
    /// the request and returns [`RpcError::TimedOut`] without waiting.
    ///
    /// # Errors
    ///
    /// Returns the [`RpcError`] describing why no successful reply was
    /// obtained.
    pub async fn call(
        &self,
        program: u32,
        version: u32,
        procedure: u32,
        args: &[u8],
        timeout: Option<Duration>,
    ) -> Result<Bytes> {
        let mut request =
            CallArgs::new(procedure, Bytes::copy_from_slice(args)).with_program(program, version);
        request.timeout = timeout;
        self.call_with(request).await
    }

    /// Issue `request` against the connection's program and version unless
    /// it overrides them.
    ///
    /// Dropping the returned future abandons the call; a reply arriving
    /// later is discarded.
    ///
    /// # Errors
    ///
    /// See [`Connection::call`].
    pub async fn call_with(&self, request: CallArgs) -> Result<Bytes> {
        let shared = self.shared.as_ref();
        let (_in_flight, resolved) = InFlightGuard::enter(shared, &request)?;
        let span = info_span!(
            "rpc.call",
            xid = field::Empty,
            program = resolved.program,
            version = resolved.version,
            procedure = request.procedure,
            result = field::Empty,
        );
        let result = async {
            let mut refreshes = 0;
            loop {
                match shared.attempt(&request, &resolved).await {
                    Err(RpcError::Auth(why))
                        if refreshes < shared.config.auth_refreshes()
                            && resolved.auth.refresh(why) =>
                    {
                        refreshes += 1;
                        debug!(%why, refreshes, "credentials refreshed; retrying");
                    }
                    other => break other,
                }
            }
        }
        .instrument(span.clone())
        .await;
        match &result {
            Ok(results) => {
                span.record("result", field::display(format_args!("ok({})", results.len())));
            }
            Err(error) => {
                span.record("result", field::display(error));
                crate::metrics::inc_call_errors(error_label(error));
            }
        }
        result
    }
}

impl Shared {
    async fn attempt(&self, request: &CallArgs, resolved: &Resolved) -> Result<Bytes> {
        let deadline = Instant::now() + resolved.timeout;
        self.wait_for_handshake(deadline).await?;

        let fire_and_forget = resolved.timeout.is_zero();
        let send_guard = self.send_lock.lock().await;
        let (xid, handle, agent) = {
            let mut state = self.lock();
            if state.closing || state.closed {
                return Err(RpcError::CantSend(SendFailure::Closed));
            }
            if let Some(error) = &state.last_error {
                return Err(error.clone());
            }
            let xid = state.next_xid;
            state.next_xid = xid.wrapping_add(1);
            state.last_xid = xid;
            let handle = if fire_and_forget {
                None
            } else {
                let handle = state
                    .pending
                    .register(xid)
                    .map_err(|_| RpcError::CantSend(SendFailure::DuplicateXid(xid)))?;
                Some(handle)
            };
            let agent = (state.tls_state == TlsState::Established)
                .then(|| state.tls_agent.clone())
                .flatten();
            (xid, handle, agent)
        };
        Span::current().record("xid", xid);
        let pending = handle.map(|handle| PendingGuard {
            shared: self,
            handle,
            armed: true,
        });

        let header = CallHeader {
            xid,
            program: resolved.program,
            version: resolved.version,
            procedure: request.procedure,
            credentials: resolved.auth.credentials(),
            verifier: resolved.auth.verifier(),
        };
        let message = encode_call(&header, &request.args);
        let mut record =
            frame(&message).map_err(|_| RpcError::CantSend(SendFailure::RecordTooLarge(message.len())))?;
        if let Some(agent) = agent {
            record = agent.wrap_outbound(record);
        }
        self.send_record(&record).await?;
        drop(send_guard);
        self.stats.record_call_sent();

        let Some(mut pending) = pending else {
            return Err(RpcError::TimedOut);
        };
        let token = request.cancel.as_ref().filter(|_| resolved.interruptible);
        let wake = tokio::select! {
            outcome = pending.handle.wait() => Wake::Outcome(outcome),
            () = sleep_until(deadline) => Wake::TimedOut,
            () = interrupted(token) => Wake::Interrupted,
        };
        let outcome = match wake {
            Wake::Outcome(outcome) => {
                pending.armed = false;
                outcome
            }
            Wake::TimedOut => pending.abandon().ok_or(RpcError::TimedOut)?,
            Wake::Interrupted => pending.abandon().ok_or(RpcError::Interrupted)?,
        };
        match outcome {
            Outcome::Reply(reply) => {
                let (verifier, results) = decode_reply(reply)?;
                if !resolved.auth.validate(&verifier) {
                    return Err(RpcError::Auth(AuthStat::InvalidResp));
                }
                Ok(results)
            }
            Outcome::Error(error) => Err(error),
        }
    }

    /// Wait while the TLS handshake owns the socket.
    async fn wait_for_handshake(&self, deadline: Instant) -> Result<()> {
        let gate = self.wait_until(|state| {
            state.closing || state.tls_state != TlsState::HandshakeInProgress
        });
        if timeout(deadline.saturating_duration_since(Instant::now()), gate)
            .await
            .is_err()
        {
            return Err(RpcError::TimedOut);
        }
        if self.lock().closing {
            return Err(RpcError::CantSend(SendFailure::Closed));
        }
        Ok(())
    }

    /// Frame and send a message outside the call path, such as a
    /// backchannel reply.
    pub(crate) async fn send_message(&self, message: Bytes) -> Result<()> {
        let mut record =
            frame(&message).map_err(|_| RpcError::CantSend(SendFailure::RecordTooLarge(message.len())))?;
        let agent = {
            let state = self.lock();
            if state.closing || state.closed {
                return Err(RpcError::CantSend(SendFailure::Closed));
            }
            if let Some(error) = &state.last_error {
                return Err(error.clone());
            }
            (state.tls_state == TlsState::Established)
                .then(|| state.tls_agent.clone())
                .flatten()
        };
        if let Some(agent) = agent {
            record = agent.wrap_outbound(record);
        }
        let _send_guard = self.send_lock.lock().await;
        self.send_record(&record).await
    }

    /// Write `record` completely, waiting for buffer space within the send
    /// retry budget. The caller holds the send lock.
    async fn send_record(&self, record: &[u8]) -> Result<()> {
        let budget = self.config.send_retry_budget();
        let deadline = Instant::now() + budget;
        let mut written = 0;
        while written < record.len() {
            let status = match self.socket.try_send(&record[written..]) {
                Ok(status) => status,
                Err(error) => return Err(self.send_failed(written, SendFailure::Io(error.kind()))),
            };
            match status {
                SendStatus::Sent(n) if n > 0 => {
                    written += n;
                    continue;
                }
                SendStatus::Sent(_) | SendStatus::WouldBlock => {}
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                if budget.is_zero() && written == 0 {
                    return Err(RpcError::TimedOut);
                }
                return Err(self.send_failed(written, SendFailure::RetryBudgetExhausted));
            }
            match timeout(remaining, self.socket.writable()).await {
                Ok(Ok(())) | Err(_) => {}
                Ok(Err(error)) => {
                    return Err(self.send_failed(written, SendFailure::Io(error.kind())));
                }
            }
        }
        Ok(())
    }

    /// A record cut short leaves the peer mid-fragment; nothing can follow
    /// it on this stream.
    fn send_failed(&self, written: usize, failure: SendFailure) -> RpcError {
        let error = RpcError::CantSend(failure);
        if written > 0 {
            self.fail_connection(error.clone());
        }
        error
    }
}
