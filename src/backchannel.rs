//! Server transport for calls arriving on a client connection.
//!
//! Some protocols let the server issue callback requests over the
//! connection the client opened. Attaching a [`Backchannel`] to a
//! [`Connection`](crate::Connection) makes the receive pipeline queue every
//! inbound call here instead of discarding it. Replies travel back over the
//! same connection.
//!
//! Neither side owns the other: each holds a weak reference, so the
//! connection and the backchannel can be dropped in any order. Whichever goes
//! first detaches the pair.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
};

use tokio::sync::Notify;

use crate::{
    codec::{InboundCall, ReplyBody, encode_reply},
    connection::Shared,
    error::{Result, RpcError, SendFailure},
};

/// Queue of inbound calls for one connection.
///
/// # Examples
///
/// ```no_run
/// use rpcwire::{Backchannel, Connection, codec::ReplyBody};
///
/// # async fn serve(connection: Connection) -> rpcwire::Result<()> {
/// let backchannel = Backchannel::new();
/// connection.attach_backchannel(&backchannel);
/// while let Some(call) = backchannel.recv().await {
///     backchannel
///         .reply(call.header.xid, &ReplyBody::success(Vec::new()))
///         .await?;
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct Backchannel {
    inner: Mutex<Inner>,
    ready: Notify,
}

#[derive(Default)]
struct Inner {
    queue: VecDeque<InboundCall>,
    connection: Option<Weak<Shared>>,
}

impl std::fmt::Debug for Inner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inner")
            .field("queued", &self.queue.len())
            .field("attached", &self.connection.is_some())
            .finish()
    }
}

impl Backchannel {
    /// Create a detached backchannel.
    #[must_use]
    pub fn new() -> Arc<Self> { Arc::new(Self::default()) }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a live connection feeds this backchannel.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.lock()
            .connection
            .as_ref()
            .is_some_and(|weak| weak.strong_count() > 0)
    }

    /// Whether calls are queued.
    #[must_use]
    pub fn is_runnable(&self) -> bool { !self.lock().queue.is_empty() }

    /// Take the oldest queued call without waiting.
    #[must_use]
    pub fn try_recv(&self) -> Option<InboundCall> { self.lock().queue.pop_front() }

    /// Wait for the next inbound call.
    ///
    /// Returns `None` once the backchannel is detached and its queue is
    /// empty.
    pub async fn recv(&self) -> Option<InboundCall> {
        loop {
            let notified = self.ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut inner = self.lock();
                if let Some(call) = inner.queue.pop_front() {
                    return Some(call);
                }
                if !inner
                    .connection
                    .as_ref()
                    .is_some_and(|weak| weak.strong_count() > 0)
                {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Send a reply to the call identified by `xid`.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::CantSend`] if the backchannel is detached or the
    /// connection cannot write the reply.
    pub async fn reply(&self, xid: u32, body: &ReplyBody) -> Result<()> {
        let connection = self.lock().connection.as_ref().and_then(Weak::upgrade);
        let Some(connection) = connection else {
            return Err(RpcError::CantSend(SendFailure::Closed));
        };
        connection.send_message(encode_reply(xid, body)).await
    }

    pub(crate) fn attach(&self, connection: Weak<Shared>) {
        self.lock().connection = Some(connection);
        self.ready.notify_waiters();
    }

    pub(crate) fn detach(&self) {
        self.lock().connection = None;
        self.ready.notify_waiters();
    }

    pub(crate) fn push(&self, call: InboundCall) {
        self.lock().queue.push_back(call);
        self.ready.notify_waiters();
    }
}
