//! Outstanding requests keyed by transaction id.
//!
//! The registry pairs each pending xid with the sending half of a oneshot
//! channel; the caller that registered the xid keeps the receiving half in a
//! [`PendingCallHandle`]. An entry leaves the registry exactly once, through
//! [`resolve`](PendingCalls::resolve), [`fail_all`](PendingCalls::fail_all)
//! or [`remove`](PendingCalls::remove), so each caller observes exactly one
//! terminal outcome.
//!
//! The registry itself is not synchronised. The connection keeps it behind
//! its state mutex, which makes a caller's check-then-remove atomic with
//! respect to a concurrent `resolve`.

use std::collections::{HashMap, hash_map::Entry};

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::oneshot::{self, error::TryRecvError};

use crate::error::RpcError;

/// Terminal outcome delivered to a pending caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The complete reply record, starting with the xid.
    Reply(Bytes),
    /// The connection failed or closed before a reply arrived.
    Error(RpcError),
}

/// Errors raised when registering an xid.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The xid is already pending.
    #[error("xid {0:#x} already registered")]
    Duplicate(u32),
}

/// Caller-side view of one pending request.
#[derive(Debug)]
pub struct PendingCallHandle {
    xid: u32,
    rx: oneshot::Receiver<Outcome>,
}

impl PendingCallHandle {
    /// Transaction id this handle waits on.
    #[must_use]
    pub const fn xid(&self) -> u32 { self.xid }

    /// Wait for the outcome.
    ///
    /// If the registry is dropped without resolving the entry the caller
    /// observes [`RpcError::ShuttingDown`].
    pub async fn wait(&mut self) -> Outcome {
        (&mut self.rx)
            .await
            .unwrap_or(Outcome::Error(RpcError::ShuttingDown))
    }

    /// Take the outcome if one has already been delivered.
    pub fn try_outcome(&mut self) -> Option<Outcome> {
        match self.rx.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Outcome::Error(RpcError::ShuttingDown)),
        }
    }
}

/// Pending requests of one connection.
#[derive(Debug, Default)]
pub struct PendingCalls {
    entries: HashMap<u32, oneshot::Sender<Outcome>>,
}

impl PendingCalls {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Register `xid` and return the handle its caller waits on.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Duplicate`] if `xid` is already pending.
    pub fn register(&mut self, xid: u32) -> Result<PendingCallHandle, RegistryError> {
        match self.entries.entry(xid) {
            Entry::Occupied(_) => Err(RegistryError::Duplicate(xid)),
            Entry::Vacant(vacant) => {
                let (tx, rx) = oneshot::channel();
                vacant.insert(tx);
                Ok(PendingCallHandle { xid, rx })
            }
        }
    }

    /// Complete and remove the entry for `xid`.
    ///
    /// Returns `false` without side effects when no entry exists, which is
    /// the expected fate of duplicate and late replies.
    pub fn resolve(&mut self, xid: u32, outcome: Outcome) -> bool {
        let Some(tx) = self.entries.remove(&xid) else {
            return false;
        };
        // The caller may have dropped its handle; the entry is gone either way.
        let _ = tx.send(outcome);
        true
    }

    /// Remove `xid` on behalf of a caller that stopped waiting.
    ///
    /// Returns `false` if the entry was already resolved.
    pub fn remove(&mut self, xid: u32) -> bool { self.entries.remove(&xid).is_some() }

    /// Fail every pending entry with `error`, returning how many were failed.
    pub fn fail_all(&mut self, error: &RpcError) -> usize {
        let failed = self.entries.len();
        for (_, tx) in self.entries.drain() {
            let _ = tx.send(Outcome::Error(error.clone()));
        }
        failed
    }

    /// Whether `xid` is pending.
    #[must_use]
    pub fn contains(&self, xid: u32) -> bool { self.entries.contains_key(&xid) }

    /// Number of pending entries.
    #[must_use]
    pub fn len(&self) -> usize { self.entries.len() }

    /// Whether no entries are pending.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }
}
