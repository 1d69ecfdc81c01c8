//! Stand-in for the external TLS agent.

use std::{
    collections::VecDeque,
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use rpcwire::{RecordDisposition, StreamSocket, TlsAgent, TlsError};
use tokio::sync::Semaphore;

/// Scripted TLS agent.
///
/// Handshake and record outcomes are queued by the test. A gated agent
/// blocks inside each operation until [`release`](Self::release) grants it
/// a permit, which lets a test observe the connection while the agent owns
/// the socket.
#[derive(Debug)]
pub struct ScriptedTlsAgent {
    handshake: Mutex<Option<Result<(), TlsError>>>,
    records: Mutex<VecDeque<Result<RecordDisposition, TlsError>>>,
    gate: Option<Semaphore>,
    handshakes: AtomicUsize,
    records_handled: AtomicUsize,
    disconnects: AtomicUsize,
}

impl Default for ScriptedTlsAgent {
    fn default() -> Self {
        Self {
            handshake: Mutex::new(None),
            records: Mutex::new(VecDeque::new()),
            gate: None,
            handshakes: AtomicUsize::new(0),
            records_handled: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
        }
    }
}

impl ScriptedTlsAgent {
    /// An agent whose handshake succeeds and which resolves every record.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// An agent that waits for [`release`](Self::release) before each
    /// operation.
    #[must_use]
    pub fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::default()
        }
    }

    /// Make the handshake fail with `error`.
    #[must_use]
    pub fn failing_handshake(self, error: TlsError) -> Self {
        *self.handshake.lock().expect("handshake script") = Some(Err(error));
        self
    }

    /// Queue the outcome of the next `handle_pending_record`.
    pub fn queue_record(&self, outcome: Result<RecordDisposition, TlsError>) {
        self.records.lock().expect("record script").push_back(outcome);
    }

    /// Let `operations` gated operations proceed.
    pub fn release(&self, operations: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(operations);
        }
    }

    /// Handshakes performed.
    #[must_use]
    pub fn handshakes(&self) -> usize { self.handshakes.load(Ordering::SeqCst) }

    /// Control records consumed.
    #[must_use]
    pub fn records_handled(&self) -> usize { self.records_handled.load(Ordering::SeqCst) }

    /// Disconnect notifications received.
    #[must_use]
    pub fn disconnects(&self) -> usize { self.disconnects.load(Ordering::SeqCst) }

    async fn pass_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate open").forget();
        }
    }
}

#[async_trait]
impl TlsAgent for ScriptedTlsAgent {
    async fn handshake(&self, _socket: &dyn StreamSocket) -> Result<(), TlsError> {
        self.pass_gate().await;
        self.handshakes.fetch_add(1, Ordering::SeqCst);
        self.handshake
            .lock()
            .expect("handshake script")
            .take()
            .unwrap_or(Ok(()))
    }

    async fn handle_pending_record(
        &self,
        _socket: &dyn StreamSocket,
    ) -> Result<RecordDisposition, TlsError> {
        self.pass_gate().await;
        self.records_handled.fetch_add(1, Ordering::SeqCst);
        self.records
            .lock()
            .expect("record script")
            .pop_front()
            .unwrap_or(Ok(RecordDisposition::Resolved))
    }

    async fn disconnect_notify(&self, _socket: &dyn StreamSocket) -> Result<(), TlsError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn wrap_outbound(&self, framed: Bytes) -> Bytes { framed }
}
