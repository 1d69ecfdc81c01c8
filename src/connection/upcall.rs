//! Socket readiness registration.
//!
//! The registration owns a task that waits for the socket to become readable
//! and runs a receive pass. Dropping the registration cancels the task;
//! [`UpcallRegistration::deregister`] also waits for it, so no pass starts
//! once it returns.

use std::sync::{Arc, Weak};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{ReceivePass, Shared};
use crate::{
    error::{ReceiveFailure, RpcError},
    socket::StreamSocket,
};

/// Handle for the task delivering readiness notifications to a connection.
#[derive(Debug)]
pub struct UpcallRegistration {
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl UpcallRegistration {
    pub(crate) fn register(shared: &Arc<Shared>) -> Self {
        let token = CancellationToken::new();
        let task = tokio::spawn(drive(
            Arc::clone(&shared.socket),
            Arc::downgrade(shared),
            token.clone(),
        ));
        Self {
            token,
            task: Some(task),
        }
    }

    /// Stop delivering notifications and wait for the task to finish.
    pub async fn deregister(mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            if let Err(error) = task.await {
                debug!(%error, "readiness task ended abnormally");
            }
        }
    }
}

impl Drop for UpcallRegistration {
    fn drop(&mut self) { self.token.cancel(); }
}

async fn drive(
    socket: Arc<dyn StreamSocket>,
    connection: Weak<Shared>,
    token: CancellationToken,
) {
    loop {
        let ready = tokio::select! {
            biased;
            () = token.cancelled() => break,
            ready = socket.readable() => ready,
        };
        let Some(shared) = connection.upgrade() else {
            break;
        };
        if let Err(error) = ready {
            shared.fail_connection(RpcError::CantReceive(ReceiveFailure::Io(error.kind())));
            break;
        }
        match shared.receive_pass() {
            ReceivePass::Drained => {}
            ReceivePass::Busy => {
                // The running pass keeps draining; poll again once it ends.
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    () = shared.wait_until(|s| s.active_receivers == 0 || s.closing) => {}
                }
            }
            ReceivePass::Gated | ReceivePass::ControlRecord => {
                // The TLS task replays the refused pass; resume once the gate
                // reopens.
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    () = shared.wait_until(|s| s.receive_state.accepts_data() || s.closing) => {}
                }
            }
            ReceivePass::Failed | ReceivePass::Closed => break,
        }
    }
}
