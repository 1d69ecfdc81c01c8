//! Shutdown handling for a connection.

use log::info;
use tracing::{Instrument, debug, info_span};

use super::Connection;
use crate::error::RpcError;

impl Connection {
    /// Fail every pending call and stop receiving.
    ///
    /// Idempotent: a second caller waits for the first to finish. On return
    /// no receive pass is running, no call is in flight and new calls fail
    /// with [`RpcError::CantSend`].
    pub async fn close(&self) {
        let shared = &self.shared;
        async {
            let first = {
                let mut state = shared.lock();
                !std::mem::replace(&mut state.closing, true)
            };
            shared.notify_state_changed();
            if !first {
                shared.wait_until(|state| state.closed).await;
                return;
            }

            if let Some(registration) = shared.take_upcall() {
                registration.deregister().await;
            }
            shared.wait_until(|state| state.active_receivers == 0).await;
            let failed = shared.lock().pending.fail_all(&RpcError::ShuttingDown);
            shared.wait_until(|state| state.in_flight == 0).await;

            shared.lock().closed = true;
            shared.notify_state_changed();
            shared.tls_wake.notify_one();
            info!("connection closed; {failed} pending calls failed");
        }
        .instrument(info_span!("rpc.close"))
        .await;
    }

    /// Close the connection, release the backchannel, join the TLS control
    /// task and shut the socket down.
    pub async fn destroy(self) {
        self.close().await;
        self.detach_backchannel();
        if let Some(task) = self.shared.take_tls_task() {
            if let Err(error) = task.await {
                debug!(%error, "tls control task ended abnormally");
            }
        }
        if let Err(error) = self.shared.socket.shutdown() {
            debug!(%error, "socket shutdown");
        }
        info!("connection destroyed");
    }
}
