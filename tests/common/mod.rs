//! Shared utilities for integration tests.
//!
//! Provides a fixture wiring a [`Connection`] to a [`ScriptedSocket`] and a
//! helper for waiting on state the background tasks update.

// Items in this shared module may not be used by all test binaries that import it.
#![allow(
    dead_code,
    reason = "shared test utilities are not used by all test binaries"
)]

use std::time::Duration;

use rpcwire::{Connection, ConnectionConfig};
use rpcwire_testing::{ScriptedPeer, ScriptedSocket};
use rstest::fixture;

/// Program number used throughout the tests.
pub const PROGRAM: u32 = 100_003;
/// Program version used throughout the tests.
pub const VERSION: u32 = 3;

pub type TestResult<T = ()> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// A connection, the socket beneath it and the peer serving it.
pub struct Harness {
    pub connection: Connection,
    pub socket: ScriptedSocket,
    pub peer: ScriptedPeer,
}

impl Harness {
    /// Wire a connection configured with `config` to a fresh scripted socket.
    pub fn with_config(config: ConnectionConfig) -> Self {
        let socket = ScriptedSocket::new();
        let peer = ScriptedPeer::new(socket.clone());
        let connection = Connection::builder(PROGRAM, VERSION)
            .config(config)
            .build(socket.clone(), None);
        Self {
            connection,
            socket,
            peer,
        }
    }
}

#[fixture]
pub fn harness() -> Harness { Harness::with_config(ConnectionConfig::default()) }

/// Yield until `condition` holds, panicking after a generous bound.
///
/// # Panics
///
/// Panics if the condition does not hold within two seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    let wait = async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(2), wait)
        .await
        .expect("condition not reached");
}
