#![doc(html_root_url = "https://docs.rs/rpcwire/latest")]
//! Public API for the `rpcwire` library.
//!
//! `rpcwire` is a connection-oriented ONC-RPC client transport. It frames
//! requests with record marking, multiplexes concurrent calls over one byte
//! stream by transaction id, routes server-initiated calls to an optional
//! backchannel, and defers to an external agent for TLS handshakes.

pub mod auth;
pub mod backchannel;
pub mod byte_order;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod metrics;
pub mod registry;
pub mod socket;
pub mod tls;

pub use auth::{Auth, AuthNone, AuthSys};
pub use backchannel::Backchannel;
pub use config::ConnectionConfig;
pub use connection::{
    CallArgs,
    Connection,
    ConnectionBuilder,
    ConnectionStats,
    Control,
    ControlValue,
    ReceivePass,
    ReceiveState,
    UpcallRegistration,
};
pub use error::{AuthStat, ReceiveFailure, Result, RpcError, SendFailure};
pub use registry::{Outcome, PendingCallHandle, PendingCalls};
pub use socket::{ControlRecord, Received, SendStatus, SocketOptions, StreamSocket};
pub use tls::{RecordDisposition, TlsAgent, TlsError, TlsState};
