//! Test doubles for driving an [`rpcwire::Connection`] without a network.
//!
//! [`ScriptedSocket`] is an in-memory [`rpcwire::StreamSocket`] whose inbound
//! bytes, control records, send behaviour and failures are scripted by the
//! test. [`ScriptedPeer`] plays the server on the other end, and
//! [`ScriptedTlsAgent`] stands in for the external TLS agent.
//!
//! ```rust
//! use rpcwire::Connection;
//! use rpcwire_testing::{ScriptedPeer, ScriptedSocket};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let socket = ScriptedSocket::new();
//! let peer = ScriptedPeer::new(socket.clone());
//! let connection = Connection::builder(100_003, 3).build(socket, None);
//!
//! let server = tokio::spawn(async move {
//!     let call = peer.next_call().await;
//!     peer.reply_success(call.header.xid, &[1, 2, 3, 4]);
//! });
//! let results = connection.call(100_003, 3, 0, &[], None).await;
//! assert_eq!(results.as_deref(), Ok(&[1, 2, 3, 4][..]));
//! server.await.unwrap();
//! # }
//! ```

pub mod peer;
pub mod socket;
pub mod tls;

pub use peer::{ScriptedPeer, call_record, fragmented, framed, reply_record};
pub use socket::{ScriptedSocket, SendStep};
pub use tls::ScriptedTlsAgent;
