//! Server side of a scripted conversation.

use bytes::Bytes;
use rpcwire::codec::{
    CallHeader,
    InboundCall,
    OpaqueAuth,
    RecordMarker,
    ReplyBody,
    decode_call,
    encode_call,
    encode_reply,
    frame,
};

use crate::socket::ScriptedSocket;

/// Frame `message` as a single last fragment.
///
/// # Panics
///
/// Panics if `message` does not fit in one fragment.
#[must_use]
pub fn framed(message: &[u8]) -> Bytes { frame(message).expect("message fits in one fragment") }

/// Frame `message` as consecutive fragments of the given sizes.
///
/// The sizes must sum to the message length; the last fragment carries the
/// last-fragment flag.
///
/// # Panics
///
/// Panics if the sizes do not sum to `message.len()`.
#[must_use]
pub fn fragmented(message: &[u8], sizes: &[usize]) -> Bytes {
    assert_eq!(sizes.iter().sum::<usize>(), message.len(), "fragment sizes");
    let mut out = Vec::with_capacity(message.len() + 4 * sizes.len());
    let mut offset = 0;
    for (index, size) in sizes.iter().enumerate() {
        let is_last = index + 1 == sizes.len();
        let marker = RecordMarker::new(is_last, *size).expect("fragment fits");
        out.extend_from_slice(&marker.to_bytes());
        out.extend_from_slice(&message[offset..offset + size]);
        offset += size;
    }
    Bytes::from(out)
}

/// A framed successful reply carrying `results`.
#[must_use]
pub fn reply_record(xid: u32, results: &[u8]) -> Bytes {
    framed(&encode_reply(xid, &ReplyBody::success(Bytes::copy_from_slice(results))))
}

/// A framed call, as a server would send on a backchannel.
#[must_use]
pub fn call_record(xid: u32, program: u32, version: u32, procedure: u32, args: &[u8]) -> Bytes {
    let header = CallHeader {
        xid,
        program,
        version,
        procedure,
        credentials: OpaqueAuth::none(),
        verifier: OpaqueAuth::none(),
    };
    framed(&encode_call(&header, args))
}

/// Plays the server against a [`ScriptedSocket`].
#[derive(Clone, Debug)]
pub struct ScriptedPeer {
    socket: ScriptedSocket,
}

impl ScriptedPeer {
    /// Serve the connection that owns `socket`.
    #[must_use]
    pub fn new(socket: ScriptedSocket) -> Self { Self { socket } }

    /// The socket this peer writes to.
    #[must_use]
    pub fn socket(&self) -> &ScriptedSocket { &self.socket }

    /// Wait for the next call written by the connection.
    ///
    /// # Panics
    ///
    /// Panics if the record is not a well-formed call.
    pub async fn next_call(&self) -> InboundCall {
        let record = self.socket.next_record().await;
        decode_call(record).expect("outbound record is a call")
    }

    /// Send `body` as the reply to `xid`.
    pub fn reply(&self, xid: u32, body: &ReplyBody) {
        self.socket.push_bytes(framed(&encode_reply(xid, body)));
    }

    /// Send a successful reply carrying `results`.
    pub fn reply_success(&self, xid: u32, results: &[u8]) {
        self.socket.push_bytes(reply_record(xid, results));
    }
}
