//! RPC call and reply headers.
//!
//! These functions are pure: they neither perform I/O nor consult
//! connection state. Decoders check every length against the buffer before
//! slicing, returning [`DecodeError`] on truncated or adversarial input.

use bytes::{Bytes, BytesMut};

use super::{
    error::DecodeError,
    xdr::{XdrReader, put_opaque, put_u32},
};
use crate::{
    byte_order::read_network_u32_at,
    error::{AuthStat, RpcError},
};

/// RPC protocol version carried in every call header.
pub const RPC_VERSION: u32 = 2;

/// Largest opaque authentication body permitted by the protocol.
pub const MAX_AUTH_BYTES: usize = 400;

/// Bytes occupied by the xid and direction words.
pub const XID_AND_DIRECTION_LEN: usize = 8;

const MSG_ACCEPTED: u32 = 0;
const MSG_DENIED: u32 = 1;

const SUCCESS: u32 = 0;
const PROG_UNAVAIL: u32 = 1;
const PROG_MISMATCH: u32 = 2;
const PROC_UNAVAIL: u32 = 3;
const GARBAGE_ARGS: u32 = 4;
const SYSTEM_ERR: u32 = 5;

const RPC_MISMATCH: u32 = 0;
const AUTH_ERROR: u32 = 1;

/// Direction discriminant following the xid.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// A request, inbound only on a backchannel.
    Call,
    /// A reply to a request this side sent.
    Reply,
}

impl Direction {
    const fn to_wire(self) -> u32 {
        match self {
            Self::Call => 0,
            Self::Reply => 1,
        }
    }

    fn from_wire(value: u32) -> Result<Self, DecodeError> {
        match value {
            0 => Ok(Self::Call),
            1 => Ok(Self::Reply),
            other => Err(DecodeError::UnknownDirection(other)),
        }
    }
}

/// Authentication flavor and its opaque body.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OpaqueAuth {
    /// Flavor number (`0` for `AUTH_NONE`, `1` for `AUTH_SYS`).
    pub flavor: u32,
    /// Flavor-specific body, at most [`MAX_AUTH_BYTES`] long.
    pub body: Bytes,
}

impl OpaqueAuth {
    /// The empty `AUTH_NONE` credential or verifier.
    #[must_use]
    pub fn none() -> Self { Self::default() }

    /// Build an opaque auth value.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::AuthTooLong`] if `body` exceeds
    /// [`MAX_AUTH_BYTES`].
    pub fn new(flavor: u32, body: impl Into<Bytes>) -> Result<Self, DecodeError> {
        let body = body.into();
        if body.len() > MAX_AUTH_BYTES {
            return Err(DecodeError::AuthTooLong {
                len: body.len(),
                max: MAX_AUTH_BYTES,
            });
        }
        Ok(Self { flavor, body })
    }

    fn encode(&self, dst: &mut BytesMut) {
        put_u32(dst, self.flavor);
        put_opaque(dst, &self.body);
    }

    fn decode(reader: &mut XdrReader) -> Result<Self, DecodeError> {
        let flavor = reader.u32()?;
        let body = reader.opaque(MAX_AUTH_BYTES)?;
        Ok(Self { flavor, body })
    }
}

/// Fixed portion of an RPC call message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallHeader {
    /// Transaction identifier.
    pub xid: u32,
    /// Remote program number.
    pub program: u32,
    /// Remote program version.
    pub version: u32,
    /// Procedure number within the program.
    pub procedure: u32,
    /// Caller credentials.
    pub credentials: OpaqueAuth,
    /// Caller verifier.
    pub verifier: OpaqueAuth,
}

/// A call received on a backchannel, split into header and arguments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundCall {
    /// Decoded call header.
    pub header: CallHeader,
    /// XDR-encoded procedure arguments.
    pub args: Bytes,
}

/// Outcome carried by an accepted reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AcceptedStatus {
    /// The procedure ran; the payload holds its XDR-encoded results.
    Success(Bytes),
    /// The program is not exported by the server.
    ProgramUnavailable,
    /// The server supports only the versions `low..=high`.
    ProgramMismatch {
        /// Lowest supported version.
        low: u32,
        /// Highest supported version.
        high: u32,
    },
    /// The procedure number is unknown.
    ProcedureUnavailable,
    /// The server could not decode the arguments.
    GarbageArgs,
    /// The server hit an internal error.
    SystemError,
}

/// Reason a reply was denied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rejection {
    /// The server speaks RPC versions `low..=high` only.
    RpcMismatch {
        /// Lowest supported RPC version.
        low: u32,
        /// Highest supported RPC version.
        high: u32,
    },
    /// Credential validation failed.
    AuthError(AuthStat),
}

/// Body of an RPC reply message, following the xid and direction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReplyBody {
    /// The call was accepted; `status` carries the result.
    Accepted {
        /// Server verifier.
        verifier: OpaqueAuth,
        /// Procedure outcome.
        status: AcceptedStatus,
    },
    /// The call was rejected before dispatch.
    Denied(Rejection),
}

impl ReplyBody {
    /// Shorthand for a successful reply with an `AUTH_NONE` verifier.
    #[must_use]
    pub fn success(results: impl Into<Bytes>) -> Self {
        Self::Accepted {
            verifier: OpaqueAuth::none(),
            status: AcceptedStatus::Success(results.into()),
        }
    }

    /// Map the reply onto the caller-facing result.
    ///
    /// # Errors
    ///
    /// Returns the [`RpcError`] matching any non-success status.
    pub fn into_result(self) -> Result<(OpaqueAuth, Bytes), RpcError> {
        match self {
            Self::Accepted { verifier, status } => match status {
                AcceptedStatus::Success(results) => Ok((verifier, results)),
                AcceptedStatus::ProgramUnavailable => Err(RpcError::ProgramUnavailable),
                AcceptedStatus::ProgramMismatch { low, high } => {
                    Err(RpcError::ProgramMismatch { low, high })
                }
                AcceptedStatus::ProcedureUnavailable => Err(RpcError::ProcedureUnavailable),
                AcceptedStatus::GarbageArgs => Err(RpcError::GarbageArgs),
                AcceptedStatus::SystemError => Err(RpcError::SystemError),
            },
            Self::Denied(Rejection::RpcMismatch { low, high }) => {
                Err(RpcError::VersionMismatch { low, high })
            }
            Self::Denied(Rejection::AuthError(why)) => Err(RpcError::Auth(why)),
        }
    }
}

/// Encode a call header followed by caller-serialised arguments.
///
/// # Examples
///
/// ```
/// use rpcwire::codec::{CallHeader, Direction, OpaqueAuth, encode_call, peek_xid_and_direction};
///
/// let header = CallHeader {
///     xid: 7,
///     program: 100_003,
///     version: 3,
///     procedure: 0,
///     credentials: OpaqueAuth::none(),
///     verifier: OpaqueAuth::none(),
/// };
/// let message = encode_call(&header, &[]);
/// assert_eq!(peek_xid_and_direction(&message), Ok((7, Direction::Call)));
/// ```
#[must_use]
pub fn encode_call(header: &CallHeader, args: &[u8]) -> Bytes {
    let mut dst = BytesMut::with_capacity(40 + header.credentials.body.len() + args.len());
    put_u32(&mut dst, header.xid);
    put_u32(&mut dst, Direction::Call.to_wire());
    put_u32(&mut dst, RPC_VERSION);
    put_u32(&mut dst, header.program);
    put_u32(&mut dst, header.version);
    put_u32(&mut dst, header.procedure);
    header.credentials.encode(&mut dst);
    header.verifier.encode(&mut dst);
    dst.extend_from_slice(args);
    dst.freeze()
}

/// Read the xid and direction that open every RPC message.
///
/// # Errors
///
/// Returns [`DecodeError::Truncated`] if fewer than eight bytes are present
/// and [`DecodeError::UnknownDirection`] for a discriminant other than 0/1.
pub fn peek_xid_and_direction(message: &[u8]) -> Result<(u32, Direction), DecodeError> {
    let truncated = || DecodeError::Truncated {
        offset: 0,
        needed: XID_AND_DIRECTION_LEN,
        available: message.len(),
    };
    let xid = read_network_u32_at(message, 0).ok_or_else(truncated)?;
    let direction = read_network_u32_at(message, 4).ok_or_else(truncated)?;
    Ok((xid, Direction::from_wire(direction)?))
}

/// Decode a call received on a backchannel.
///
/// # Errors
///
/// Returns [`DecodeError`] if the message is not a well-formed version 2
/// call.
pub fn decode_call(message: Bytes) -> Result<InboundCall, DecodeError> {
    let mut reader = XdrReader::new(message);
    let xid = reader.u32()?;
    let direction = reader.u32()?;
    if Direction::from_wire(direction)? != Direction::Call {
        return Err(DecodeError::UnexpectedDirection(direction));
    }
    let rpc_version = reader.u32()?;
    if rpc_version != RPC_VERSION {
        return Err(DecodeError::UnsupportedRpcVersion(rpc_version));
    }
    let program = reader.u32()?;
    let version = reader.u32()?;
    let procedure = reader.u32()?;
    let credentials = OpaqueAuth::decode(&mut reader)?;
    let verifier = OpaqueAuth::decode(&mut reader)?;
    Ok(InboundCall {
        header: CallHeader {
            xid,
            program,
            version,
            procedure,
            credentials,
            verifier,
        },
        args: reader.into_rest(),
    })
}

/// Encode a reply message for `xid`.
#[must_use]
pub fn encode_reply(xid: u32, body: &ReplyBody) -> Bytes {
    let mut dst = BytesMut::with_capacity(32);
    put_u32(&mut dst, xid);
    put_u32(&mut dst, Direction::Reply.to_wire());
    match body {
        ReplyBody::Accepted { verifier, status } => {
            put_u32(&mut dst, MSG_ACCEPTED);
            verifier.encode(&mut dst);
            match status {
                AcceptedStatus::Success(results) => {
                    put_u32(&mut dst, SUCCESS);
                    dst.extend_from_slice(results);
                }
                AcceptedStatus::ProgramUnavailable => put_u32(&mut dst, PROG_UNAVAIL),
                AcceptedStatus::ProgramMismatch { low, high } => {
                    put_u32(&mut dst, PROG_MISMATCH);
                    put_u32(&mut dst, *low);
                    put_u32(&mut dst, *high);
                }
                AcceptedStatus::ProcedureUnavailable => put_u32(&mut dst, PROC_UNAVAIL),
                AcceptedStatus::GarbageArgs => put_u32(&mut dst, GARBAGE_ARGS),
                AcceptedStatus::SystemError => put_u32(&mut dst, SYSTEM_ERR),
            }
        }
        ReplyBody::Denied(Rejection::RpcMismatch { low, high }) => {
            put_u32(&mut dst, MSG_DENIED);
            put_u32(&mut dst, RPC_MISMATCH);
            put_u32(&mut dst, *low);
            put_u32(&mut dst, *high);
        }
        ReplyBody::Denied(Rejection::AuthError(why)) => {
            put_u32(&mut dst, MSG_DENIED);
            put_u32(&mut dst, AUTH_ERROR);
            put_u32(&mut dst, why.to_wire());
        }
    }
    dst.freeze()
}

/// Decode a complete reply message into its xid and body.
///
/// # Errors
///
/// Returns [`DecodeError`] on truncated input, a call message, or any
/// undefined status value.
pub fn decode_reply_body(message: Bytes) -> Result<(u32, ReplyBody), DecodeError> {
    let mut reader = XdrReader::new(message);
    let xid = reader.u32()?;
    let direction = reader.u32()?;
    if Direction::from_wire(direction)? != Direction::Reply {
        return Err(DecodeError::UnexpectedDirection(direction));
    }
    let body = match reader.u32()? {
        MSG_ACCEPTED => {
            let verifier = OpaqueAuth::decode(&mut reader)?;
            let status = match reader.u32()? {
                SUCCESS => AcceptedStatus::Success(reader.into_rest()),
                PROG_UNAVAIL => AcceptedStatus::ProgramUnavailable,
                PROG_MISMATCH => AcceptedStatus::ProgramMismatch {
                    low: reader.u32()?,
                    high: reader.u32()?,
                },
                PROC_UNAVAIL => AcceptedStatus::ProcedureUnavailable,
                GARBAGE_ARGS => AcceptedStatus::GarbageArgs,
                SYSTEM_ERR => AcceptedStatus::SystemError,
                other => return Err(DecodeError::UnknownAcceptStatus(other)),
            };
            ReplyBody::Accepted { verifier, status }
        }
        MSG_DENIED => match reader.u32()? {
            RPC_MISMATCH => ReplyBody::Denied(Rejection::RpcMismatch {
                low: reader.u32()?,
                high: reader.u32()?,
            }),
            AUTH_ERROR => {
                let why = reader.u32()?;
                let why = AuthStat::from_wire(why).ok_or(DecodeError::UnknownAuthStatus(why))?;
                ReplyBody::Denied(Rejection::AuthError(why))
            }
            other => return Err(DecodeError::UnknownRejectStatus(other)),
        },
        other => return Err(DecodeError::UnknownReplyStatus(other)),
    };
    Ok((xid, body))
}

/// Validate a reply's header and return its verifier and result bytes.
///
/// # Errors
///
/// Returns [`RpcError::Decode`] for malformed input and the status-specific
/// [`RpcError`] variant for any reply that is not an accepted success.
pub fn decode_reply(message: Bytes) -> Result<(OpaqueAuth, Bytes), RpcError> {
    let (_, body) = decode_reply_body(message)?;
    body.into_result()
}
