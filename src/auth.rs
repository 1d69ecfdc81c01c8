//! Credential flavors attached to outgoing calls.
//!
//! A connection consults its [`Auth`] implementation when encoding each
//! call, validates the reply verifier through it, and asks it to refresh
//! after an authentication failure before retrying.

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::BytesMut;

use crate::{
    codec::{
        DecodeError,
        OpaqueAuth,
        xdr::{put_opaque, put_u32},
    },
    error::AuthStat,
};

/// Flavor number of `AUTH_NONE`.
pub const AUTH_NONE: u32 = 0;
/// Flavor number of `AUTH_SYS`.
pub const AUTH_SYS: u32 = 1;

/// Longest machine name `AUTH_SYS` carries.
pub const MAX_MACHINE_NAME: usize = 255;
/// Most supplementary groups `AUTH_SYS` carries.
pub const MAX_GROUPS: usize = 16;

/// Credential provider for a connection.
pub trait Auth: Send + Sync + std::fmt::Debug {
    /// Credentials placed in the next call header.
    fn credentials(&self) -> OpaqueAuth;

    /// Verifier placed in the next call header.
    fn verifier(&self) -> OpaqueAuth { OpaqueAuth::none() }

    /// Check the verifier returned by the server.
    fn validate(&self, _verifier: &OpaqueAuth) -> bool { true }

    /// Attempt to recover from `why`. Returning `true` retries the call.
    fn refresh(&self, _why: AuthStat) -> bool { false }
}

/// The `AUTH_NONE` flavor.
#[derive(Clone, Copy, Debug, Default)]
pub struct AuthNone;

impl Auth for AuthNone {
    fn credentials(&self) -> OpaqueAuth { OpaqueAuth::none() }
}

/// The `AUTH_SYS` flavor (Unix uid/gid credentials).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthSys {
    credentials: OpaqueAuth,
}

impl AuthSys {
    /// Build `AUTH_SYS` credentials stamped with the current time.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::AuthTooLong`] if `machine_name` exceeds
    /// [`MAX_MACHINE_NAME`] bytes or more than [`MAX_GROUPS`] groups are
    /// supplied.
    ///
    /// # Examples
    ///
    /// ```
    /// use rpcwire::auth::{AUTH_SYS, Auth, AuthSys};
    ///
    /// let auth = AuthSys::new("client", 1000, 1000, &[1000, 27]).expect("valid credentials");
    /// assert_eq!(auth.credentials().flavor, AUTH_SYS);
    /// ```
    pub fn new(machine_name: &str, uid: u32, gid: u32, gids: &[u32]) -> Result<Self, DecodeError> {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_secs() as u32);
        Self::with_stamp(stamp, machine_name, uid, gid, gids)
    }

    /// Build `AUTH_SYS` credentials with an explicit stamp.
    ///
    /// # Errors
    ///
    /// See [`AuthSys::new`].
    pub fn with_stamp(
        stamp: u32,
        machine_name: &str,
        uid: u32,
        gid: u32,
        gids: &[u32],
    ) -> Result<Self, DecodeError> {
        if machine_name.len() > MAX_MACHINE_NAME {
            return Err(DecodeError::AuthTooLong {
                len: machine_name.len(),
                max: MAX_MACHINE_NAME,
            });
        }
        if gids.len() > MAX_GROUPS {
            return Err(DecodeError::AuthTooLong {
                len: gids.len(),
                max: MAX_GROUPS,
            });
        }
        let mut body = BytesMut::with_capacity(24 + machine_name.len() + 4 * gids.len());
        put_u32(&mut body, stamp);
        put_opaque(&mut body, machine_name.as_bytes());
        put_u32(&mut body, uid);
        put_u32(&mut body, gid);
        put_u32(&mut body, gids.len() as u32);
        for gid in gids {
            put_u32(&mut body, *gid);
        }
        Ok(Self {
            credentials: OpaqueAuth::new(AUTH_SYS, body.freeze())?,
        })
    }
}

impl Auth for AuthSys {
    fn credentials(&self) -> OpaqueAuth { self.credentials.clone() }
}
