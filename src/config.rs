//! Per-connection configuration.
//!
//! [`ConnectionConfig`] collects the tunables a connection reads when it is
//! created. Values are set with consuming `with_*` methods; anything left
//! untouched keeps the default listed on the corresponding method.

use std::time::Duration;

use crate::codec::{DEFAULT_RECORD_SIZE, clamp_record_size};

/// Default call timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(25);
/// Default wall-clock budget for send retries on a full socket buffer.
pub const DEFAULT_SEND_RETRY_BUDGET: Duration = Duration::from_secs(15);
/// Default send and receive buffer size hint.
pub const DEFAULT_SIZE_HINT: usize = 64 * 1024;
/// Default number of credential refreshes before an auth error surfaces.
pub const DEFAULT_AUTH_REFRESHES: u32 = 2;
/// Default idle interval of the TLS control thread.
pub const DEFAULT_TLS_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Tunables of a single connection.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use rpcwire::ConnectionConfig;
///
/// let config = ConnectionConfig::default()
///     .with_default_timeout(Duration::from_secs(5))
///     .with_auth_refreshes(0);
/// assert_eq!(config.default_timeout(), Duration::from_secs(5));
/// assert_eq!(config.send_retry_budget(), Duration::from_secs(15));
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionConfig {
    default_timeout: Duration,
    send_retry_budget: Duration,
    max_record_size: usize,
    send_size_hint: usize,
    recv_size_hint: usize,
    auth_refreshes: u32,
    interruptible: bool,
    tls_poll_interval: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_TIMEOUT,
            send_retry_budget: DEFAULT_SEND_RETRY_BUDGET,
            max_record_size: DEFAULT_RECORD_SIZE,
            send_size_hint: DEFAULT_SIZE_HINT,
            recv_size_hint: DEFAULT_SIZE_HINT,
            auth_refreshes: DEFAULT_AUTH_REFRESHES,
            interruptible: true,
            tls_poll_interval: DEFAULT_TLS_POLL_INTERVAL,
        }
    }
}

impl ConnectionConfig {
    /// Timeout applied to calls that do not supply one. Defaults to 25 s.
    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Budget for retrying a send while the socket buffer is full.
    /// Defaults to 15 s. A zero budget gives up on the first would-block
    /// and reports [`RpcError::TimedOut`](crate::RpcError::TimedOut).
    #[must_use]
    pub fn with_send_retry_budget(mut self, budget: Duration) -> Self {
        self.send_retry_budget = budget;
        self
    }

    /// Largest inbound record accepted before the stream is declared
    /// corrupt. Clamped to
    /// [`MIN_RECORD_SIZE`](crate::codec::MIN_RECORD_SIZE)..=[`MAX_RECORD_SIZE`](crate::codec::MAX_RECORD_SIZE).
    #[must_use]
    pub fn with_max_record_size(mut self, size: usize) -> Self {
        self.max_record_size = clamp_record_size(size);
        self
    }

    /// Expected request and reply sizes, used to pre-size buffers.
    #[must_use]
    pub fn with_size_hints(mut self, send: usize, recv: usize) -> Self {
        self.send_size_hint = send;
        self.recv_size_hint = recv;
        self
    }

    /// How many times a call refreshes credentials after an auth error.
    #[must_use]
    pub fn with_auth_refreshes(mut self, refreshes: u32) -> Self {
        self.auth_refreshes = refreshes;
        self
    }

    /// Whether a caller's cancellation token may interrupt its wait.
    #[must_use]
    pub fn with_interruptible(mut self, interruptible: bool) -> Self {
        self.interruptible = interruptible;
        self
    }

    /// Longest idle sleep of the TLS control thread.
    #[must_use]
    pub fn with_tls_poll_interval(mut self, interval: Duration) -> Self {
        self.tls_poll_interval = interval;
        self
    }

    /// Call timeout used when none is supplied.
    #[must_use]
    pub const fn default_timeout(&self) -> Duration { self.default_timeout }

    /// Send retry budget.
    #[must_use]
    pub const fn send_retry_budget(&self) -> Duration { self.send_retry_budget }

    /// Inbound record cap.
    #[must_use]
    pub const fn max_record_size(&self) -> usize { self.max_record_size }

    /// Expected request size.
    #[must_use]
    pub const fn send_size_hint(&self) -> usize { self.send_size_hint }

    /// Expected reply size.
    #[must_use]
    pub const fn recv_size_hint(&self) -> usize { self.recv_size_hint }

    /// Credential refresh limit.
    #[must_use]
    pub const fn auth_refreshes(&self) -> u32 { self.auth_refreshes }

    /// Whether waits are interruptible.
    #[must_use]
    pub const fn interruptible(&self) -> bool { self.interruptible }

    /// TLS control thread idle interval.
    #[must_use]
    pub const fn tls_poll_interval(&self) -> Duration { self.tls_poll_interval }
}
