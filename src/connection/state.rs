//! Receive gating state machine.
//!
//! A connection's receive pipeline may only drain the socket while the gate
//! is [`ReceiveState::Normal`] or [`ReceiveState::NonAppData`]. The TLS
//! control plane closes the gate while it owns the socket. Every change goes
//! through [`ReceiveState::transition`], which rejects combinations the
//! protocol never produces.
//!
//! A readiness notification refused by a closed gate is remembered
//! separately as a deferred drain, since it coexists with any gated state.

use thiserror::Error;

/// Gate controlling the receive pipeline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReceiveState {
    /// Application data flows.
    #[default]
    Normal,
    /// Inside a multi-step TLS exchange; application data may still flow.
    NonAppData,
    /// The initial handshake owns the socket.
    TlsHandshakeInProgress,
    /// A control record is waiting for the TLS agent.
    UpcallNeeded,
    /// The TLS agent is consuming a control record.
    UpcallInProgress,
}

/// Inputs to the receive gate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReceiveEvent {
    /// A TLS upgrade was requested.
    HandshakeStarted,
    /// The initial handshake ended, successfully or not.
    HandshakeFinished,
    /// The socket surfaced a non-application record.
    ControlRecord,
    /// The TLS control task began servicing the record.
    UpcallStarted,
    /// The agent finished with the record.
    RecordResolved,
    /// The agent finished with the record and expects more.
    MoreHandshake,
    /// The agent failed; the connection is being torn down.
    UpcallFailed,
}

/// Rejected gate transition.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("invalid receive transition: {event:?} in {from:?}")]
pub struct InvalidTransition {
    /// State the gate was in.
    pub from: ReceiveState,
    /// Event that was applied.
    pub event: ReceiveEvent,
}

impl ReceiveState {
    /// Whether the receive pipeline may drain the socket.
    #[must_use]
    pub const fn accepts_data(self) -> bool { matches!(self, Self::Normal | Self::NonAppData) }

    /// Apply `event`, returning the next state.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] when `event` cannot occur in this state.
    ///
    /// # Examples
    ///
    /// ```
    /// use rpcwire::connection::{ReceiveEvent, ReceiveState};
    ///
    /// let state = ReceiveState::Normal
    ///     .transition(ReceiveEvent::ControlRecord)
    ///     .and_then(|s| s.transition(ReceiveEvent::UpcallStarted))
    ///     .and_then(|s| s.transition(ReceiveEvent::MoreHandshake));
    /// assert_eq!(state, Ok(ReceiveState::NonAppData));
    /// ```
    pub fn transition(self, event: ReceiveEvent) -> Result<Self, InvalidTransition> {
        use ReceiveEvent as E;
        use ReceiveState as S;

        let next = match (self, event) {
            (S::Normal | S::NonAppData, E::HandshakeStarted) => S::TlsHandshakeInProgress,
            (S::TlsHandshakeInProgress, E::HandshakeFinished) => S::Normal,
            (S::Normal | S::NonAppData, E::ControlRecord) => S::UpcallNeeded,
            (S::UpcallNeeded, E::UpcallStarted) => S::UpcallInProgress,
            (S::UpcallInProgress, E::RecordResolved | E::UpcallFailed) => S::Normal,
            (S::UpcallInProgress, E::MoreHandshake) => S::NonAppData,
            (from, event) => return Err(InvalidTransition { from, event }),
        };
        Ok(next)
    }
}
