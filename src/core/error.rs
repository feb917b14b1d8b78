//! Error types for the SLOW transport client.

use thiserror::Error;

use crate::session::SessionPhase;

/// Operations that can time out waiting for the central's reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimedOutOp {
    /// CONNECT handshake.
    Connect,
    /// DISCONNECT teardown.
    Disconnect,
    /// Zero-way session revival.
    Revive,
}

impl std::fmt::Display for TimedOutOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimedOutOp::Connect => write!(f, "connect"),
            TimedOutOp::Disconnect => write!(f, "disconnect"),
            TimedOutOp::Revive => write!(f, "revive"),
        }
    }
}

/// Top-level errors surfaced by the client API.
///
/// Decode failures are never surfaced: a malformed datagram is dropped
/// inside the receive loop, indistinguishable from one that was lost.
#[derive(Debug, Error)]
pub enum SlowError {
    /// Socket or DNS failure, fatal to initialization.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Hostname did not resolve to any address.
    #[error("could not resolve '{0}'")]
    Resolve(String),

    /// No reply within the budget for a handshake-level operation.
    #[error("{0} timed out waiting for the central")]
    Timeout(TimedOutOp),

    /// The central rejected the setup or revive request.
    #[error("{0} rejected by the central")]
    Rejected(TimedOutOp),

    /// A packet was retransmitted up to the attempt ceiling without
    /// being acknowledged.
    #[error("gave up on seq {seq} after {attempts} attempts")]
    RetriesExhausted {
        /// Sequence number of the abandoned packet.
        seq: u32,
        /// Attempts made before giving up.
        attempts: u32,
    },

    /// Operation requires an established session.
    #[error("session not established (phase: {0:?})")]
    NotEstablished(SessionPhase),

    /// Connect attempted while a session is already active.
    #[error("a session is already active (phase: {0:?})")]
    AlreadyConnected(SessionPhase),

    /// Revive requested with no retained session to revive.
    #[error("no previous session to revive")]
    NoSessionToRevive,

    /// A fragment can never fit the peer's advertised window.
    #[error("fragment of {needed} bytes exceeds the remote window of {window} bytes")]
    WindowExhausted {
        /// Bytes the blocked fragment needs.
        needed: usize,
        /// Current remote window.
        window: u16,
    },

    /// Payload needs more fragments than the 8-bit offset can address.
    #[error("payload of {0} bytes exceeds the maximum fragmentable size")]
    PayloadTooLarge(usize),
}

/// Convenience alias used throughout the crate.
pub type SlowResult<T> = Result<T, SlowError>;
