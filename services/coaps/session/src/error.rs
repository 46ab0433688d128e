//! Error types for credential lookup, session engines and plaintext handling.

use std::net::SocketAddr;
use thiserror::Error;

use crate::engine::AlertDescription;

/// Credential lookup failures; each aborts only the handshake that asked
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// No entry matches the offered identity
    #[error("no credential for identity")]
    CredentialNotFound,

    /// Caller buffer cannot hold the key
    #[error("buffer too small for key: need {needed} bytes, have {capacity}")]
    BufferTooSmall {
        /// Key length
        needed: usize,
        /// Caller buffer length
        capacity: usize,
    },
}

/// Returned by a handler that could not make sense of decrypted plaintext
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("plaintext not handled")]
pub struct NotHandled;

/// Why a handshake was abandoned
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandshakeFailure {
    /// Credential lookup refused the identity
    #[error("credential lookup failed: {0}")]
    Credential(#[from] CredentialError),

    /// Message arrived in a state that does not expect it
    #[error("unexpected handshake message")]
    UnexpectedMessage,

    /// Finished verification did not match the transcript
    #[error("finished verification failed")]
    BadFinished,

    /// Retransmissions exhausted
    #[error("handshake timed out")]
    Timeout,

    /// Peer aborted with an alert
    #[error("peer sent alert {0:?}")]
    Alert(AlertDescription),

    /// Key schedule could not be computed
    #[error("key derivation failed")]
    KeyDerivation,
}

/// Per-datagram and per-send failures reported by a session engine.
///
/// None of these are fatal to the process; they describe what happened to one
/// exchange with one peer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Datagram does not parse as records
    #[error("malformed record from {peer}: {reason}")]
    Malformed {
        /// Sender
        peer: SocketAddr,
        /// What was wrong
        reason: &'static str,
    },

    /// Record addressed to a session that does not exist
    #[error("no session for {0}")]
    NoSession(SocketAddr),

    /// Session exists but has not finished its handshake, or this role cannot open one
    #[error("session with {0} not connected")]
    NotConnected(SocketAddr),

    /// Record failed authentication
    #[error("record from {0} failed authentication")]
    Decrypt(SocketAddr),

    /// Record sequence already seen or too old
    #[error("replayed record from {0}")]
    Replay(SocketAddr),

    /// Sealing a record failed
    #[error("failed to seal record for {0}")]
    Seal(SocketAddr),

    /// Record body does not fit the 16-bit length field
    #[error("record for {0} too long")]
    RecordTooLong(SocketAddr),

    /// Handshake with this peer was abandoned
    #[error("handshake with {peer} failed: {reason}")]
    Handshake {
        /// Peer
        peer: SocketAddr,
        /// Cause
        reason: HandshakeFailure,
    },

    /// Session table full
    #[error("peer limit reached ({0})")]
    PeerLimit(usize),

    /// Too much plaintext waiting for a handshake to finish
    #[error("pending queue full for {0}")]
    QueueFull(SocketAddr),

    /// Handler rejected the decrypted plaintext
    #[error("plaintext from {0} not handled")]
    NotHandled(SocketAddr),
}
