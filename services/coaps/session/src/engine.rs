//! The secure-session engine seam.
//!
//! An engine owns per-peer session state and talks to the outside world only
//! through a [`SessionHandler`]: raw datagrams leave through
//! [`SessionHandler::outbound_send`], decrypted application data arrives at
//! [`SessionHandler::inbound_plaintext`], progress is reported to
//! [`SessionHandler::lifecycle_event`] and keys come from
//! [`SessionHandler::credential_lookup`]. Building an engine around a handler
//! is the whole of context creation and handler registration.

use crate::credentials::CredentialKind;
use crate::error::{CredentialError, EngineError, NotHandled};
use std::fmt;
use std::net::SocketAddr;
use std::time::Instant;

/// Engine-assigned session handle, unique for the engine's lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Severity of a lifecycle event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventLevel {
    /// Normal progress
    Info,
    /// Recoverable trouble
    Warning,
    /// The session is gone
    Fatal,
}

/// Alert descriptions carried in alert records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AlertDescription {
    /// Orderly shutdown
    CloseNotify = 0,
    /// Message out of place
    UnexpectedMessage = 10,
    /// Record failed authentication
    BadRecordMac = 20,
    /// Handshake could not complete
    HandshakeFailure = 40,
    /// Finished verification failed or identity unknown
    DecryptError = 51,
    /// Local resource or configuration problem
    InternalError = 80,
}

impl TryFrom<u8> for AlertDescription {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::CloseNotify),
            10 => Ok(Self::UnexpectedMessage),
            20 => Ok(Self::BadRecordMac),
            40 => Ok(Self::HandshakeFailure),
            51 => Ok(Self::DecryptError),
            80 => Ok(Self::InternalError),
            other => Err(other),
        }
    }
}

/// What happened to a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventCode {
    /// Handshake started towards a peer
    Connect,
    /// Handshake finished; application data may flow
    Connected,
    /// Session closed or expired
    Closed,
    /// Handshake abandoned
    HandshakeFailed,
    /// Peer sent an alert
    Alert(AlertDescription),
}

impl fmt::Display for EventCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventCode::Connect => write!(f, "connect"),
            EventCode::Connected => write!(f, "connected"),
            EventCode::Closed => write!(f, "closed"),
            EventCode::HandshakeFailed => write!(f, "handshake failed"),
            EventCode::Alert(description) => write!(f, "alert {:?}", description),
        }
    }
}

/// Plaintext a handler wants sent back on the session it was called for
#[derive(Debug, Default)]
pub struct Reply {
    queued: Vec<Vec<u8>>,
}

impl Reply {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queue `data` for the same peer and session
    pub fn send(&mut self, data: &[u8]) {
        self.queued.push(data.to_vec());
    }

    /// Whether nothing was queued
    pub fn is_empty(&self) -> bool {
        self.queued.is_empty()
    }

    pub(crate) fn into_queued(self) -> Vec<Vec<u8>> {
        self.queued
    }
}

/// Callbacks an engine drives
pub trait SessionHandler {
    /// Put `data` on the wire towards `peer`; returns bytes queued (0 on failure)
    fn outbound_send(&mut self, peer: SocketAddr, data: &[u8]) -> usize;

    /// Application data from an established session
    fn inbound_plaintext(
        &mut self,
        peer: SocketAddr,
        session: SessionId,
        data: &[u8],
        reply: &mut Reply,
    ) -> Result<(), NotHandled>;

    /// Session progress notification; cannot influence the engine
    fn lifecycle_event(
        &mut self,
        peer: SocketAddr,
        session: SessionId,
        level: EventLevel,
        code: EventCode,
    );

    /// Key material lookup, see [`crate::CredentialStore::lookup`]
    fn credential_lookup(
        &self,
        kind: CredentialKind,
        identity: &[u8],
        out: &mut [u8],
    ) -> Result<usize, CredentialError>;
}

/// Per-peer session multiplexer over one shared socket
pub trait SecureSessionEngine {
    /// Callback table type
    type Handler: SessionHandler;

    /// The registered handler
    fn handler(&self) -> &Self::Handler;

    /// The registered handler, mutably
    fn handler_mut(&mut self) -> &mut Self::Handler;

    /// Feed one datagram received from `peer`
    fn process_inbound(
        &mut self,
        peer: SocketAddr,
        data: &[u8],
        now: Instant,
    ) -> Result<(), EngineError>;

    /// Send application data to `peer`, opening a session if needed
    fn send_plaintext(
        &mut self,
        peer: SocketAddr,
        data: &[u8],
        now: Instant,
    ) -> Result<(), EngineError>;

    /// Drive timers: retransmissions and idle expiry
    fn tick(&mut self, now: Instant);

    /// Close the session with `peer`, if any
    fn close(&mut self, peer: SocketAddr);

    /// Close every session
    fn close_all(&mut self);

    /// Live sessions
    fn session_count(&self) -> usize;

    /// Session currently associated with `peer`
    fn session_id(&self, peer: SocketAddr) -> Option<SessionId>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_description_codes() {
        for alert in [
            AlertDescription::CloseNotify,
            AlertDescription::UnexpectedMessage,
            AlertDescription::BadRecordMac,
            AlertDescription::HandshakeFailure,
            AlertDescription::DecryptError,
            AlertDescription::InternalError,
        ] {
            assert_eq!(AlertDescription::try_from(alert as u8), Ok(alert));
        }
        assert_eq!(AlertDescription::try_from(99), Err(99));
    }

    #[test]
    fn test_reply_queue() {
        let mut reply = Reply::new();
        assert!(reply.is_empty());
        reply.send(b"a");
        reply.send(b"bc");
        assert_eq!(reply.into_queued(), vec![b"a".to_vec(), b"bc".to_vec()]);
    }

    #[test]
    fn test_display() {
        assert_eq!(SessionId(4).to_string(), "#4");
        assert_eq!(EventCode::Connected.to_string(), "connected");
        assert_eq!(
            EventCode::Alert(AlertDescription::CloseNotify).to_string(),
            "alert CloseNotify"
        );
    }
}
