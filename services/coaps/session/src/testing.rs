//! Recording handler shared by engine tests.

use crate::credentials::{CredentialKind, CredentialStore};
use crate::engine::{EventCode, EventLevel, Reply, SessionHandler, SessionId};
use crate::error::{CredentialError, NotHandled};
use std::net::SocketAddr;

/// Records every callback; echoes plaintext back unless it starts with `!`
#[derive(Debug, Default)]
pub struct Recorder {
    pub credentials: CredentialStore,
    pub sent: Vec<(SocketAddr, Vec<u8>)>,
    pub received: Vec<(SocketAddr, SessionId, Vec<u8>)>,
    pub events: Vec<(SocketAddr, EventLevel, EventCode)>,
    pub echo: bool,
}

impl Recorder {
    pub fn new(credentials: CredentialStore) -> Self {
        Self {
            credentials,
            ..Self::default()
        }
    }

    pub fn echoing(mut self) -> Self {
        self.echo = true;
        self
    }

    pub fn codes(&self) -> Vec<EventCode> {
        self.events.iter().map(|(_, _, code)| *code).collect()
    }

    /// Take outbound datagrams recorded so far
    pub fn drain_sent(&mut self) -> Vec<(SocketAddr, Vec<u8>)> {
        std::mem::take(&mut self.sent)
    }
}

impl SessionHandler for Recorder {
    fn outbound_send(&mut self, peer: SocketAddr, data: &[u8]) -> usize {
        self.sent.push((peer, data.to_vec()));
        data.len()
    }

    fn inbound_plaintext(
        &mut self,
        peer: SocketAddr,
        session: SessionId,
        data: &[u8],
        reply: &mut Reply,
    ) -> Result<(), NotHandled> {
        if data.first() == Some(&b'!') {
            return Err(NotHandled);
        }
        self.received.push((peer, session, data.to_vec()));
        if self.echo {
            reply.send(data);
        }
        Ok(())
    }

    fn lifecycle_event(
        &mut self,
        peer: SocketAddr,
        _session: SessionId,
        level: EventLevel,
        code: EventCode,
    ) {
        self.events.push((peer, level, code));
    }

    fn credential_lookup(
        &self,
        kind: CredentialKind,
        identity: &[u8],
        out: &mut [u8],
    ) -> Result<usize, CredentialError> {
        self.credentials.lookup(kind, identity, out)
    }
}
