//! Plaintext engine: no handshake, no encryption.
//!
//! Each peer still gets a session id so the rest of the stack sees the same
//! shape as with the PSK engine.

use crate::engine::{EventCode, EventLevel, Reply, SecureSessionEngine, SessionHandler, SessionId};
use crate::error::EngineError;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug)]
struct PlainSession {
    id: SessionId,
    last_activity: Instant,
}

/// Passthrough engine
#[derive(Debug)]
pub struct NoSecEngine<H> {
    handler: H,
    sessions: HashMap<SocketAddr, PlainSession>,
    next_id: u64,
    idle_timeout: Duration,
}

impl<H: SessionHandler> NoSecEngine<H> {
    /// Create an engine around `handler`; sessions idle for `idle_timeout` are forgotten
    pub fn new(handler: H, idle_timeout: Duration) -> Self {
        Self {
            handler,
            sessions: HashMap::new(),
            next_id: 1,
            idle_timeout,
        }
    }

    fn touch(&mut self, peer: SocketAddr, now: Instant) -> SessionId {
        if let Some(session) = self.sessions.get_mut(&peer) {
            session.last_activity = now;
            return session.id;
        }
        let id = SessionId(self.next_id);
        self.next_id += 1;
        self.sessions.insert(
            peer,
            PlainSession {
                id,
                last_activity: now,
            },
        );
        self.handler
            .lifecycle_event(peer, id, EventLevel::Info, EventCode::Connected);
        id
    }
}

impl<H: SessionHandler> SecureSessionEngine for NoSecEngine<H> {
    type Handler = H;

    fn handler(&self) -> &H {
        &self.handler
    }

    fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    fn process_inbound(
        &mut self,
        peer: SocketAddr,
        data: &[u8],
        now: Instant,
    ) -> Result<(), EngineError> {
        let id = self.touch(peer, now);
        let mut reply = Reply::new();
        self.handler
            .inbound_plaintext(peer, id, data, &mut reply)
            .map_err(|_| EngineError::NotHandled(peer))?;
        for datagram in reply.into_queued() {
            self.handler.outbound_send(peer, &datagram);
        }
        Ok(())
    }

    fn send_plaintext(
        &mut self,
        peer: SocketAddr,
        data: &[u8],
        now: Instant,
    ) -> Result<(), EngineError> {
        self.touch(peer, now);
        self.handler.outbound_send(peer, data);
        Ok(())
    }

    fn tick(&mut self, now: Instant) {
        let idle_timeout = self.idle_timeout;
        let expired: Vec<(SocketAddr, SessionId)> = self
            .sessions
            .iter()
            .filter(|(_, s)| now.saturating_duration_since(s.last_activity) >= idle_timeout)
            .map(|(peer, s)| (*peer, s.id))
            .collect();
        for (peer, id) in expired {
            debug!("Plaintext session {} with {} idle, forgetting", id, peer);
            self.sessions.remove(&peer);
            self.handler
                .lifecycle_event(peer, id, EventLevel::Info, EventCode::Closed);
        }
    }

    fn close(&mut self, peer: SocketAddr) {
        if let Some(session) = self.sessions.remove(&peer) {
            self.handler
                .lifecycle_event(peer, session.id, EventLevel::Info, EventCode::Closed);
        }
    }

    fn close_all(&mut self) {
        let peers: Vec<SocketAddr> = self.sessions.keys().copied().collect();
        for peer in peers {
            self.close(peer);
        }
    }

    fn session_count(&self) -> usize {
        self.sessions.len()
    }

    fn session_id(&self, peer: SocketAddr) -> Option<SessionId> {
        self.sessions.get(&peer).map(|s| s.id)
    }
}
