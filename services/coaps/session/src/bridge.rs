//! Transport bridge: the session handler wired between an engine, the shared
//! socket and the protocol dispatcher.

use crate::credentials::{CredentialKind, CredentialStore};
use crate::engine::{EventCode, EventLevel, Reply, SessionHandler, SessionId};
use crate::error::{CredentialError, NotHandled};
use crate::socket::{DatagramSocket, SocketBinding};
use crate::stats::BridgeStats;
use coaps_dispatch::Dispatcher;
use coaps_wire::{decode, encode, Message};
use std::io;
use std::net::SocketAddr;
use tracing::{debug, info, trace, warn};

/// What the bridge does with decrypted plaintext
#[derive(Debug)]
pub enum BridgeRole {
    /// Decode requests, dispatch them and answer on the same session
    Server(Dispatcher),
    /// Decode responses for logging only
    Client,
}

impl BridgeRole {
    fn name(&self) -> &'static str {
        match self {
            BridgeRole::Server(_) => "server",
            BridgeRole::Client => "client",
        }
    }
}

/// Session handler over a [`SocketBinding`]
#[derive(Debug)]
pub struct TransportBridge<S> {
    binding: SocketBinding<S>,
    credentials: CredentialStore,
    role: BridgeRole,
    response_buf: Vec<u8>,
    stats: BridgeStats,
    last_response: Option<Message>,
}

impl<S: DatagramSocket> TransportBridge<S> {
    /// Create a bridge owning `socket`; responses are encoded into a buffer of
    /// `max_response_size` bytes
    pub fn new(
        socket: S,
        credentials: CredentialStore,
        role: BridgeRole,
        max_response_size: usize,
    ) -> Self {
        Self {
            binding: SocketBinding::new(socket),
            credentials,
            role,
            response_buf: vec![0u8; max_response_size],
            stats: BridgeStats::default(),
            last_response: None,
        }
    }

    /// The shared socket binding
    pub fn binding(&self) -> &SocketBinding<S> {
        &self.binding
    }

    /// Counters
    pub fn stats(&self) -> &BridgeStats {
        &self.stats
    }

    /// Counters, mutably
    pub fn stats_mut(&mut self) -> &mut BridgeStats {
        &mut self.stats
    }

    /// Plaintext role
    pub fn role(&self) -> &BridgeRole {
        &self.role
    }

    /// Most recent response decoded in client role
    pub fn last_response(&self) -> Option<&Message> {
        self.last_response.as_ref()
    }

    fn serve(&mut self, peer: SocketAddr, data: &[u8], reply: &mut Reply) -> Result<(), NotHandled> {
        let request = match decode(data) {
            Ok(request) => request,
            Err(e) => {
                self.stats.malformed += 1;
                debug!("Undecodable request from {}: {}", peer, e);
                return Err(NotHandled);
            }
        };

        if request.is_ping() {
            let reset = Message::reset_for(&request);
            if let Ok(len) = encode(&reset, &mut self.response_buf) {
                reply.send(&self.response_buf[..len]);
            }
            return Ok(());
        }
        if !request.code.is_request() {
            trace!("Ignoring {} {:?} from {}", request.code, request.mtype, peer);
            return Err(NotHandled);
        }

        let BridgeRole::Server(dispatcher) = &self.role else {
            return Err(NotHandled);
        };
        match dispatcher.dispatch_encoded(&request, &mut self.response_buf) {
            Some(len) => {
                self.stats.dispatched += 1;
                reply.send(&self.response_buf[..len]);
            }
            None => self.stats.responses_dropped += 1,
        }
        Ok(())
    }

    fn observe(&mut self, peer: SocketAddr, data: &[u8]) -> Result<(), NotHandled> {
        let response = match decode(data) {
            Ok(response) => response,
            Err(e) => {
                self.stats.malformed += 1;
                debug!("Undecodable response from {}: {}", peer, e);
                return Err(NotHandled);
            }
        };
        if response.code.is_request() {
            debug!("Client role ignoring request from {}", peer);
            return Err(NotHandled);
        }

        info!(
            "Answer was: {} {}",
            response.code,
            String::from_utf8_lossy(&response.payload)
        );
        self.stats.responses_observed += 1;
        self.last_response = Some(response);
        Ok(())
    }
}

impl<S: DatagramSocket> SessionHandler for TransportBridge<S> {
    fn outbound_send(&mut self, peer: SocketAddr, data: &[u8]) -> usize {
        // The guard drops at the end of this statement, resetting to wildcard
        let result = self.binding.bind_remote(peer).send(data);
        match result {
            Ok(sent) => {
                self.stats.record_outbound(sent);
                trace!("Sent {} bytes to {}", sent, peer);
                sent
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                self.stats.sends_deferred += 1;
                debug!("Socket busy, dropping {} bytes for {}", data.len(), peer);
                0
            }
            Err(e) => {
                self.stats.send_failures += 1;
                warn!("Send to {} failed: {}", peer, e);
                0
            }
        }
    }

    fn inbound_plaintext(
        &mut self,
        peer: SocketAddr,
        session: SessionId,
        data: &[u8],
        reply: &mut Reply,
    ) -> Result<(), NotHandled> {
        trace!("{} bytes of plaintext from {} on {}", data.len(), peer, session);
        match self.role {
            BridgeRole::Server(_) => self.serve(peer, data, reply),
            BridgeRole::Client => self.observe(peer, data),
        }
    }

    fn lifecycle_event(
        &mut self,
        peer: SocketAddr,
        session: SessionId,
        level: EventLevel,
        code: EventCode,
    ) {
        match code {
            EventCode::Connected => self.stats.handshakes_completed += 1,
            EventCode::HandshakeFailed => self.stats.handshakes_failed += 1,
            _ => {}
        }
        match level {
            EventLevel::Info => info!(
                "{} session {} with {}: {}",
                self.role.name(),
                session,
                peer,
                code
            ),
            EventLevel::Warning | EventLevel::Fatal => warn!(
                "{} session {} with {}: {} ({:?})",
                self.role.name(),
                session,
                peer,
                code,
                level
            ),
        }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryNetwork, MemorySocket};
    use bytes::Bytes;
    use coaps_dispatch::{HandlerResponse, Methods, Resource, ResourceTable};
    use coaps_wire::{encode_to_vec, Code, ContentFormat, MessageType, Method};

    fn local() -> SocketAddr {
        "[::1]:6666".parse().unwrap()
    }

    fn peer(n: u16) -> SocketAddr {
        SocketAddr::new("fd00::1".parse().unwrap(), 7000 + n)
    }

    fn server_bridge(net: &MemoryNetwork, max_response: usize) -> TransportBridge<MemorySocket> {
        let mut table = ResourceTable::new();
        table
            .register(Resource::new("time", Methods::GET, |_m: Method, _p: &[u8]| {
                HandlerResponse::content(ContentFormat::TEXT_PLAIN, Bytes::from_static(b"12:00"))
            }))
            .unwrap();
        table
            .register(Resource::new("big", Methods::GET, |_m: Method, _p: &[u8]| {
                HandlerResponse::content(ContentFormat::OCTET_STREAM, Bytes::from(vec![1u8; 300]))
            }))
            .unwrap();
        TransportBridge::new(
            net.bind(local()),
            CredentialStore::single("Client_identity", "secretPSK"),
            BridgeRole::Server(Dispatcher::new(table)),
            max_response,
        )
    }

    fn get(path: &str) -> Vec<u8> {
        encode_to_vec(&Message::request(MessageType::Confirmable, Code::GET, 0x10).with_path(path))
            .unwrap()
    }

    #[test]
    fn test_outbound_send_resets_binding() {
        let net = MemoryNetwork::new();
        let mut bridge = server_bridge(&net, 256);
        let _p1 = net.bind(peer(1));
        let _p2 = net.bind(peer(2));

        assert_eq!(bridge.outbound_send(peer(1), b"abc"), 3);
        assert_eq!(bridge.binding().remote_peer(), None);
        assert_eq!(bridge.outbound_send(peer(2), b"de"), 2);
        assert_eq!(bridge.binding().remote_peer(), None);
        assert_eq!(net.pending(peer(1)), 1);
        assert_eq!(net.pending(peer(2)), 1);
        assert_eq!(bridge.stats().bytes_out, 5);
    }

    #[test]
    fn test_failed_send_returns_zero_and_resets() {
        let net = MemoryNetwork::new();
        let mut bridge = server_bridge(&net, 256);
        net.fail_sends_from(local(), true);

        assert_eq!(bridge.outbound_send(peer(1), b"abc"), 0);
        assert_eq!(bridge.binding().remote_peer(), None);
        assert_eq!(bridge.stats().send_failures, 1);
    }

    #[test]
    fn test_request_dispatched_into_reply() {
        let net = MemoryNetwork::new();
        let mut bridge = server_bridge(&net, 256);
        let mut reply = Reply::new();

        bridge
            .inbound_plaintext(peer(1), SessionId(1), &get("time"), &mut reply)
            .unwrap();
        let queued = reply.into_queued();
        assert_eq!(queued.len(), 1);
        let response = decode(&queued[0]).unwrap();
        assert_eq!(response.code, Code::CONTENT);
        assert_eq!(&response.payload[..], b"12:00");

        // nothing went to the socket directly
        assert!(net.sent().is_empty());
        assert_eq!(bridge.stats().dispatched, 1);
    }

    #[test]
    fn test_missing_path_is_not_found() {
        let net = MemoryNetwork::new();
        let mut bridge = server_bridge(&net, 256);
        let mut reply = Reply::new();
        bridge
            .inbound_plaintext(peer(1), SessionId(1), &get("missing"), &mut reply)
            .unwrap();
        let response = decode(&reply.into_queued()[0]).unwrap();
        assert_eq!(response.code, Code::NOT_FOUND);
        assert!(response.payload.is_empty());
    }

    #[test]
    fn test_malformed_is_not_handled() {
        let net = MemoryNetwork::new();
        let mut bridge = server_bridge(&net, 256);
        let mut reply = Reply::new();
        assert_eq!(
            bridge.inbound_plaintext(peer(1), SessionId(1), &[0x40, 0x01], &mut reply),
            Err(NotHandled)
        );
        assert!(reply.is_empty());
        assert_eq!(bridge.stats().malformed, 1);
    }

    #[test]
    fn test_oversized_response_dropped() {
        let net = MemoryNetwork::new();
        let mut bridge = server_bridge(&net, 64);
        let mut reply = Reply::new();
        bridge
            .inbound_plaintext(peer(1), SessionId(1), &get("big"), &mut reply)
            .unwrap();
        assert!(reply.is_empty());
        assert_eq!(bridge.stats().responses_dropped, 1);
    }

    #[test]
    fn test_ping_gets_reset() {
        let net = MemoryNetwork::new();
        let mut bridge = server_bridge(&net, 64);
        let ping = encode_to_vec(&Message::new(MessageType::Confirmable, Code::EMPTY, 77)).unwrap();
        let mut reply = Reply::new();
        bridge
            .inbound_plaintext(peer(1), SessionId(1), &ping, &mut reply)
            .unwrap();
        let reset = decode(&reply.into_queued()[0]).unwrap();
        assert_eq!(reset.mtype, MessageType::Reset);
        assert_eq!(reset.message_id, 77);
    }

    #[test]
    fn test_client_role_observes_only() {
        let net = MemoryNetwork::new();
        let mut bridge = TransportBridge::new(
            net.bind(local()),
            CredentialStore::single("Client_identity", "secretPSK"),
            BridgeRole::Client,
            64,
        );
        let request = Message::request(MessageType::Confirmable, Code::GET, 5).with_path("hello");
        let response = Message::response_to(&request, Code::CONTENT)
            .with_payload(Bytes::from_static(b"Hello World!"));
        let mut reply = Reply::new();

        bridge
            .inbound_plaintext(peer(1), SessionId(1), &encode_to_vec(&response).unwrap(), &mut reply)
            .unwrap();
        assert!(reply.is_empty());
        assert_eq!(bridge.last_response(), Some(&response));
        assert_eq!(bridge.stats().responses_observed, 1);

        assert_eq!(
            bridge.inbound_plaintext(peer(1), SessionId(1), &get("time"), &mut reply),
            Err(NotHandled)
        );
        assert!(reply.is_empty());
    }

    #[test]
    fn test_lifecycle_counts() {
        let net = MemoryNetwork::new();
        let mut bridge = server_bridge(&net, 64);
        bridge.lifecycle_event(peer(1), SessionId(1), EventLevel::Info, EventCode::Connect);
        bridge.lifecycle_event(peer(1), SessionId(1), EventLevel::Info, EventCode::Connected);
        bridge.lifecycle_event(peer(2), SessionId(2), EventLevel::Fatal, EventCode::HandshakeFailed);
        assert_eq!(bridge.stats().handshakes_completed, 1);
        assert_eq!(bridge.stats().handshakes_failed, 1);
    }

    #[test]
    fn test_credential_lookup_delegates() {
        let net = MemoryNetwork::new();
        let bridge = server_bridge(&net, 64);
        let mut out = [0u8; 16];
        assert_eq!(
            bridge.credential_lookup(CredentialKind::PskKey, b"Client_identity", &mut out),
            Ok(9)
        );
        assert_eq!(
            bridge.credential_lookup(CredentialKind::PskHint, b"x", &mut out),
            Ok(0)
        );
    }
}
