//! Pre-shared-key record layer engine.
//!
//! A four-message handshake keyed from the credential store, then
//! ChaCha20-Poly1305 sealed records with replay protection:
//!
//! ```text
//! client                                server
//!   ClientHello(random, identity)  ->
//!                                  <-   ServerHello(random)
//!   [Finished(client verify)]      ->
//!                                  <-   [Finished(server verify)]
//!   [application data]            <->   [application data]
//! ```
//!
//! Bracketed messages are sealed under epoch 1. The client drives
//! retransmission; the server answers a repeated flight with its last flight.

pub mod handshake;
pub mod record;

use crate::credentials::CredentialKind;
use crate::engine::{
    AlertDescription, EventCode, EventLevel, Reply, SecureSessionEngine, SessionHandler, SessionId,
};
use crate::error::{CredentialError, EngineError, HandshakeFailure};
use handshake::{
    client_verify, fresh_random, server_verify, transcript_hash, HandshakeMessage, SessionKeys,
    Side, MAX_PSK_LEN, RANDOM_LEN, TAG_LEN,
};
use record::{
    frame, split_record, ContentType, RecordHeader, ReplayWindow, PLAINTEXT_EPOCH,
    PROTECTED_EPOCH,
};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use subtle::ConstantTimeEq;
use tracing::{debug, info, trace, warn};
use zeroize::Zeroizing;

const ALERT_WARNING: u8 = 1;
const ALERT_FATAL: u8 = 2;

/// Which end of handshakes this engine plays
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PskRole {
    /// Accept handshakes from any peer
    Server,
    /// Open handshakes presenting `identity`
    Client {
        /// PSK identity sent in ClientHello
        identity: Vec<u8>,
    },
}

/// PSK engine settings
#[derive(Debug, Clone)]
pub struct PskConfig {
    /// Handshake role
    pub role: PskRole,
    /// Maximum concurrent sessions
    pub max_peers: usize,
    /// Sessions with no inbound traffic for this long are dropped
    pub idle_timeout: Duration,
    /// First handshake retransmission delay; doubles on each retry
    pub retransmit_interval: Duration,
    /// Retransmissions before the handshake is abandoned
    pub max_retransmits: u32,
    /// Plaintext datagrams held while a client handshake is in flight
    pub max_pending: usize,
}

impl Default for PskConfig {
    fn default() -> Self {
        Self {
            role: PskRole::Server,
            max_peers: 3,
            idle_timeout: Duration::from_secs(10),
            retransmit_interval: Duration::from_secs(1),
            max_retransmits: 4,
            max_pending: 8,
        }
    }
}

#[derive(Debug)]
enum Phase {
    AwaitServerHello {
        client_random: [u8; RANDOM_LEN],
        client_hello: Vec<u8>,
    },
    AwaitServerFinished {
        transcript: [u8; 32],
    },
    AwaitClientFinished {
        client_random: [u8; RANDOM_LEN],
        transcript: [u8; 32],
    },
    Established,
}

/// Last handshake flight, kept for retransmission or for answering a repeat
#[derive(Debug)]
struct Flight {
    datagram: Vec<u8>,
    retransmit_at: Option<Instant>,
    interval: Duration,
    attempts: u32,
}

impl Flight {
    fn timed(datagram: Vec<u8>, now: Instant, interval: Duration) -> Self {
        Self {
            datagram,
            retransmit_at: Some(now + interval),
            interval,
            attempts: 0,
        }
    }

    fn on_repeat(datagram: Vec<u8>) -> Self {
        Self {
            datagram,
            retransmit_at: None,
            interval: Duration::ZERO,
            attempts: 0,
        }
    }
}

#[derive(Debug)]
struct PskSession {
    id: SessionId,
    phase: Phase,
    keys: Option<SessionKeys>,
    write_sequence: u64,
    replay: ReplayWindow,
    last_inbound: Instant,
    flight: Option<Flight>,
    pending: VecDeque<Vec<u8>>,
}

impl PskSession {
    fn new(id: SessionId, phase: Phase, now: Instant) -> Self {
        Self {
            id,
            phase,
            keys: None,
            write_sequence: 0,
            replay: ReplayWindow::default(),
            last_inbound: now,
            flight: None,
            pending: VecDeque::new(),
        }
    }

    fn is_established(&self) -> bool {
        matches!(self.phase, Phase::Established)
    }

    fn next_sequence(&mut self) -> u64 {
        let sequence = self.write_sequence;
        self.write_sequence += 1;
        sequence
    }

    fn plain_record(&mut self, content_type: ContentType, body: &[u8]) -> Option<Vec<u8>> {
        let length = u16::try_from(body.len()).ok()?;
        let header = RecordHeader {
            content_type,
            epoch: PLAINTEXT_EPOCH,
            sequence: self.next_sequence(),
            length,
        };
        Some(frame(&header, body))
    }

    /// The stored ServerHello when `client_random` repeats the hello it answered
    fn answers_hello(&self, client_random: &[u8; RANDOM_LEN]) -> Option<&[u8]> {
        match &self.phase {
            Phase::AwaitClientFinished {
                client_random: known,
                ..
            } if known == client_random => self.flight.as_ref().map(|f| f.datagram.as_slice()),
            _ => None,
        }
    }

    fn sealed_record(&mut self, content_type: ContentType, plaintext: &[u8]) -> Option<Vec<u8>> {
        let length = u16::try_from(plaintext.len() + TAG_LEN).ok()?;
        let sequence = self.next_sequence();
        let header = RecordHeader {
            content_type,
            epoch: PROTECTED_EPOCH,
            sequence,
            length,
        };
        let sealed = self.keys.as_ref()?.seal(&header, plaintext)?;
        Some(frame(&header, &sealed))
    }
}

fn alert_body(description: AlertDescription) -> [u8; 2] {
    let level = if description == AlertDescription::CloseNotify {
        ALERT_WARNING
    } else {
        ALERT_FATAL
    };
    [level, description as u8]
}

/// PSK session engine.
///
/// A ClientHello from a peer with an established session starts a second,
/// candidate handshake. The established session keeps serving until the
/// candidate's client Finished verifies, so an unauthenticated hello can never
/// tear down a working session.
#[derive(Debug)]
pub struct PskEngine<H> {
    handler: H,
    config: PskConfig,
    sessions: HashMap<SocketAddr, PskSession>,
    candidates: HashMap<SocketAddr, PskSession>,
    next_id: u64,
}

impl<H: SessionHandler> PskEngine<H> {
    /// Create an engine around `handler`
    pub fn new(handler: H, config: PskConfig) -> Self {
        Self {
            handler,
            config,
            sessions: HashMap::new(),
            candidates: HashMap::new(),
            next_id: 1,
        }
    }

    /// Engine settings
    pub fn config(&self) -> &PskConfig {
        &self.config
    }

    /// Whether the session with `peer` has completed its handshake
    pub fn is_established(&self, peer: SocketAddr) -> bool {
        self.sessions
            .get(&peer)
            .map_or(false, PskSession::is_established)
    }

    fn allocate_id(&mut self) -> SessionId {
        let id = SessionId(self.next_id);
        self.next_id += 1;
        id
    }

    fn process_record(
        &mut self,
        peer: SocketAddr,
        header: RecordHeader,
        body: &[u8],
        now: Instant,
    ) -> Result<(), EngineError> {
        match (header.content_type, header.epoch) {
            (ContentType::Handshake, PLAINTEXT_EPOCH) => self.on_plain_handshake(peer, body, now),
            (ContentType::Alert, PLAINTEXT_EPOCH) => self.on_alert(peer, body, false),
            (ContentType::ApplicationData, PLAINTEXT_EPOCH) => Err(EngineError::Malformed {
                peer,
                reason: "plaintext application data",
            }),
            (_, PROTECTED_EPOCH) => self.on_protected(peer, header, body, now),
            _ => Err(EngineError::Malformed {
                peer,
                reason: "unknown epoch",
            }),
        }
    }

    fn on_plain_handshake(
        &mut self,
        peer: SocketAddr,
        body: &[u8],
        now: Instant,
    ) -> Result<(), EngineError> {
        let message =
            HandshakeMessage::decode(body).map_err(|reason| EngineError::Malformed { peer, reason })?;
        match message {
            HandshakeMessage::ClientHello { random, identity } => {
                self.on_client_hello(peer, body, random, &identity, now)
            }
            HandshakeMessage::ServerHello { random } => {
                self.on_server_hello(peer, body, random, now)
            }
            HandshakeMessage::Finished { .. } => Err(EngineError::Handshake {
                peer,
                reason: HandshakeFailure::UnexpectedMessage,
            }),
        }
    }

    fn on_client_hello(
        &mut self,
        peer: SocketAddr,
        client_hello: &[u8],
        client_random: [u8; RANDOM_LEN],
        identity: &[u8],
        now: Instant,
    ) -> Result<(), EngineError> {
        if self.config.role != PskRole::Server {
            return Err(EngineError::Handshake {
                peer,
                reason: HandshakeFailure::UnexpectedMessage,
            });
        }

        let repeated = self
            .sessions
            .get(&peer)
            .and_then(|session| session.answers_hello(&client_random))
            .or_else(|| {
                self.candidates
                    .get(&peer)
                    .and_then(|candidate| candidate.answers_hello(&client_random))
            });
        if let Some(server_hello) = repeated {
            trace!("Repeated ClientHello from {}, resending ServerHello", peer);
            self.handler.outbound_send(peer, server_hello);
            return Ok(());
        }

        let established = self.sessions.get(&peer).map(PskSession::is_established);
        match established {
            Some(true) => {
                debug!("Handshake from {} alongside its established session", peer);
                let candidate = self.accept_hello(peer, client_hello, client_random, identity, now)?;
                if let Some(stale) = self.candidates.insert(peer, candidate) {
                    trace!("Candidate {} for {} superseded", stale.id, peer);
                }
                return Ok(());
            }
            Some(false) => {
                debug!("New handshake from {} replaces an unfinished one", peer);
                self.forget(peer, EventLevel::Info, EventCode::Closed);
            }
            None => {}
        }

        if self.sessions.len() >= self.config.max_peers {
            warn!("Refusing handshake from {}: {} peers already", peer, self.sessions.len());
            return Err(EngineError::PeerLimit(self.config.max_peers));
        }

        let session = self.accept_hello(peer, client_hello, client_random, identity, now)?;
        self.sessions.insert(peer, session);
        Ok(())
    }

    /// Look up the identity's key, answer with ServerHello and return the
    /// session awaiting the client's Finished.
    ///
    /// A credential failure alerts the peer and reports `HandshakeFailed`
    /// without touching any stored session.
    fn accept_hello(
        &mut self,
        peer: SocketAddr,
        client_hello: &[u8],
        client_random: [u8; RANDOM_LEN],
        identity: &[u8],
        now: Instant,
    ) -> Result<PskSession, EngineError> {
        let id = self.allocate_id();
        let mut psk = Zeroizing::new([0u8; MAX_PSK_LEN]);
        let psk_len = match self
            .handler
            .credential_lookup(CredentialKind::PskKey, identity, &mut psk[..])
        {
            Ok(0) => Err(CredentialError::CredentialNotFound),
            other => other,
        };
        let psk_len = match psk_len {
            Ok(len) => len,
            Err(e) => {
                let alert = match e {
                    CredentialError::CredentialNotFound => AlertDescription::DecryptError,
                    CredentialError::BufferTooSmall { .. } => AlertDescription::InternalError,
                };
                warn!(
                    "Handshake from {} refused for identity {:?}: {}",
                    peer,
                    String::from_utf8_lossy(identity),
                    e
                );
                let datagram = frame(
                    &RecordHeader {
                        content_type: ContentType::Alert,
                        epoch: PLAINTEXT_EPOCH,
                        sequence: 0,
                        length: 2,
                    },
                    &alert_body(alert),
                );
                self.handler.outbound_send(peer, &datagram);
                self.handler
                    .lifecycle_event(peer, id, EventLevel::Fatal, EventCode::HandshakeFailed);
                return Err(EngineError::Handshake {
                    peer,
                    reason: e.into(),
                });
            }
        };

        let server_random = fresh_random();
        let server_hello = HandshakeMessage::ServerHello {
            random: server_random,
        }
        .encode();
        let transcript = transcript_hash(client_hello, &server_hello);
        let keys = SessionKeys::derive(&psk[..psk_len], &client_random, &server_random, Side::Server)
            .map_err(|reason| EngineError::Handshake { peer, reason })?;

        let mut session = PskSession::new(
            id,
            Phase::AwaitClientFinished {
                client_random,
                transcript,
            },
            now,
        );
        session.keys = Some(keys);
        let datagram = session
            .plain_record(ContentType::Handshake, &server_hello)
            .ok_or(EngineError::RecordTooLong(peer))?;
        self.handler.outbound_send(peer, &datagram);
        session.flight = Some(Flight::on_repeat(datagram));

        debug!(
            "ServerHello sent to {} for identity {:?}",
            peer,
            String::from_utf8_lossy(identity)
        );
        Ok(session)
    }

    fn on_server_hello(
        &mut self,
        peer: SocketAddr,
        server_hello: &[u8],
        server_random: [u8; RANDOM_LEN],
        now: Instant,
    ) -> Result<(), EngineError> {
        let PskRole::Client { identity } = &self.config.role else {
            return Err(EngineError::Handshake {
                peer,
                reason: HandshakeFailure::UnexpectedMessage,
            });
        };
        let Some(session) = self.sessions.get_mut(&peer) else {
            return Err(EngineError::NoSession(peer));
        };
        let (client_random, transcript) = match &session.phase {
            Phase::AwaitServerHello {
                client_random,
                client_hello,
            } => (*client_random, transcript_hash(client_hello, server_hello)),
            _ => {
                trace!("Duplicate ServerHello from {}", peer);
                return Ok(());
            }
        };

        let mut psk = Zeroizing::new([0u8; MAX_PSK_LEN]);
        let keys = match self
            .handler
            .credential_lookup(CredentialKind::PskKey, identity, &mut psk[..])
        {
            Ok(0) => Err(HandshakeFailure::Credential(CredentialError::CredentialNotFound)),
            Ok(len) => SessionKeys::derive(&psk[..len], &client_random, &server_random, Side::Client),
            Err(e) => Err(e.into()),
        };
        let keys = match keys {
            Ok(keys) => keys,
            Err(reason) => return Err(self.abort_handshake(peer, None, reason)),
        };

        let Some(session) = self.sessions.get_mut(&peer) else {
            return Err(EngineError::NoSession(peer));
        };
        session.keys = Some(keys);
        session.last_inbound = now;
        let finished = HandshakeMessage::Finished {
            verify: client_verify(&transcript),
        }
        .encode();
        let datagram = session
            .sealed_record(ContentType::Handshake, &finished)
            .ok_or(EngineError::Seal(peer))?;
        session.phase = Phase::AwaitServerFinished { transcript };
        self.handler.outbound_send(peer, &datagram);
        session.flight = Some(Flight::timed(datagram, now, self.config.retransmit_interval));
        Ok(())
    }

    fn on_protected(
        &mut self,
        peer: SocketAddr,
        header: RecordHeader,
        body: &[u8],
        now: Instant,
    ) -> Result<(), EngineError> {
        let Some(session) = self.sessions.get_mut(&peer) else {
            return Err(EngineError::NoSession(peer));
        };
        let Some(keys) = session.keys.as_ref() else {
            return Err(EngineError::NotConnected(peer));
        };
        let Some(plaintext) = keys.open(&header, body) else {
            return self.on_candidate_record(peer, header, body, now);
        };

        // Finished may legitimately repeat; everything else is replay-checked
        if header.content_type != ContentType::Handshake {
            if !session.replay.check(header.sequence) {
                return Err(EngineError::Replay(peer));
            }
            session.replay.update(header.sequence);
        }
        session.last_inbound = now;

        match header.content_type {
            ContentType::Handshake => self.on_finished(peer, &plaintext),
            ContentType::Alert => self.on_alert(peer, &plaintext, true),
            ContentType::ApplicationData => self.on_application_data(peer, &plaintext),
        }
    }

    /// A protected record the current session cannot open: the only thing it
    /// may be is the client Finished of a candidate handshake
    fn on_candidate_record(
        &mut self,
        peer: SocketAddr,
        header: RecordHeader,
        body: &[u8],
        now: Instant,
    ) -> Result<(), EngineError> {
        let Some(candidate) = self.candidates.get(&peer) else {
            return Err(EngineError::Decrypt(peer));
        };
        let plaintext = candidate
            .keys
            .as_ref()
            .and_then(|keys| keys.open(&header, body))
            .ok_or(EngineError::Decrypt(peer))?;
        if header.content_type != ContentType::Handshake {
            return Err(EngineError::NotConnected(peer));
        }
        let Phase::AwaitClientFinished { transcript, .. } = candidate.phase else {
            return Err(EngineError::NotConnected(peer));
        };
        let verify = match HandshakeMessage::decode(&plaintext) {
            Ok(HandshakeMessage::Finished { verify }) => verify,
            Ok(_) => return Err(self.abort_candidate(peer, HandshakeFailure::UnexpectedMessage)),
            Err(reason) => return Err(EngineError::Malformed { peer, reason }),
        };
        if !bool::from(client_verify(&transcript).ct_eq(&verify)) {
            return Err(self.abort_candidate(peer, HandshakeFailure::BadFinished));
        }

        let Some(mut session) = self.candidates.remove(&peer) else {
            return Err(EngineError::NoSession(peer));
        };
        let finished = HandshakeMessage::Finished {
            verify: server_verify(&transcript),
        }
        .encode();
        let datagram = session
            .sealed_record(ContentType::Handshake, &finished)
            .ok_or(EngineError::Seal(peer))?;
        session.phase = Phase::Established;
        session.last_inbound = now;
        session.flight = Some(Flight::on_repeat(datagram.clone()));
        let id = session.id;

        if let Some(previous) = self.sessions.insert(peer, session) {
            debug!("Session {} with {} replaced by {}", previous.id, peer, id);
            self.handler
                .lifecycle_event(peer, previous.id, EventLevel::Info, EventCode::Closed);
        }
        self.handler.outbound_send(peer, &datagram);
        info!("Session {} with {} established", id, peer);
        self.handler
            .lifecycle_event(peer, id, EventLevel::Info, EventCode::Connected);
        Ok(())
    }

    fn abort_candidate(&mut self, peer: SocketAddr, reason: HandshakeFailure) -> EngineError {
        if let Some(candidate) = self.candidates.remove(&peer) {
            self.handler
                .lifecycle_event(peer, candidate.id, EventLevel::Fatal, EventCode::HandshakeFailed);
        }
        warn!("Replacement handshake with {} failed: {}", peer, reason);
        EngineError::Handshake { peer, reason }
    }

    fn on_finished(&mut self, peer: SocketAddr, body: &[u8]) -> Result<(), EngineError> {
        let verify = match HandshakeMessage::decode(body) {
            Ok(HandshakeMessage::Finished { verify }) => verify,
            Ok(_) => {
                return Err(self.abort_handshake(
                    peer,
                    Some(AlertDescription::UnexpectedMessage),
                    HandshakeFailure::UnexpectedMessage,
                ))
            }
            Err(reason) => return Err(EngineError::Malformed { peer, reason }),
        };
        let Some(session) = self.sessions.get_mut(&peer) else {
            return Err(EngineError::NoSession(peer));
        };

        match session.phase {
            Phase::AwaitClientFinished { transcript, .. } => {
                if !bool::from(client_verify(&transcript).ct_eq(&verify)) {
                    return Err(self.abort_handshake(
                        peer,
                        Some(AlertDescription::DecryptError),
                        HandshakeFailure::BadFinished,
                    ));
                }
                let finished = HandshakeMessage::Finished {
                    verify: server_verify(&transcript),
                }
                .encode();
                let datagram = session
                    .sealed_record(ContentType::Handshake, &finished)
                    .ok_or(EngineError::Seal(peer))?;
                session.phase = Phase::Established;
                self.handler.outbound_send(peer, &datagram);
                session.flight = Some(Flight::on_repeat(datagram));
                let id = session.id;
                info!("Session {} with {} established", id, peer);
                self.handler
                    .lifecycle_event(peer, id, EventLevel::Info, EventCode::Connected);
                self.flush_pending(peer)
            }
            Phase::AwaitServerFinished { transcript } => {
                if !bool::from(server_verify(&transcript).ct_eq(&verify)) {
                    return Err(self.abort_handshake(
                        peer,
                        Some(AlertDescription::DecryptError),
                        HandshakeFailure::BadFinished,
                    ));
                }
                session.phase = Phase::Established;
                session.flight = None;
                let id = session.id;
                info!("Session {} with {} established", id, peer);
                self.handler
                    .lifecycle_event(peer, id, EventLevel::Info, EventCode::Connected);
                self.flush_pending(peer)
            }
            Phase::Established => {
                // Our Finished was lost; the client is repeating its own
                if let Some(flight) = &session.flight {
                    trace!("Repeated Finished from {}, resending ours", peer);
                    self.handler.outbound_send(peer, &flight.datagram);
                }
                Ok(())
            }
            Phase::AwaitServerHello { .. } => Err(self.abort_handshake(
                peer,
                Some(AlertDescription::UnexpectedMessage),
                HandshakeFailure::UnexpectedMessage,
            )),
        }
    }

    fn on_application_data(&mut self, peer: SocketAddr, plaintext: &[u8]) -> Result<(), EngineError> {
        let id = match self.sessions.get(&peer) {
            Some(session) if session.is_established() => session.id,
            Some(_) => return Err(EngineError::NotConnected(peer)),
            None => return Err(EngineError::NoSession(peer)),
        };

        let mut reply = Reply::new();
        self.handler
            .inbound_plaintext(peer, id, plaintext, &mut reply)
            .map_err(|_| EngineError::NotHandled(peer))?;
        for data in reply.into_queued() {
            self.send_sealed(peer, &data)?;
        }
        Ok(())
    }

    fn on_alert(&mut self, peer: SocketAddr, body: &[u8], authenticated: bool) -> Result<(), EngineError> {
        let [_level, description] = body else {
            return Err(EngineError::Malformed {
                peer,
                reason: "alert length",
            });
        };
        let description = AlertDescription::try_from(*description)
            .unwrap_or(AlertDescription::HandshakeFailure);
        let Some(session) = self.sessions.get(&peer) else {
            trace!("Alert {:?} from {} without a session", description, peer);
            return Ok(());
        };
        if session.is_established() && !authenticated {
            debug!("Ignoring unauthenticated alert {:?} from {}", description, peer);
            return Ok(());
        }

        if description == AlertDescription::CloseNotify {
            debug!("Peer {} closed session {}", peer, session.id);
            self.forget(peer, EventLevel::Info, EventCode::Closed);
            return Ok(());
        }

        let established = session.is_established();
        let id = session.id;
        warn!("Alert {:?} from {} on session {}", description, peer, id);
        self.remove_session(peer);
        self.handler
            .lifecycle_event(peer, id, EventLevel::Fatal, EventCode::Alert(description));
        if established {
            return Ok(());
        }
        self.handler
            .lifecycle_event(peer, id, EventLevel::Fatal, EventCode::HandshakeFailed);
        Err(EngineError::Handshake {
            peer,
            reason: HandshakeFailure::Alert(description),
        })
    }

    fn send_sealed(&mut self, peer: SocketAddr, data: &[u8]) -> Result<(), EngineError> {
        let session = self
            .sessions
            .get_mut(&peer)
            .ok_or(EngineError::NoSession(peer))?;
        let datagram = session
            .sealed_record(ContentType::ApplicationData, data)
            .ok_or(EngineError::Seal(peer))?;
        self.handler.outbound_send(peer, &datagram);
        Ok(())
    }

    fn flush_pending(&mut self, peer: SocketAddr) -> Result<(), EngineError> {
        let pending = match self.sessions.get_mut(&peer) {
            Some(session) => std::mem::take(&mut session.pending),
            None => return Ok(()),
        };
        if !pending.is_empty() {
            debug!("Flushing {} queued datagrams to {}", pending.len(), peer);
        }
        for data in pending {
            self.send_sealed(peer, &data)?;
        }
        Ok(())
    }

    /// Drop the session, optionally alerting the peer, and report the failure
    fn abort_handshake(
        &mut self,
        peer: SocketAddr,
        alert: Option<AlertDescription>,
        reason: HandshakeFailure,
    ) -> EngineError {
        if let Some(mut session) = self.sessions.remove(&peer) {
            if let Some(datagram) =
                alert.and_then(|alert| session.plain_record(ContentType::Alert, &alert_body(alert)))
            {
                self.handler.outbound_send(peer, &datagram);
            }
            self.handler
                .lifecycle_event(peer, session.id, EventLevel::Fatal, EventCode::HandshakeFailed);
        }
        warn!("Handshake with {} failed: {}", peer, reason);
        EngineError::Handshake { peer, reason }
    }

    /// Remove the session with `peer`; a pending candidate handshake takes its
    /// slot as an ordinary unfinished handshake
    fn remove_session(&mut self, peer: SocketAddr) -> Option<PskSession> {
        let removed = self.sessions.remove(&peer);
        if let Some(candidate) = self.candidates.remove(&peer) {
            self.sessions.insert(peer, candidate);
        }
        removed
    }

    fn forget(&mut self, peer: SocketAddr, level: EventLevel, code: EventCode) {
        if let Some(session) = self.remove_session(peer) {
            self.handler.lifecycle_event(peer, session.id, level, code);
        }
    }
}

impl<H: SessionHandler> SecureSessionEngine for PskEngine<H> {
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
        let mut rest = data;
        if rest.is_empty() {
            return Err(EngineError::Malformed {
                peer,
                reason: "empty datagram",
            });
        }
        while !rest.is_empty() {
            let (header, body, tail) =
                split_record(rest).map_err(|reason| EngineError::Malformed { peer, reason })?;
            rest = tail;
            self.process_record(peer, header, body, now)?;
        }
        Ok(())
    }

    fn send_plaintext(
        &mut self,
        peer: SocketAddr,
        data: &[u8],
        now: Instant,
    ) -> Result<(), EngineError> {
        if let Some(session) = self.sessions.get_mut(&peer) {
            if session.is_established() {
                return self.send_sealed(peer, data);
            }
            if session.pending.len() >= self.config.max_pending {
                return Err(EngineError::QueueFull(peer));
            }
            session.pending.push_back(data.to_vec());
            return Ok(());
        }

        let PskRole::Client { identity } = &self.config.role else {
            return Err(EngineError::NotConnected(peer));
        };
        if self.sessions.len() >= self.config.max_peers {
            return Err(EngineError::PeerLimit(self.config.max_peers));
        }

        let client_random = fresh_random();
        let client_hello = HandshakeMessage::ClientHello {
            random: client_random,
            identity: identity.clone(),
        }
        .encode();
        let id = self.allocate_id();
        let mut session = PskSession::new(
            id,
            Phase::AwaitServerHello {
                client_random,
                client_hello: client_hello.clone(),
            },
            now,
        );
        session.pending.push_back(data.to_vec());
        let datagram = session
            .plain_record(ContentType::Handshake, &client_hello)
            .ok_or(EngineError::RecordTooLong(peer))?;

        info!("Connecting to {} as session {}", peer, id);
        self.handler
            .lifecycle_event(peer, id, EventLevel::Info, EventCode::Connect);
        self.handler.outbound_send(peer, &datagram);
        session.flight = Some(Flight::timed(
            datagram,
            now,
            self.config.retransmit_interval,
        ));
        self.sessions.insert(peer, session);
        Ok(())
    }

    fn tick(&mut self, now: Instant) {
        let max_retransmits = self.config.max_retransmits;
        let idle_timeout = self.config.idle_timeout;
        let mut abandoned = Vec::new();
        let mut expired = Vec::new();

        for (peer, session) in self.sessions.iter_mut() {
            let due = session.flight.as_ref().and_then(|flight| flight.retransmit_at);
            match due {
                Some(at) if now >= at => {
                    let Some(flight) = session.flight.as_mut() else {
                        continue;
                    };
                    if flight.attempts >= max_retransmits {
                        abandoned.push(*peer);
                        continue;
                    }
                    flight.attempts += 1;
                    flight.interval = flight.interval.saturating_mul(2);
                    flight.retransmit_at = Some(now + flight.interval);
                    debug!(
                        "Retransmitting handshake flight to {} (attempt {})",
                        peer, flight.attempts
                    );
                    self.handler.outbound_send(*peer, &flight.datagram);
                }
                Some(_) => {}
                None => {
                    if now.saturating_duration_since(session.last_inbound) >= idle_timeout {
                        expired.push(*peer);
                    }
                }
            }
        }

        let stale: Vec<SocketAddr> = self
            .candidates
            .iter()
            .filter(|(_, candidate)| {
                now.saturating_duration_since(candidate.last_inbound) >= idle_timeout
            })
            .map(|(peer, _)| *peer)
            .collect();
        for peer in stale {
            if let Some(candidate) = self.candidates.remove(&peer) {
                debug!("Replacement handshake with {} never finished", peer);
                self.handler
                    .lifecycle_event(peer, candidate.id, EventLevel::Fatal, EventCode::HandshakeFailed);
            }
        }

        for peer in abandoned {
            warn!("Handshake with {} timed out", peer);
            self.forget(peer, EventLevel::Fatal, EventCode::HandshakeFailed);
        }
        for peer in expired {
            debug!("Session with {} idle, expiring", peer);
            self.forget(peer, EventLevel::Info, EventCode::Closed);
        }
    }

    fn close(&mut self, peer: SocketAddr) {
        self.candidates.remove(&peer);
        let Some(session) = self.sessions.get_mut(&peer) else {
            return;
        };
        let body = alert_body(AlertDescription::CloseNotify);
        let datagram = if session.is_established() {
            session.sealed_record(ContentType::Alert, &body)
        } else {
            session.plain_record(ContentType::Alert, &body)
        };
        if let Some(datagram) = datagram {
            self.handler.outbound_send(peer, &datagram);
        }
        self.forget(peer, EventLevel::Info, EventCode::Closed);
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
        self.sessions.get(&peer).map(|session| session.id)
    }
}
