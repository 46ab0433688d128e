//! One-datagram-at-a-time read path from the shared socket into an engine.

use crate::bridge::TransportBridge;
use crate::engine::SecureSessionEngine;
use crate::error::EngineError;
use crate::socket::DatagramSocket;
use std::io;
use std::net::SocketAddr;
use std::time::Instant;
use tracing::{debug, warn};

/// Result of one readiness notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PumpOutcome {
    /// Nothing was pending
    Idle,
    /// A datagram was handed to the engine and accepted
    Processed {
        /// Sender
        peer: SocketAddr,
        /// Datagram size
        len: usize,
    },
    /// The engine rejected the datagram; no other session is affected
    Rejected {
        /// Sender
        peer: SocketAddr,
        /// Why
        error: EngineError,
    },
    /// The socket reported an error; try again on the next notification
    Deferred(io::ErrorKind),
}

/// Reads exactly one datagram per call into a fixed buffer
#[derive(Debug)]
pub struct ReadPump {
    buf: Vec<u8>,
}

impl ReadPump {
    /// Create a pump whose buffer holds `max_datagram` bytes
    pub fn new(max_datagram: usize) -> Self {
        Self {
            buf: vec![0u8; max_datagram],
        }
    }

    /// Handle one readiness notification.
    ///
    /// Spurious wakeups are a no-op ([`PumpOutcome::Idle`]).
    pub fn on_datagram_available<S, E>(&mut self, engine: &mut E, now: Instant) -> PumpOutcome
    where
        S: DatagramSocket,
        E: SecureSessionEngine<Handler = TransportBridge<S>>,
    {
        let (len, peer) = match engine.handler().binding().recv(&mut self.buf) {
            Ok(Some(received)) => received,
            Ok(None) => return PumpOutcome::Idle,
            Err(e) => {
                warn!("Socket receive failed: {}", e);
                return PumpOutcome::Deferred(e.kind());
            }
        };

        let started = Instant::now();
        let result = engine.process_inbound(peer, &self.buf[..len], now);
        engine
            .handler_mut()
            .stats_mut()
            .record_inbound(len, started.elapsed());

        match result {
            Ok(()) => PumpOutcome::Processed { peer, len },
            Err(error) => {
                engine.handler_mut().stats_mut().rejected += 1;
                debug!("Dropped datagram from {}: {}", peer, error);
                PumpOutcome::Rejected { peer, error }
            }
        }
    }
}
